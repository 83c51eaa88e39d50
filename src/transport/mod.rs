pub mod candidate;
pub mod dtls;
pub mod ice;
pub mod sctp;
