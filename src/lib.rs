#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! A WebRTC PeerConnection implementation.
//!
//! This crate provides the negotiation state machine, the serialized
//! operations chain and the ICE/DTLS/SCTP transport composition that make up
//! a WebRTC endpoint, on top of the protocol crates re-exported below.

// re-export the protocol stack so downstream code shares our versions
pub use data;
pub use dtls;
pub use ice;
pub use interceptor;
pub use mdns;
pub use media;
pub use rtcp;
pub use rtp;
pub use sctp;
pub use sdp;
pub use srtp;
pub use stun;
pub use turn;
pub use util;

#[macro_use]
extern crate lazy_static;

pub mod api;
pub mod certificate;
pub mod configuration;
pub mod data_channel;
pub mod error;
pub(crate) mod mux;
pub mod peer;
pub mod track;
pub mod transceiver;
pub mod transport;

pub use error::Error;

use std::future::Future;
use std::pin::Pin;

use rand::{thread_rng, Rng};

/// The boxed future every event handler returns.
pub type EventFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub(crate) const UNSPECIFIED_STR: &str = "Unspecified";

/// Equal to UDP MTU.
pub(crate) const RECEIVE_MTU: usize = 1460;

pub(crate) const SDP_ATTRIBUTE_RID: &str = "rid";
pub(crate) const SDES_REPAIR_RTP_STREAM_ID_URI: &str =
    "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id";

const ALPHA_RUNES: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// rand_alpha generates a random alphabetic label of the requested length.
pub(crate) fn rand_alpha(n: usize) -> String {
    let mut rng = thread_rng();
    (0..n)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHA_RUNES.len());
            ALPHA_RUNES[idx] as char
        })
        .collect()
}
