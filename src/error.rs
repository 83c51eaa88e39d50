use std::fmt;
use std::io;

use thiserror::Error;

use crate::peer::description::SdpType;
use crate::peer::states::SignalingState;

pub type Result<T> = std::result::Result<T, Error>;

/// Machine readable classification of an [`Error`], mirroring the
/// `RTCError.errorDetail` families of the W3C specification.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The operation is inapplicable in the current signaling/closed state.
    InvalidState,
    /// A configuration field or description may not be changed at this point.
    InvalidModification,
    /// Access to a resource was denied (expired certificate, foreign sender).
    InvalidAccess,
    /// A malformed argument was supplied.
    Type,
    /// An illegal state-machine operation combination.
    Operation,
    /// An SDP was missing a required attribute.
    Protocol,
    /// No such payload type, codec or mid.
    NotFound,
    /// The offer re-generation loop bound was exceeded.
    ExcessiveRetries,
    /// The bounded simulcast probe concurrency was exceeded.
    SimulcastProbeOverflow,
    /// An underlying crypto or system failure.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ErrorKind::InvalidState => "invalid-state",
            ErrorKind::InvalidModification => "invalid-modification",
            ErrorKind::InvalidAccess => "invalid-access",
            ErrorKind::Type => "type",
            ErrorKind::Operation => "operation",
            ErrorKind::Protocol => "protocol",
            ErrorKind::NotFound => "not-found",
            ErrorKind::ExcessiveRetries => "excessive-retries",
            ErrorKind::SimulcastProbeOverflow => "simulcast-probe-overflow",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// An operation was attempted after the connection was closed.
    #[error("connection closed")]
    ErrConnectionClosed,

    /// The data channel is not (yet) open.
    #[error("data channel not open")]
    ErrDataChannelNotOpen,

    /// A supplied x509 certificate has expired.
    #[error("x509 certificate expired")]
    ErrCertificateExpired,

    /// No certificate was configured and none could be generated.
    #[error("no certificate configured")]
    ErrNoCertificate,

    /// The PEM block could not be parsed into a certificate.
    #[error("bad certificate PEM format")]
    ErrCertificatePemFormat,

    /// A TURN url was supplied without credentials.
    #[error("turn server credentials required")]
    ErrNoTurnCredentials,

    /// TURN credentials were partial or malformed.
    #[error("invalid turn server credentials")]
    ErrTurnCredentials,

    /// An ICE server url did not parse.
    #[error("invalid ice server url scheme")]
    ErrIceServerUrlScheme,

    #[error("peerIdentity cannot be modified")]
    ErrModifyingPeerIdentity,
    #[error("certificates cannot be modified")]
    ErrModifyingCertificates,
    #[error("bundle policy cannot be modified")]
    ErrModifyingBundlePolicy,
    #[error("rtcp mux policy cannot be modified")]
    ErrModifyingRtcpMuxPolicy,
    #[error("ice candidate pool size cannot be modified")]
    ErrModifyingIceCandidatePoolSize,

    /// A string argument exceeded the 65535 byte limit.
    #[error("string exceeds size limit")]
    ErrStringSizeLimit,
    #[error("protocol is larger than 65535 bytes")]
    ErrProtocolTooLarge,
    #[error("both maxPacketLifeTime and maxRetransmits were set")]
    ErrRetransmitsOrPacketLifeTime,
    #[error("negotiated set without a channel id")]
    ErrNegotiatedWithoutId,
    #[error("maximum number of data channel ids used")]
    ErrMaxDataChannelId,

    #[error("codec not found")]
    ErrCodecNotFound,
    #[error("no codecs available")]
    ErrNoCodecsAvailable,
    #[error("codec is not supported by the remote")]
    ErrUnsupportedCodec,
    #[error("codec is not supported by this transceiver")]
    ErrTransceiverCodecUnsupported,
    #[error("the requested codec does not have a payloader")]
    ErrNoPayloaderForCodec,
    #[error("cannot find transceiver with mid")]
    ErrTransceiverMidNotFound,

    #[error("remote description is not set")]
    ErrNoRemoteDescription,
    #[error("operation cannot run in current signaling state")]
    ErrIncorrectSignalingState,
    #[error("offer SDP semantics does not match configuration")]
    ErrIncorrectSdpSemantics,
    #[error("new sdp does not match previous offer")]
    ErrSdpDoesNotMatchOffer,
    #[error("new sdp does not match previous answer")]
    ErrSdpDoesNotMatchAnswer,
    #[error("provided value is not a valid sdp type")]
    ErrSdpTypeInvalid,
    #[error("invalid sdp type supplied to set_local_description")]
    ErrSdpTypeInvalidSetLocalDescription,
    #[error("invalid proposed signaling state transition: from {from} applying {applying} (local: {is_local})")]
    ErrSignalingStateProposedTransitionInvalid {
        from: SignalingState,
        applying: SdpType,
        is_local: bool,
    },

    #[error("description missing a fingerprint")]
    ErrSessionDescriptionNoFingerprint,
    #[error("description carries an invalid fingerprint")]
    ErrSessionDescriptionInvalidFingerprint,
    #[error("description carries conflicting fingerprints")]
    ErrSessionDescriptionConflictingFingerprints,
    #[error("description missing ice-ufrag")]
    ErrSessionDescriptionMissingIceUfrag,
    #[error("description missing ice-pwd")]
    ErrSessionDescriptionMissingIcePwd,
    #[error("description carries conflicting ice-ufrag values")]
    ErrSessionDescriptionConflictingIceUfrag,
    #[error("description carries conflicting ice-pwd values")]
    ErrSessionDescriptionConflictingIcePwd,
    #[error("remote description contained a media section without a mid value")]
    ErrRemoteDescriptionWithoutMidValue,
    #[error("remote description has not been set yet")]
    ErrRemoteDescriptionNil,
    #[error("unsupported fingerprint hash algorithm")]
    ErrUnsupportedFingerprintAlgorithm,

    #[error("offer regeneration retry limit exceeded")]
    ErrExcessiveRetries,
    #[error("simulcast probe limit reached, new SSRC discarded")]
    ErrSimulcastProbeOverflow,
    #[error("mid RTP extension required for simulcast")]
    ErrSimulcastMidRtpExtensionRequired,
    #[error("stream id RTP extension required for simulcast")]
    ErrSimulcastStreamIdRtpExtensionRequired,
    #[error("incoming SSRC failed simulcast probing")]
    ErrSimulcastIncomingSsrcFailed,
    #[error("single media section has an explicit SSRC")]
    ErrSingleMediaSectionHasExplicitSsrc,

    #[error("sender was not created by this connection")]
    ErrSenderNotCreatedByConnection,
    #[error("track already bound")]
    ErrExistingTrack,
    #[error("failed to unbind local track")]
    ErrUnbindFailed,
    #[error("sender missing from transceiver")]
    ErrSenderMissing,
    #[error("sender has no track to bind")]
    ErrSenderTrackNil,
    #[error("replacement track has a different kind than the transceiver")]
    ErrSenderNewTrackKindMismatch,
    #[error("send has already been called")]
    ErrSenderSendAlreadyCalled,
    #[error("receive has already been called")]
    ErrReceiverReceiveAlreadyCalled,
    #[error("no stream found for the track SSRC")]
    ErrReceiverSsrcStreamNotFound,
    #[error("no stream found for the track RID")]
    ErrReceiverRidStreamNotFound,
    #[error("receiver is gone")]
    ErrReceiverNil,
    #[error("transceiver mid cannot be changed once set")]
    ErrTransceiverCannotChangeMid,
    #[error("invalid state change in transceiver set_sending_track")]
    ErrTransceiverSetSendingInvalidState,
    #[error("add_transceiver accepts at most one init")]
    ErrTransceiverOneInitOnly,
    #[error("add_transceiver_from_kind only supports recvonly, sendonly and sendrecv")]
    ErrTransceiverDirectionSupport,
    #[error("identity provider assertions are not supported")]
    ErrIdentityProviderNotSupported,

    #[error("media section has zero transceivers")]
    ErrSdpZeroTransceivers,
    #[error("invalid media section, media and data channel both enabled")]
    ErrSdpMediaSectionMediaDataChanInvalid,
    #[error("invalid media section, multiple tracks in one unified-plan section")]
    ErrSdpMediaSectionMultipleTrackInvalid,
    #[error("answering dtls role must be client or server")]
    ErrSettingEngineAnsweringDtlsRole,
    #[error("a header extension must be registered as recvonly, sendonly or both")]
    ErrRegisterHeaderExtensionInvalidDirection,

    #[error("the DTLS transport has not started yet")]
    ErrDtlsTransportNotStarted,
    #[error("DTLS transport can only be started once")]
    ErrInvalidDtlsStart,
    #[error("DTLS handshake finished without choosing an SRTP protection profile")]
    ErrNoSrtpProtectionProfile,
    #[error("peer did not provide a certificate via DTLS")]
    ErrNoRemoteCertificate,
    #[error("remote certificate does not match any fingerprint")]
    ErrNoMatchingCertificateFingerprint,
    #[error("DTLS not established")]
    ErrSctpTransportDtls,
    #[error("ICE transport can only be started in the new state")]
    ErrIceTransportNotInNew,
    #[error("ICE agent does not exist")]
    ErrIceAgentNotExist,
    #[error("ICE connection not started")]
    ErrIceConnectionNotStarted,
    #[error("unknown ICE role")]
    ErrIceRoleUnknown,
    #[error("unknown ICE candidate type")]
    ErrIceCandidateTypeUnknown,
    #[error("interceptor is not bound")]
    ErrInterceptorNotBind,
    #[error("enable detaching by calling setting_engine.detach_data_channels()")]
    ErrDetachNotEnabled,
    #[error("data channel not opened yet, try calling detach from on_open")]
    ErrDetachBeforeOpened,
    #[error("rtp packet is too short")]
    ErrRtpTooShort,
    #[error("the pipe has been closed")]
    ErrClosedPipe,

    #[error("io error: {0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Sdp(#[from] sdp::Error),
    #[error("{0}")]
    Ice(#[from] ice::Error),
    #[error("{0}")]
    Dtls(#[from] dtls::Error),
    #[error("{0}")]
    Sctp(#[from] sctp::Error),
    #[error("{0}")]
    Srtp(#[from] srtp::Error),
    #[error("{0}")]
    Data(#[from] data::Error),
    #[error("{0}")]
    Rtp(#[from] rtp::Error),
    #[error("{0}")]
    Rtcp(#[from] rtcp::Error),
    #[error("util: {0}")]
    Util(#[from] util::Error),
    #[error("interceptor: {0}")]
    Interceptor(#[from] interceptor::Error),
    #[error("certificate: {0}")]
    Certificate(String),
    #[error("parse int: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("invalid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn new(msg: String) -> Self {
        Error::Other(msg)
    }

    /// kind returns the machine readable family this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            ErrConnectionClosed | ErrDataChannelNotOpen | ErrNoRemoteDescription
            | ErrIncorrectSignalingState
            | ErrSignalingStateProposedTransitionInvalid { .. } | ErrRemoteDescriptionNil
            | ErrInvalidDtlsStart | ErrIceTransportNotInNew | ErrDtlsTransportNotStarted => {
                ErrorKind::InvalidState
            }
            ErrModifyingPeerIdentity | ErrModifyingCertificates | ErrModifyingBundlePolicy
            | ErrModifyingRtcpMuxPolicy | ErrModifyingIceCandidatePoolSize
            | ErrSdpDoesNotMatchOffer | ErrSdpDoesNotMatchAnswer
            | ErrTransceiverCannotChangeMid => ErrorKind::InvalidModification,
            ErrCertificateExpired | ErrSenderNotCreatedByConnection | ErrDetachNotEnabled
            | ErrDetachBeforeOpened => ErrorKind::InvalidAccess,
            ErrStringSizeLimit | ErrProtocolTooLarge | ErrRetransmitsOrPacketLifeTime
            | ErrNegotiatedWithoutId | ErrSdpTypeInvalid
            | ErrSdpTypeInvalidSetLocalDescription | ErrNoTurnCredentials
            | ErrTurnCredentials | ErrIceServerUrlScheme | ErrIceCandidateTypeUnknown => {
                ErrorKind::Type
            }
            ErrTransceiverOneInitOnly | ErrTransceiverDirectionSupport
            | ErrTransceiverSetSendingInvalidState | ErrSenderSendAlreadyCalled
            | ErrReceiverReceiveAlreadyCalled | ErrIncorrectSdpSemantics => ErrorKind::Operation,
            ErrSessionDescriptionNoFingerprint | ErrSessionDescriptionInvalidFingerprint
            | ErrSessionDescriptionConflictingFingerprints
            | ErrSessionDescriptionMissingIceUfrag | ErrSessionDescriptionMissingIcePwd
            | ErrSessionDescriptionConflictingIceUfrag | ErrSessionDescriptionConflictingIcePwd
            | ErrRemoteDescriptionWithoutMidValue | ErrUnsupportedFingerprintAlgorithm
            | ErrSingleMediaSectionHasExplicitSsrc => ErrorKind::Protocol,
            ErrCodecNotFound | ErrNoCodecsAvailable | ErrUnsupportedCodec
            | ErrTransceiverCodecUnsupported | ErrNoPayloaderForCodec
            | ErrTransceiverMidNotFound | ErrReceiverSsrcStreamNotFound
            | ErrReceiverRidStreamNotFound => ErrorKind::NotFound,
            ErrExcessiveRetries => ErrorKind::ExcessiveRetries,
            ErrSimulcastProbeOverflow => ErrorKind::SimulcastProbeOverflow,
            _ => ErrorKind::Unknown,
        }
    }
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq on the enum while io::Error has none.
impl PartialEq for IoError {
    fn eq(&self, _: &Self) -> bool {
        false
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}

impl From<rcgen::RcgenError> for Error {
    fn from(e: rcgen::RcgenError) -> Self {
        Error::Certificate(e.to_string())
    }
}

impl From<Error> for interceptor::Error {
    fn from(e: Error) -> Self {
        interceptor::Error::Other(e.to_string())
    }
}

/// flatten_errs collapses a list of errors into a single aggregate error.
pub(crate) fn flatten_errs(errs: Vec<Error>) -> Result<()> {
    if errs.is_empty() {
        Ok(())
    } else {
        let joined = errs
            .into_iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        Err(Error::Other(joined))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::ErrConnectionClosed.kind(), ErrorKind::InvalidState);
        assert_eq!(
            Error::ErrSdpDoesNotMatchOffer.kind(),
            ErrorKind::InvalidModification
        );
        assert_eq!(
            Error::ErrSessionDescriptionNoFingerprint.kind(),
            ErrorKind::Protocol
        );
        assert_eq!(Error::ErrExcessiveRetries.kind(), ErrorKind::ExcessiveRetries);
        assert_eq!(
            Error::ErrSimulcastProbeOverflow.kind(),
            ErrorKind::SimulcastProbeOverflow
        );
        assert_eq!(Error::Other("boom".to_owned()).kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_flatten_errs() {
        assert!(flatten_errs(vec![]).is_ok());
        let err = flatten_errs(vec![
            Error::ErrConnectionClosed,
            Error::ErrDataChannelNotOpen,
        ])
        .unwrap_err();
        assert!(err.to_string().contains("connection closed"));
        assert!(err.to_string().contains("data channel not open"));
    }
}
