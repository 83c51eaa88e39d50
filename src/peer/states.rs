use std::fmt;

use crate::error::{Error, Result};
use crate::peer::description::SdpType;

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum StateChangeOp {
    #[default]
    SetLocal,
    SetRemote,
}

impl fmt::Display for StateChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StateChangeOp::SetLocal => write!(f, "SetLocal"),
            StateChangeOp::SetRemote => write!(f, "SetRemote"),
        }
    }
}

/// SignalingState indicates where the connection is in the offer/answer
/// exchange.
///
/// <https://w3c.github.io/webrtc-pc/#dom-peerconnection-signaling-state>
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum SignalingState {
    #[default]
    Unspecified = 0,

    /// No offer/answer exchange is in progress. This is also the initial
    /// state, in which case the local and remote descriptions are empty.
    Stable,

    /// A local description of type "offer" has been successfully applied.
    HaveLocalOffer,

    /// A remote description of type "offer" has been successfully applied.
    HaveRemoteOffer,

    /// A remote offer and a local provisional answer have been applied.
    HaveLocalPranswer,

    /// A local offer and a remote provisional answer have been applied.
    HaveRemotePranswer,

    /// The connection has been closed. Terminal.
    Closed,
}

const SIGNALING_STATE_STABLE_STR: &str = "stable";
const SIGNALING_STATE_HAVE_LOCAL_OFFER_STR: &str = "have-local-offer";
const SIGNALING_STATE_HAVE_REMOTE_OFFER_STR: &str = "have-remote-offer";
const SIGNALING_STATE_HAVE_LOCAL_PRANSWER_STR: &str = "have-local-pranswer";
const SIGNALING_STATE_HAVE_REMOTE_PRANSWER_STR: &str = "have-remote-pranswer";
const SIGNALING_STATE_CLOSED_STR: &str = "closed";

impl From<&str> for SignalingState {
    fn from(raw: &str) -> Self {
        match raw {
            SIGNALING_STATE_STABLE_STR => SignalingState::Stable,
            SIGNALING_STATE_HAVE_LOCAL_OFFER_STR => SignalingState::HaveLocalOffer,
            SIGNALING_STATE_HAVE_REMOTE_OFFER_STR => SignalingState::HaveRemoteOffer,
            SIGNALING_STATE_HAVE_LOCAL_PRANSWER_STR => SignalingState::HaveLocalPranswer,
            SIGNALING_STATE_HAVE_REMOTE_PRANSWER_STR => SignalingState::HaveRemotePranswer,
            SIGNALING_STATE_CLOSED_STR => SignalingState::Closed,
            _ => SignalingState::Unspecified,
        }
    }
}

impl From<u8> for SignalingState {
    fn from(v: u8) -> Self {
        match v {
            1 => SignalingState::Stable,
            2 => SignalingState::HaveLocalOffer,
            3 => SignalingState::HaveRemoteOffer,
            4 => SignalingState::HaveLocalPranswer,
            5 => SignalingState::HaveRemotePranswer,
            6 => SignalingState::Closed,
            _ => SignalingState::Unspecified,
        }
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SignalingState::Stable => write!(f, "{SIGNALING_STATE_STABLE_STR}"),
            SignalingState::HaveLocalOffer => write!(f, "{SIGNALING_STATE_HAVE_LOCAL_OFFER_STR}"),
            SignalingState::HaveRemoteOffer => {
                write!(f, "{SIGNALING_STATE_HAVE_REMOTE_OFFER_STR}")
            }
            SignalingState::HaveLocalPranswer => {
                write!(f, "{SIGNALING_STATE_HAVE_LOCAL_PRANSWER_STR}")
            }
            SignalingState::HaveRemotePranswer => {
                write!(f, "{SIGNALING_STATE_HAVE_REMOTE_PRANSWER_STR}")
            }
            SignalingState::Closed => write!(f, "{SIGNALING_STATE_CLOSED_STR}"),
            _ => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}

/// check_next_signaling_state validates a proposed JSEP state transition.
/// Rejections leave the caller's state untouched.
pub(crate) fn check_next_signaling_state(
    cur: SignalingState,
    next: SignalingState,
    op: StateChangeOp,
    sdp_type: SdpType,
) -> Result<SignalingState> {
    // Rollback reverts any non-terminal state to stable; applied in
    // stable it is a no-op.
    if sdp_type == SdpType::Rollback {
        if next == SignalingState::Stable && cur != SignalingState::Closed {
            return Ok(next);
        }
        return Err(Error::ErrSignalingStateProposedTransitionInvalid {
            from: cur,
            applying: sdp_type,
            is_local: op == StateChangeOp::SetLocal,
        });
    }

    // 4.3.1 valid state transitions
    match cur {
        SignalingState::Stable => match op {
            StateChangeOp::SetLocal => {
                if sdp_type == SdpType::Offer && next == SignalingState::HaveLocalOffer {
                    return Ok(next);
                }
            }
            StateChangeOp::SetRemote => {
                if sdp_type == SdpType::Offer && next == SignalingState::HaveRemoteOffer {
                    return Ok(next);
                }
            }
        },
        SignalingState::HaveLocalOffer => {
            if op == StateChangeOp::SetRemote {
                match sdp_type {
                    SdpType::Answer => {
                        if next == SignalingState::Stable {
                            return Ok(next);
                        }
                    }
                    SdpType::Pranswer => {
                        if next == SignalingState::HaveRemotePranswer {
                            return Ok(next);
                        }
                    }
                    _ => {}
                }
            } else if op == StateChangeOp::SetLocal
                && sdp_type == SdpType::Offer
                && next == SignalingState::HaveLocalOffer
            {
                return Ok(next);
            }
        }
        SignalingState::HaveRemoteOffer => {
            if op == StateChangeOp::SetLocal {
                match sdp_type {
                    SdpType::Answer => {
                        if next == SignalingState::Stable {
                            return Ok(next);
                        }
                    }
                    SdpType::Pranswer => {
                        if next == SignalingState::HaveLocalPranswer {
                            return Ok(next);
                        }
                    }
                    _ => {}
                }
            } else if op == StateChangeOp::SetRemote
                && sdp_type == SdpType::Offer
                && next == SignalingState::HaveRemoteOffer
            {
                return Ok(next);
            }
        }
        SignalingState::HaveLocalPranswer => {
            if op == StateChangeOp::SetLocal {
                match sdp_type {
                    SdpType::Answer => {
                        if next == SignalingState::Stable {
                            return Ok(next);
                        }
                    }
                    SdpType::Pranswer => {
                        if next == SignalingState::HaveLocalPranswer {
                            return Ok(next);
                        }
                    }
                    _ => {}
                }
            }
        }
        SignalingState::HaveRemotePranswer => {
            if op == StateChangeOp::SetRemote {
                match sdp_type {
                    SdpType::Answer => {
                        if next == SignalingState::Stable {
                            return Ok(next);
                        }
                    }
                    SdpType::Pranswer => {
                        if next == SignalingState::HaveRemotePranswer {
                            return Ok(next);
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    };

    Err(Error::ErrSignalingStateProposedTransitionInvalid {
        from: cur,
        applying: sdp_type,
        is_local: op == StateChangeOp::SetLocal,
    })
}

/// PeerConnectionState is the aggregate state derived from the ICE and DTLS
/// transport states.
///
/// <https://w3c.github.io/webrtc-pc/#dom-peerconnection-connection-state>
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum PeerConnectionState {
    #[default]
    Unspecified,

    /// Both transports are fresh (or closed) and nothing is in flight.
    New,

    /// Either transport is negotiating (ICE checking or DTLS connecting).
    Connecting,

    /// Both transports are established.
    Connected,

    /// ICE lost connectivity and neither transport has failed outright.
    Disconnected,

    /// Either transport reached a terminal failure.
    Failed,

    /// The connection was closed locally.
    Closed,
}

const PEER_CONNECTION_STATE_NEW_STR: &str = "new";
const PEER_CONNECTION_STATE_CONNECTING_STR: &str = "connecting";
const PEER_CONNECTION_STATE_CONNECTED_STR: &str = "connected";
const PEER_CONNECTION_STATE_DISCONNECTED_STR: &str = "disconnected";
const PEER_CONNECTION_STATE_FAILED_STR: &str = "failed";
const PEER_CONNECTION_STATE_CLOSED_STR: &str = "closed";

impl From<&str> for PeerConnectionState {
    fn from(raw: &str) -> Self {
        match raw {
            PEER_CONNECTION_STATE_NEW_STR => PeerConnectionState::New,
            PEER_CONNECTION_STATE_CONNECTING_STR => PeerConnectionState::Connecting,
            PEER_CONNECTION_STATE_CONNECTED_STR => PeerConnectionState::Connected,
            PEER_CONNECTION_STATE_DISCONNECTED_STR => PeerConnectionState::Disconnected,
            PEER_CONNECTION_STATE_FAILED_STR => PeerConnectionState::Failed,
            PEER_CONNECTION_STATE_CLOSED_STR => PeerConnectionState::Closed,
            _ => PeerConnectionState::Unspecified,
        }
    }
}

impl From<u8> for PeerConnectionState {
    fn from(v: u8) -> Self {
        match v {
            1 => PeerConnectionState::New,
            2 => PeerConnectionState::Connecting,
            3 => PeerConnectionState::Connected,
            4 => PeerConnectionState::Disconnected,
            5 => PeerConnectionState::Failed,
            6 => PeerConnectionState::Closed,
            _ => PeerConnectionState::Unspecified,
        }
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            PeerConnectionState::New => PEER_CONNECTION_STATE_NEW_STR,
            PeerConnectionState::Connecting => PEER_CONNECTION_STATE_CONNECTING_STR,
            PeerConnectionState::Connected => PEER_CONNECTION_STATE_CONNECTED_STR,
            PeerConnectionState::Disconnected => PEER_CONNECTION_STATE_DISCONNECTED_STR,
            PeerConnectionState::Failed => PEER_CONNECTION_STATE_FAILED_STR,
            PeerConnectionState::Closed => PEER_CONNECTION_STATE_CLOSED_STR,
            PeerConnectionState::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_signaling_state_round_trip() {
        let tests = vec![
            ("stable", SignalingState::Stable),
            ("have-local-offer", SignalingState::HaveLocalOffer),
            ("have-remote-offer", SignalingState::HaveRemoteOffer),
            ("have-local-pranswer", SignalingState::HaveLocalPranswer),
            ("have-remote-pranswer", SignalingState::HaveRemotePranswer),
            ("closed", SignalingState::Closed),
        ];

        for (s, state) in tests {
            assert_eq!(SignalingState::from(s), state);
            assert_eq!(state.to_string(), s);
        }
    }

    #[test]
    fn test_signaling_state_transitions() {
        let tests = vec![
            (
                "stable->SetLocal(offer)->have-local-offer",
                SignalingState::Stable,
                SignalingState::HaveLocalOffer,
                StateChangeOp::SetLocal,
                SdpType::Offer,
                None,
            ),
            (
                "stable->SetRemote(offer)->have-remote-offer",
                SignalingState::Stable,
                SignalingState::HaveRemoteOffer,
                StateChangeOp::SetRemote,
                SdpType::Offer,
                None,
            ),
            (
                "have-local-offer->SetRemote(answer)->stable",
                SignalingState::HaveLocalOffer,
                SignalingState::Stable,
                StateChangeOp::SetRemote,
                SdpType::Answer,
                None,
            ),
            (
                "have-local-offer->SetRemote(pranswer)->have-remote-pranswer",
                SignalingState::HaveLocalOffer,
                SignalingState::HaveRemotePranswer,
                StateChangeOp::SetRemote,
                SdpType::Pranswer,
                None,
            ),
            (
                "have-remote-pranswer->SetRemote(answer)->stable",
                SignalingState::HaveRemotePranswer,
                SignalingState::Stable,
                StateChangeOp::SetRemote,
                SdpType::Answer,
                None,
            ),
            (
                "have-remote-offer->SetLocal(answer)->stable",
                SignalingState::HaveRemoteOffer,
                SignalingState::Stable,
                StateChangeOp::SetLocal,
                SdpType::Answer,
                None,
            ),
            (
                "have-remote-offer->SetLocal(pranswer)->have-local-pranswer",
                SignalingState::HaveRemoteOffer,
                SignalingState::HaveLocalPranswer,
                StateChangeOp::SetLocal,
                SdpType::Pranswer,
                None,
            ),
            (
                "have-local-pranswer->SetLocal(answer)->stable",
                SignalingState::HaveLocalPranswer,
                SignalingState::Stable,
                StateChangeOp::SetLocal,
                SdpType::Answer,
                None,
            ),
            (
                "stable->SetRemote(rollback)->stable",
                SignalingState::Stable,
                SignalingState::Stable,
                StateChangeOp::SetRemote,
                SdpType::Rollback,
                None,
            ),
            (
                "have-local-offer->SetLocal(rollback)->stable",
                SignalingState::HaveLocalOffer,
                SignalingState::Stable,
                StateChangeOp::SetLocal,
                SdpType::Rollback,
                None,
            ),
            (
                "have-remote-offer->SetRemote(rollback)->stable",
                SignalingState::HaveRemoteOffer,
                SignalingState::Stable,
                StateChangeOp::SetRemote,
                SdpType::Rollback,
                None,
            ),
            (
                "(invalid) stable->SetRemote(pranswer)->have-remote-pranswer",
                SignalingState::Stable,
                SignalingState::HaveRemotePranswer,
                StateChangeOp::SetRemote,
                SdpType::Pranswer,
                Some(Error::ErrSignalingStateProposedTransitionInvalid {
                    from: SignalingState::Stable,
                    applying: SdpType::Pranswer,
                    is_local: false,
                }),
            ),
            (
                "(invalid) closed->SetRemote(rollback)->stable",
                SignalingState::Closed,
                SignalingState::Stable,
                StateChangeOp::SetRemote,
                SdpType::Rollback,
                Some(Error::ErrSignalingStateProposedTransitionInvalid {
                    from: SignalingState::Closed,
                    applying: SdpType::Rollback,
                    is_local: false,
                }),
            ),
        ];

        for (desc, cur, next, op, sdp_type, expected_err) in tests {
            let result = check_next_signaling_state(cur, next, op, sdp_type);
            match (&result, &expected_err) {
                (Ok(got), None) => assert_eq!(*got, next, "{desc} state mismatch"),
                (Err(got), Some(want)) => {
                    assert_eq!(got.to_string(), want.to_string(), "{desc} error mismatch")
                }
                _ => panic!("{desc}: expected {expected_err:?}, got {result:?}"),
            }
        }
    }

    #[test]
    fn test_peer_connection_state_round_trip() {
        let tests = vec![
            ("new", PeerConnectionState::New),
            ("connecting", PeerConnectionState::Connecting),
            ("connected", PeerConnectionState::Connected),
            ("disconnected", PeerConnectionState::Disconnected),
            ("failed", PeerConnectionState::Failed),
            ("closed", PeerConnectionState::Closed),
        ];

        for (s, state) in tests {
            assert_eq!(PeerConnectionState::from(s), state);
            assert_eq!(state.to_string(), s);
            assert_eq!(PeerConnectionState::from(state as u8), state);
        }
    }
}
