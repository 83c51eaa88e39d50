use std::fmt;
use std::sync::Arc;

use ice::candidate::candidate_base::CandidateBaseConfig;
use ice::candidate::candidate_host::CandidateHostConfig;
use ice::candidate::candidate_peer_reflexive::CandidatePeerReflexiveConfig;
use ice::candidate::candidate_relay::CandidateRelayConfig;
use ice::candidate::candidate_server_reflexive::CandidateServerReflexiveConfig;
use ice::candidate::{Candidate, CandidateType};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// IceProtocol is the transport protocol of a candidate.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceProtocol {
    #[default]
    Unspecified,

    /// UDP.
    #[serde(rename = "udp")]
    Udp,

    /// TCP.
    #[serde(rename = "tcp")]
    Tcp,
}

const ICE_PROTOCOL_UDP_STR: &str = "udp";
const ICE_PROTOCOL_TCP_STR: &str = "tcp";

impl From<&str> for IceProtocol {
    fn from(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case(ICE_PROTOCOL_UDP_STR) {
            IceProtocol::Udp
        } else if raw.eq_ignore_ascii_case(ICE_PROTOCOL_TCP_STR) {
            IceProtocol::Tcp
        } else {
            IceProtocol::Unspecified
        }
    }
}

impl fmt::Display for IceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IceProtocol::Udp => write!(f, "{ICE_PROTOCOL_UDP_STR}"),
            IceProtocol::Tcp => write!(f, "{ICE_PROTOCOL_TCP_STR}"),
            _ => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}

/// IceCandidateType mirrors RFC 8445's candidate types.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceCandidateType {
    #[default]
    Unspecified,

    #[serde(rename = "host")]
    Host,

    #[serde(rename = "srflx")]
    Srflx,

    #[serde(rename = "prflx")]
    Prflx,

    #[serde(rename = "relay")]
    Relay,
}

const ICE_CANDIDATE_TYPE_HOST_STR: &str = "host";
const ICE_CANDIDATE_TYPE_SRFLX_STR: &str = "srflx";
const ICE_CANDIDATE_TYPE_PRFLX_STR: &str = "prflx";
const ICE_CANDIDATE_TYPE_RELAY_STR: &str = "relay";

impl From<&str> for IceCandidateType {
    fn from(raw: &str) -> Self {
        match raw {
            ICE_CANDIDATE_TYPE_HOST_STR => IceCandidateType::Host,
            ICE_CANDIDATE_TYPE_SRFLX_STR => IceCandidateType::Srflx,
            ICE_CANDIDATE_TYPE_PRFLX_STR => IceCandidateType::Prflx,
            ICE_CANDIDATE_TYPE_RELAY_STR => IceCandidateType::Relay,
            _ => IceCandidateType::Unspecified,
        }
    }
}

impl From<CandidateType> for IceCandidateType {
    fn from(typ: CandidateType) -> Self {
        match typ {
            CandidateType::Host => IceCandidateType::Host,
            CandidateType::ServerReflexive => IceCandidateType::Srflx,
            CandidateType::PeerReflexive => IceCandidateType::Prflx,
            CandidateType::Relay => IceCandidateType::Relay,
            _ => IceCandidateType::Unspecified,
        }
    }
}

impl fmt::Display for IceCandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IceCandidateType::Host => write!(f, "{ICE_CANDIDATE_TYPE_HOST_STR}"),
            IceCandidateType::Srflx => write!(f, "{ICE_CANDIDATE_TYPE_SRFLX_STR}"),
            IceCandidateType::Prflx => write!(f, "{ICE_CANDIDATE_TYPE_PRFLX_STR}"),
            IceCandidateType::Relay => write!(f, "{ICE_CANDIDATE_TYPE_RELAY_STR}"),
            _ => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}

/// IceCandidate is the exchangeable view of one ICE candidate.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub stats_id: String,
    pub foundation: String,
    pub priority: u32,
    pub address: String,
    pub protocol: IceProtocol,
    pub port: u16,
    pub typ: IceCandidateType,
    pub component: u16,
    pub related_address: String,
    pub related_port: u16,
    pub tcp_type: String,
}

pub(crate) fn ice_candidates_from_agent(
    candidates: &[Arc<dyn Candidate + Send + Sync>],
) -> Vec<IceCandidate> {
    candidates.iter().map(|c| c.into()).collect()
}

impl From<&Arc<dyn Candidate + Send + Sync>> for IceCandidate {
    fn from(c: &Arc<dyn Candidate + Send + Sync>) -> Self {
        let typ: IceCandidateType = c.candidate_type().into();
        let protocol = IceProtocol::from(c.network_type().network_short().as_str());
        let (related_address, related_port) = if let Some(ra) = c.related_address() {
            (ra.address, ra.port)
        } else {
            (String::new(), 0)
        };

        IceCandidate {
            stats_id: c.id(),
            foundation: c.foundation(),
            priority: c.priority(),
            address: c.address(),
            protocol,
            port: c.port(),
            component: c.component(),
            typ,
            tcp_type: c.tcp_type().to_string(),
            related_address,
            related_port,
        }
    }
}

impl IceCandidate {
    /// to_ice rebuilds the agent-level candidate this description names.
    pub(crate) fn to_ice(&self) -> Result<impl Candidate> {
        let candidate_id = self.stats_id.clone();
        let base_config = CandidateBaseConfig {
            candidate_id,
            network: self.protocol.to_string(),
            address: self.address.clone(),
            port: self.port,
            component: self.component,
            foundation: self.foundation.clone(),
            priority: self.priority,
            ..Default::default()
        };

        let c = match self.typ {
            IceCandidateType::Host => {
                let config = CandidateHostConfig {
                    base_config,
                    ..Default::default()
                };
                config.new_candidate_host()?
            }
            IceCandidateType::Srflx => {
                let config = CandidateServerReflexiveConfig {
                    base_config,
                    rel_addr: self.related_address.clone(),
                    rel_port: self.related_port,
                };
                config.new_candidate_server_reflexive()?
            }
            IceCandidateType::Prflx => {
                let config = CandidatePeerReflexiveConfig {
                    base_config,
                    rel_addr: self.related_address.clone(),
                    rel_port: self.related_port,
                };
                config.new_candidate_peer_reflexive()?
            }
            IceCandidateType::Relay => {
                let config = CandidateRelayConfig {
                    base_config,
                    rel_addr: self.related_address.clone(),
                    rel_port: self.related_port,
                    relay_client: None,
                };
                config.new_candidate_relay()?
            }
            _ => return Err(Error::ErrIceCandidateTypeUnknown),
        };

        Ok(c)
    }

    /// to_json renders the candidate in the shape signaling layers
    /// exchange.
    /// <https://w3c.github.io/webrtc-pc/#dom-rtcicecandidate-tojson>
    pub fn to_json(&self) -> Result<IceCandidateInit> {
        let candidate = self.to_ice()?;

        Ok(IceCandidateInit {
            candidate: format!("candidate:{}", candidate.marshal()),
            sdp_mid: Some(String::new()),
            sdp_mline_index: Some(0u16),
            username_fragment: None,
        })
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}:{}{}",
            self.protocol, self.typ, self.address, self.port, self.related_address,
        )
    }
}

/// IceCandidateInit is the JSON wire form of a trickled candidate.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    pub username_fragment: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ice_protocol_round_trip() {
        assert_eq!(IceProtocol::from("udp"), IceProtocol::Udp);
        assert_eq!(IceProtocol::from("TCP"), IceProtocol::Tcp);
        assert_eq!(IceProtocol::from("sctp"), IceProtocol::Unspecified);
        assert_eq!(IceProtocol::Udp.to_string(), "udp");
    }

    #[test]
    fn test_candidate_type_round_trip() {
        for (s, t) in [
            ("host", IceCandidateType::Host),
            ("srflx", IceCandidateType::Srflx),
            ("prflx", IceCandidateType::Prflx),
            ("relay", IceCandidateType::Relay),
        ] {
            assert_eq!(IceCandidateType::from(s), t);
            assert_eq!(t.to_string(), s);
        }
    }

    #[test]
    fn test_candidate_init_json() {
        let init = IceCandidateInit {
            candidate: "candidate:abc123".to_owned(),
            sdp_mid: Some("0".to_owned()),
            sdp_mline_index: Some(0),
            username_fragment: Some("ufrag".to_owned()),
        };

        let json = serde_json::to_string(&init).expect("marshal");
        assert_eq!(
            json,
            r#"{"candidate":"candidate:abc123","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"ufrag"}"#
        );

        let got: IceCandidateInit = serde_json::from_str(&json).expect("unmarshal");
        assert_eq!(got, init);
    }
}
