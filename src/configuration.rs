use std::fmt;

use ice::url::{SchemeType, Url};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;
use crate::error::{Error, Result};

lazy_static! {
    static ref ICE_URL_SCHEME_RE: Regex =
        Regex::new(r"^(stun|stuns|turn|turns):").expect("static pattern");
}

/// IceCredentialType names how a TURN credential is interpreted.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceCredentialType {
    #[default]
    Unspecified,

    /// A long-term username/password pair.
    #[serde(rename = "password")]
    Password,

    /// An OAuth access token.
    #[serde(rename = "oauth")]
    Oauth,
}

impl From<&str> for IceCredentialType {
    fn from(raw: &str) -> Self {
        match raw {
            "password" => IceCredentialType::Password,
            "oauth" => IceCredentialType::Oauth,
            _ => IceCredentialType::Unspecified,
        }
    }
}

impl fmt::Display for IceCredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IceCredentialType::Password => write!(f, "password"),
            IceCredentialType::Oauth => write!(f, "oauth"),
            _ => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}

/// IceServer describes one STUN or TURN server the connection may use.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
    #[serde(default)]
    pub credential_type: IceCredentialType,
}

impl IceServer {
    /// urls parses and validates the configured url strings. TURN urls
    /// must come with credentials.
    pub(crate) fn urls(&self) -> Result<Vec<Url>> {
        let mut urls = vec![];

        for url_str in &self.urls {
            if !ICE_URL_SCHEME_RE.is_match(url_str) {
                return Err(Error::ErrIceServerUrlScheme);
            }

            let mut url = Url::parse_url(url_str)?;

            if url.scheme == SchemeType::Turn || url.scheme == SchemeType::Turns {
                if self.username.is_empty() || self.credential.is_empty() {
                    return Err(Error::ErrNoTurnCredentials);
                }
                url.username = self.username.clone();

                match self.credential_type {
                    IceCredentialType::Password | IceCredentialType::Unspecified => {
                        url.password = self.credential.clone();
                    }
                    IceCredentialType::Oauth => {
                        return Err(Error::ErrTurnCredentials);
                    }
                }
            }

            urls.push(url);
        }

        Ok(urls)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.urls().map(|_| ())
    }
}

/// IceTransportPolicy restricts which candidates get used.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceTransportPolicy {
    /// Every candidate type may be used.
    #[serde(rename = "all")]
    #[default]
    All = 0,

    /// Only media relayed through a TURN server may be used.
    #[serde(rename = "relay")]
    Relay = 1,
}

impl From<&str> for IceTransportPolicy {
    fn from(raw: &str) -> Self {
        match raw {
            "relay" => IceTransportPolicy::Relay,
            _ => IceTransportPolicy::All,
        }
    }
}

impl fmt::Display for IceTransportPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IceTransportPolicy::All => write!(f, "all"),
            IceTransportPolicy::Relay => write!(f, "relay"),
        }
    }
}

/// BundlePolicy steers how media is balanced over transports when the
/// remote is not bundle-aware.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum BundlePolicy {
    #[default]
    Unspecified = 0,

    /// Bundle-aware negotiation, one transport per media type otherwise.
    Balanced = 1,

    /// One transport per media section for maximum compatibility.
    MaxCompat = 2,

    /// A single transport, always.
    MaxBundle = 3,
}

impl From<&str> for BundlePolicy {
    fn from(raw: &str) -> Self {
        match raw {
            "balanced" => BundlePolicy::Balanced,
            "max-compat" => BundlePolicy::MaxCompat,
            "max-bundle" => BundlePolicy::MaxBundle,
            _ => BundlePolicy::Unspecified,
        }
    }
}

impl fmt::Display for BundlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BundlePolicy::Balanced => write!(f, "balanced"),
            BundlePolicy::MaxCompat => write!(f, "max-compat"),
            BundlePolicy::MaxBundle => write!(f, "max-bundle"),
            _ => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}

/// RtcpMuxPolicy: only multiplexed RTP/RTCP is supported, so `require` is
/// the single accepted value.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum RtcpMuxPolicy {
    #[default]
    Require = 0,
}

impl fmt::Display for RtcpMuxPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "require")
    }
}

/// SdpSemantics selects the m-section-per-source convention in generated
/// descriptions.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum SdpSemantics {
    /// One m-section per transceiver (RFC 8829).
    #[default]
    UnifiedPlan = 0,

    /// The legacy convention of one m-section per media type.
    PlanB = 1,

    /// Offer unified-plan, but answer plan-b when the remote offered it.
    UnifiedPlanWithFallback = 2,
}

impl From<&str> for SdpSemantics {
    fn from(raw: &str) -> Self {
        match raw {
            "unified-plan" => SdpSemantics::UnifiedPlan,
            "plan-b" => SdpSemantics::PlanB,
            "unified-plan-with-fallback" => SdpSemantics::UnifiedPlanWithFallback,
            _ => SdpSemantics::UnifiedPlan,
        }
    }
}

impl fmt::Display for SdpSemantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SdpSemantics::UnifiedPlan => write!(f, "unified-plan"),
            SdpSemantics::PlanB => write!(f, "plan-b"),
            SdpSemantics::UnifiedPlanWithFallback => write!(f, "unified-plan-with-fallback"),
        }
    }
}

/// Configuration is the snapshot of options a connection starts from.
#[derive(Default)]
pub struct Configuration {
    /// Servers available to the ICE agent; validated on construction.
    pub ice_servers: Vec<IceServer>,

    /// Candidate restriction policy.
    pub ice_transport_policy: IceTransportPolicy,

    /// Media bundling policy. May not change once a description is set.
    pub bundle_policy: BundlePolicy,

    /// RTP/RTCP multiplexing policy; only `require` exists.
    pub rtcp_mux_policy: RtcpMuxPolicy,

    /// Target peer identity. Immutable once set.
    pub peer_identity: String,

    /// Authentication certificates. An ECDSA P-256 one is generated when
    /// empty. Expired ones are rejected.
    pub certificates: Vec<Certificate>,

    /// How many candidates to pre-gather. Frozen once a local description
    /// exists.
    pub ice_candidate_pool_size: u8,

    /// m-section convention for generated descriptions.
    pub sdp_semantics: SdpSemantics,
}

impl Configuration {
    pub(crate) fn get_ice_servers(&self) -> Vec<IceServer> {
        self.ice_servers.clone()
    }
}

/// OfferOptions tunes create_offer.
#[derive(Default, Debug, Clone)]
pub struct OfferOptions {
    /// Unused placeholder mirroring the W3C dictionary.
    pub voice_activity_detection: bool,

    /// When set the offer carries fresh ICE credentials, restarting
    /// connectivity checks.
    pub ice_restart: bool,
}

/// AnswerOptions tunes create_answer.
#[derive(Default, Debug, Clone)]
pub struct AnswerOptions {
    /// Unused placeholder mirroring the W3C dictionary.
    pub voice_activity_detection: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ice_server_turn_requires_credentials() {
        let server = IceServer {
            urls: vec!["turn:turn.example.org:1902?transport=udp".to_owned()],
            ..Default::default()
        };
        assert_eq!(server.validate(), Err(Error::ErrNoTurnCredentials));

        let server = IceServer {
            urls: vec!["turn:turn.example.org:1902?transport=udp".to_owned()],
            username: "user".to_owned(),
            credential: "pass".to_owned(),
            credential_type: IceCredentialType::Password,
        };
        assert!(server.validate().is_ok());
    }

    #[test]
    fn test_ice_server_rejects_unknown_scheme() {
        let server = IceServer {
            urls: vec!["http://stun.example.org".to_owned()],
            ..Default::default()
        };
        assert_eq!(server.validate(), Err(Error::ErrIceServerUrlScheme));
    }

    #[test]
    fn test_stun_needs_no_credentials() {
        let server = IceServer {
            urls: vec!["stun:stun.l.google.com:19302".to_owned()],
            ..Default::default()
        };
        assert!(server.validate().is_ok());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(BundlePolicy::from("max-bundle"), BundlePolicy::MaxBundle);
        assert_eq!(BundlePolicy::from("balanced"), BundlePolicy::Balanced);
        assert_eq!(
            IceTransportPolicy::from("relay"),
            IceTransportPolicy::Relay
        );
        assert_eq!(IceTransportPolicy::from("all"), IceTransportPolicy::All);
        assert_eq!(SdpSemantics::from("plan-b"), SdpSemantics::PlanB);
        assert_eq!(SdpSemantics::from("plan-b").to_string(), "plan-b");
    }
}
