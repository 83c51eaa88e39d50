use std::fmt;
use std::io::Cursor;

use sdp::description::session::SessionDescription as ParsedSdp;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// SdpType classifies a [`SessionDescription`].
///
/// <https://w3c.github.io/webrtc-pc/#dom-rtcsessiondescription-type>
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum SdpType {
    #[default]
    Unspecified = 0,

    /// The description must be treated as an SDP offer.
    #[serde(rename = "offer")]
    Offer,

    /// A provisional, non-final answer. It may be followed by further
    /// pranswers or by the final answer.
    #[serde(rename = "pranswer")]
    Pranswer,

    /// The final answer; the offer/answer exchange is complete once it is
    /// applied.
    #[serde(rename = "answer")]
    Answer,

    /// Cancels the in-progress negotiation and rolls the endpoint back to
    /// the previous stable state.
    #[serde(rename = "rollback")]
    Rollback,
}

const SDP_TYPE_OFFER_STR: &str = "offer";
const SDP_TYPE_PRANSWER_STR: &str = "pranswer";
const SDP_TYPE_ANSWER_STR: &str = "answer";
const SDP_TYPE_ROLLBACK_STR: &str = "rollback";

impl From<&str> for SdpType {
    fn from(raw: &str) -> Self {
        match raw {
            SDP_TYPE_OFFER_STR => SdpType::Offer,
            SDP_TYPE_PRANSWER_STR => SdpType::Pranswer,
            SDP_TYPE_ANSWER_STR => SdpType::Answer,
            SDP_TYPE_ROLLBACK_STR => SdpType::Rollback,
            _ => SdpType::Unspecified,
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SdpType::Offer => write!(f, "{SDP_TYPE_OFFER_STR}"),
            SdpType::Pranswer => write!(f, "{SDP_TYPE_PRANSWER_STR}"),
            SdpType::Answer => write!(f, "{SDP_TYPE_ANSWER_STR}"),
            SdpType::Rollback => write!(f, "{SDP_TYPE_ROLLBACK_STR}"),
            _ => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}

/// SessionDescription carries one side of the offer/answer exchange.
///
/// The raw `sdp` string is the wire artifact; `parsed` is a derived view
/// that is populated when the description is applied.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    pub sdp: String,

    /// Populated internally when the description is applied, never by
    /// callers.
    #[serde(skip)]
    pub(crate) parsed: Option<ParsedSdp>,
}

impl SessionDescription {
    /// offer wraps raw SDP text as an offer.
    pub fn offer(sdp: String) -> Result<SessionDescription> {
        SessionDescription::new(sdp, SdpType::Offer)
    }

    /// pranswer wraps raw SDP text as a provisional answer.
    pub fn pranswer(sdp: String) -> Result<SessionDescription> {
        SessionDescription::new(sdp, SdpType::Pranswer)
    }

    /// answer wraps raw SDP text as a final answer.
    pub fn answer(sdp: String) -> Result<SessionDescription> {
        SessionDescription::new(sdp, SdpType::Answer)
    }

    fn new(sdp: String, sdp_type: SdpType) -> Result<SessionDescription> {
        let desc = SessionDescription {
            sdp,
            sdp_type,
            parsed: None,
        };

        // The parse is thrown away; it only validates the text early.
        desc.unmarshal()?;

        Ok(desc)
    }

    /// unmarshal parses the raw SDP into a fresh tree.
    pub fn unmarshal(&self) -> Result<ParsedSdp> {
        let mut reader = Cursor::new(self.sdp.as_bytes());
        let parsed = ParsedSdp::unmarshal(&mut reader)?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sdp_type_round_trip() {
        let tests = vec![
            ("Unspecified", SdpType::Unspecified),
            ("offer", SdpType::Offer),
            ("pranswer", SdpType::Pranswer),
            ("answer", SdpType::Answer),
            ("rollback", SdpType::Rollback),
        ];

        for (s, t) in tests {
            assert_eq!(SdpType::from(s), t);
            assert_eq!(t.to_string(), s);
        }
    }

    #[test]
    fn test_session_description_json() {
        let tests = vec![
            (SdpType::Offer, r#"{"type":"offer","sdp":"sdp"}"#),
            (SdpType::Pranswer, r#"{"type":"pranswer","sdp":"sdp"}"#),
            (SdpType::Answer, r#"{"type":"answer","sdp":"sdp"}"#),
            (SdpType::Rollback, r#"{"type":"rollback","sdp":"sdp"}"#),
        ];

        for (sdp_type, expected) in tests {
            let desc = SessionDescription {
                sdp_type,
                sdp: "sdp".to_owned(),
                parsed: None,
            };
            let json = serde_json::to_string(&desc).expect("marshal");
            assert_eq!(json, expected);

            let got: SessionDescription = serde_json::from_str(&json).expect("unmarshal");
            assert_eq!(got.sdp_type, sdp_type);
            assert_eq!(got.sdp, desc.sdp);
        }
    }

    #[test]
    fn test_session_description_rejects_garbage() {
        assert!(SessionDescription::offer("not sdp".to_owned()).is_err());
    }
}
