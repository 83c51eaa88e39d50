use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::api::media_engine::{
    MIME_TYPE_G722, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_PCMA, MIME_TYPE_PCMU, MIME_TYPE_VP8,
    MIME_TYPE_VP9,
};
use crate::error::{Error, Result};
use crate::transceiver::PayloadType;

/// RtcpFeedback signals the connection to use additional RTCP packet types.
///
/// <https://draft.ortc.org/#dom-rtcrtcpfeedback>
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RtcpFeedback {
    /// Type of feedback. Valid: ack, ccm, nack, goog-remb, transport-cc.
    pub typ: String,

    /// The parameter depends on the type, e.g. typ="nack" parameter="pli"
    /// requests Picture Loss Indicator packets.
    pub parameter: String,
}

pub const TYPE_RTCP_FB_TRANSPORT_CC: &str = "transport-cc";
pub const TYPE_RTCP_FB_GOOG_REMB: &str = "goog-remb";
pub const TYPE_RTCP_FB_ACK: &str = "ack";
pub const TYPE_RTCP_FB_CCM: &str = "ccm";
pub const TYPE_RTCP_FB_NACK: &str = "nack";

/// RtpCodecCapability describes a codec the endpoint can encode or decode.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RtpCodecCapability {
    pub mime_type: String,
    pub clock_rate: u32,
    /// Audio channel count, 0 for video.
    pub channels: u16,
    pub sdp_fmtp_line: String,
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecCapability {
    /// payloader_for_codec returns the RTP payloader matching this codec's
    /// mime type, used when packetizing raw samples.
    pub fn payloader_for_codec(
        &self,
    ) -> Result<Box<dyn rtp::packetizer::Payloader + Send + Sync>> {
        let mime_type = self.mime_type.to_lowercase();
        if mime_type == MIME_TYPE_H264.to_lowercase() {
            Ok(Box::<rtp::codecs::h264::H264Payloader>::default())
        } else if mime_type == MIME_TYPE_VP8.to_lowercase() {
            Ok(Box::<rtp::codecs::vp8::Vp8Payloader>::default())
        } else if mime_type == MIME_TYPE_VP9.to_lowercase() {
            Ok(Box::<rtp::codecs::vp9::Vp9Payloader>::default())
        } else if mime_type == MIME_TYPE_OPUS.to_lowercase() {
            Ok(Box::<rtp::codecs::opus::OpusPayloader>::default())
        } else if mime_type == MIME_TYPE_PCMU.to_lowercase()
            || mime_type == MIME_TYPE_PCMA.to_lowercase()
            || mime_type == MIME_TYPE_G722.to_lowercase()
        {
            Ok(Box::<rtp::codecs::g7xx::G7xxPayloader>::default())
        } else {
            Err(Error::ErrNoPayloaderForCodec)
        }
    }
}

/// RtpCodecParameters is a codec capability pinned to a payload type, as
/// negotiated in a media section.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RtpCodecParameters {
    pub capability: RtpCodecCapability,
    pub payload_type: PayloadType,
}

/// RtpHeaderExtensionCapability names an RTP header extension by URI.
#[derive(Default, Debug, Clone)]
pub struct RtpHeaderExtensionCapability {
    pub uri: String,
}

/// RtpHeaderExtensionParameters is a header extension with its negotiated
/// numeric id.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpHeaderExtensionParameters {
    pub uri: String,
    pub id: isize,
}

/// RtpParameters bundles the codecs and header extensions in effect for a
/// sender or receiver.
#[derive(Default, Debug, Clone)]
pub struct RtpParameters {
    pub header_extensions: Vec<RtpHeaderExtensionParameters>,
    pub codecs: Vec<RtpCodecParameters>,
}

/// RtpCapabilities describes what a transceiver could negotiate.
#[derive(Default, Debug, Clone)]
pub struct RtpCapabilities {
    pub codecs: Vec<RtpCodecCapability>,
    pub header_extensions: Vec<RtpHeaderExtensionCapability>,
}

/// CodecMatch grades how closely two codec parameter sets agree.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum CodecMatch {
    #[default]
    None = 0,
    /// Same mime type, fmtp not compared or inconsistent.
    Partial = 1,
    /// Same mime type with consistent fmtp.
    Exact = 2,
}

/// codec_parameters_fuzzy_search finds the best match for `needle` in
/// `haystack`, preferring an exact mime+fmtp match over a mime-only one.
pub(crate) fn codec_parameters_fuzzy_search(
    needle: &RtpCodecParameters,
    haystack: &[RtpCodecParameters],
) -> (RtpCodecParameters, CodecMatch) {
    let needle_fmtp = parse_fmtp(&needle.capability.sdp_fmtp_line);

    for c in haystack {
        if c.capability.mime_type.to_uppercase() == needle.capability.mime_type.to_uppercase()
            && fmtp_consist(&needle_fmtp, &parse_fmtp(&c.capability.sdp_fmtp_line))
        {
            return (c.clone(), CodecMatch::Exact);
        }
    }

    for c in haystack {
        if c.capability.mime_type.to_uppercase() == needle.capability.mime_type.to_uppercase() {
            return (c.clone(), CodecMatch::Partial);
        }
    }

    (RtpCodecParameters::default(), CodecMatch::None)
}

pub(crate) type Fmtp = HashMap<String, String>;

/// parse_fmtp splits an fmtp line into key/value parameters.
pub(crate) fn parse_fmtp(line: &str) -> Fmtp {
    let mut f = Fmtp::new();
    for p in line.split(';') {
        let kv: Vec<&str> = p.trim().splitn(2, '=').collect();
        let key = kv[0].to_lowercase();
        let value = if kv.len() > 1 {
            kv[1].to_owned()
        } else {
            String::new()
        };
        f.insert(key, value);
    }
    f
}

/// fmtp_consist reports whether two parameter sets do not contradict each
/// other; parameters present on only one side are ignored.
pub(crate) fn fmtp_consist(a: &Fmtp, b: &Fmtp) -> bool {
    for (k, v) in a {
        if let Some(vb) = b.get(k) {
            if vb.to_uppercase() != v.to_uppercase() {
                return false;
            }
        }
    }
    for (k, v) in b {
        if let Some(va) = a.get(k) {
            if va.to_uppercase() != v.to_uppercase() {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;

    fn params(mime: &str, fmtp: &str) -> RtpCodecParameters {
        RtpCodecParameters {
            capability: RtpCodecCapability {
                mime_type: mime.to_owned(),
                clock_rate: 90000,
                sdp_fmtp_line: fmtp.to_owned(),
                ..Default::default()
            },
            payload_type: 96,
        }
    }

    #[test]
    fn test_parse_fmtp() {
        let f = parse_fmtp(" profile-id=0;  level=3 ");
        assert_eq!(f.get("profile-id").map(String::as_str), Some("0"));
        assert_eq!(f.get("level").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_fmtp_consist() {
        let a = parse_fmtp("key1=v1;key2=v2");
        assert!(fmtp_consist(&a, &parse_fmtp("key1=v1;key2=V2;key3=v3")));
        assert!(!fmtp_consist(&a, &parse_fmtp("key1=v1;key2=other")));
    }

    #[test]
    fn test_codec_fuzzy_search() {
        let haystack = vec![
            params("video/VP9", "profile-id=0"),
            params("video/VP8", ""),
        ];

        let (_, m) = codec_parameters_fuzzy_search(&params("video/vp8", ""), &haystack);
        assert_eq!(m, CodecMatch::Exact);

        let (_, m) =
            codec_parameters_fuzzy_search(&params("video/VP9", "profile-id=1"), &haystack);
        assert_eq!(m, CodecMatch::Partial);

        let (_, m) = codec_parameters_fuzzy_search(&params("video/AV1", ""), &haystack);
        assert_eq!(m, CodecMatch::None);
    }
}
