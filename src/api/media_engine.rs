use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use sdp::description::session::SessionDescription as ParsedSdp;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::peer::sdp::{codecs_from_media_description, rtp_extensions_from_media_description};
use crate::transceiver::codecs::{
    codec_parameters_fuzzy_search, parse_fmtp, CodecMatch, RtcpFeedback, RtpCodecCapability,
    RtpCodecParameters, RtpHeaderExtensionCapability, RtpHeaderExtensionParameters, RtpParameters,
};
use crate::transceiver::{
    have_direction_intersection, MediaKind, PayloadType, RtpTransceiverDirection,
};

/// H264 MIME type. Matching is case insensitive.
pub const MIME_TYPE_H264: &str = "video/H264";
/// VP8 MIME type. Matching is case insensitive.
pub const MIME_TYPE_VP8: &str = "video/VP8";
/// VP9 MIME type. Matching is case insensitive.
pub const MIME_TYPE_VP9: &str = "video/VP9";
/// Opus MIME type. Matching is case insensitive.
pub const MIME_TYPE_OPUS: &str = "audio/opus";
/// G722 MIME type. Matching is case insensitive.
pub const MIME_TYPE_G722: &str = "audio/G722";
/// PCMU MIME type. Matching is case insensitive.
pub const MIME_TYPE_PCMU: &str = "audio/PCMU";
/// PCMA MIME type. Matching is case insensitive.
pub const MIME_TYPE_PCMA: &str = "audio/PCMA";

#[derive(Default, Clone)]
pub(crate) struct MediaEngineHeaderExtension {
    pub(crate) uri: String,
    pub(crate) is_audio: bool,
    pub(crate) is_video: bool,
    /// When non-empty, only transceivers of these directions may use the
    /// extension.
    pub(crate) allowed_directions: Vec<RtpTransceiverDirection>,
}

/// MediaEngine is the registry of codecs and header extensions one
/// connection may negotiate, plus the state of what actually got
/// negotiated. Engines must not be shared between connections.
#[derive(Default)]
pub struct MediaEngine {
    // Whether a codec type has been part of a negotiation yet.
    pub(crate) negotiated_video: AtomicBool,
    pub(crate) negotiated_audio: AtomicBool,

    pub(crate) video_codecs: Vec<RtpCodecParameters>,
    pub(crate) audio_codecs: Vec<RtpCodecParameters>,
    pub(crate) negotiated_video_codecs: Mutex<Vec<RtpCodecParameters>>,
    pub(crate) negotiated_audio_codecs: Mutex<Vec<RtpCodecParameters>>,

    pub(crate) header_extensions: Vec<MediaEngineHeaderExtension>,
    pub(crate) negotiated_header_extensions: Mutex<HashMap<isize, MediaEngineHeaderExtension>>,
}

impl MediaEngine {
    /// register_default_codecs installs the baseline audio and video
    /// codecs of this crate. Not safe for concurrent use.
    pub fn register_default_codecs(&mut self) -> Result<()> {
        for codec in [
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
            },
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: MIME_TYPE_G722.to_owned(),
                    clock_rate: 8000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                payload_type: 9,
            },
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: MIME_TYPE_PCMU.to_owned(),
                    clock_rate: 8000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                payload_type: 0,
            },
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: MIME_TYPE_PCMA.to_owned(),
                    clock_rate: 8000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                payload_type: 8,
            },
        ] {
            self.register_codec(codec, MediaKind::Audio)?;
        }

        let video_rtcp_feedback = vec![
            RtcpFeedback {
                typ: "goog-remb".to_owned(),
                parameter: String::new(),
            },
            RtcpFeedback {
                typ: "ccm".to_owned(),
                parameter: "fir".to_owned(),
            },
            RtcpFeedback {
                typ: "nack".to_owned(),
                parameter: String::new(),
            },
            RtcpFeedback {
                typ: "nack".to_owned(),
                parameter: "pli".to_owned(),
            },
        ];

        for codec in [
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: video_rtcp_feedback.clone(),
                },
                payload_type: 96,
            },
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: "video/rtx".to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "apt=96".to_owned(),
                    rtcp_feedback: vec![],
                },
                payload_type: 97,
            },
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: MIME_TYPE_VP9.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "profile-id=0".to_owned(),
                    rtcp_feedback: video_rtcp_feedback.clone(),
                },
                payload_type: 98,
            },
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: "video/rtx".to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "apt=98".to_owned(),
                    rtcp_feedback: vec![],
                },
                payload_type: 99,
            },
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: MIME_TYPE_VP9.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "profile-id=1".to_owned(),
                    rtcp_feedback: video_rtcp_feedback.clone(),
                },
                payload_type: 100,
            },
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: "video/rtx".to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "apt=100".to_owned(),
                    rtcp_feedback: vec![],
                },
                payload_type: 101,
            },
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: MIME_TYPE_H264.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line:
                        "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f"
                            .to_owned(),
                    rtcp_feedback: video_rtcp_feedback.clone(),
                },
                payload_type: 102,
            },
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: "video/rtx".to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "apt=102".to_owned(),
                    rtcp_feedback: vec![],
                },
                payload_type: 121,
            },
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: MIME_TYPE_H264.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line:
                        "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                            .to_owned(),
                    rtcp_feedback: video_rtcp_feedback,
                },
                payload_type: 125,
            },
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: "video/rtx".to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "apt=125".to_owned(),
                    rtcp_feedback: vec![],
                },
                payload_type: 107,
            },
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: "video/ulpfec".to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                payload_type: 116,
            },
        ] {
            self.register_codec(codec, MediaKind::Video)?;
        }

        Ok(())
    }

    /// add_codec appends codec unless an equivalent entry already exists.
    fn add_codec(codecs: &mut Vec<RtpCodecParameters>, codec: RtpCodecParameters) {
        for c in codecs.iter() {
            if c.capability.mime_type == codec.capability.mime_type
                && c.payload_type == codec.payload_type
            {
                return;
            }
        }
        codecs.push(codec);
    }

    /// register_codec makes a codec available to this connection. Not safe
    /// for concurrent use.
    pub fn register_codec(&mut self, codec: RtpCodecParameters, kind: MediaKind) -> Result<()> {
        match kind {
            MediaKind::Audio => {
                MediaEngine::add_codec(&mut self.audio_codecs, codec);
                Ok(())
            }
            MediaKind::Video => {
                MediaEngine::add_codec(&mut self.video_codecs, codec);
                Ok(())
            }
            _ => Err(Error::ErrCodecNotFound),
        }
    }

    /// register_header_extension offers a header extension. The negotiated
    /// id becomes visible through get_header_extension_id after signaling.
    pub async fn register_header_extension(
        &mut self,
        extension: RtpHeaderExtensionCapability,
        kind: MediaKind,
        mut allowed_directions: Vec<RtpTransceiverDirection>,
    ) -> Result<()> {
        if allowed_directions.is_empty() {
            allowed_directions = vec![
                RtpTransceiverDirection::Recvonly,
                RtpTransceiverDirection::Sendonly,
            ];
        }

        for direction in &allowed_directions {
            if *direction != RtpTransceiverDirection::Recvonly
                && *direction != RtpTransceiverDirection::Sendonly
            {
                return Err(Error::ErrRegisterHeaderExtensionInvalidDirection);
            }
        }

        let mut extension_index = None;
        for (i, ext) in self.header_extensions.iter().enumerate() {
            if extension.uri == ext.uri {
                extension_index = Some(i);
            }
        }

        if extension_index.is_none() {
            self.header_extensions
                .push(MediaEngineHeaderExtension::default());
            extension_index = Some(self.header_extensions.len() - 1);
        }

        if let Some(i) = extension_index {
            if kind == MediaKind::Audio {
                self.header_extensions[i].is_audio = true;
            } else if kind == MediaKind::Video {
                self.header_extensions[i].is_video = true;
            }

            self.header_extensions[i].uri = extension.uri;
            self.header_extensions[i].allowed_directions = allowed_directions;
        }

        Ok(())
    }

    /// register_feedback attaches an RTCP feedback mechanism to every
    /// already registered codec of the kind.
    pub fn register_feedback(&mut self, feedback: RtcpFeedback, kind: MediaKind) {
        match kind {
            MediaKind::Video => {
                for v in &mut self.video_codecs {
                    v.capability.rtcp_feedback.push(feedback.clone());
                }
            }
            MediaKind::Audio => {
                for a in &mut self.audio_codecs {
                    a.capability.rtcp_feedback.push(feedback.clone());
                }
            }
            _ => {}
        }
    }

    /// get_header_extension_id returns the negotiated id for an extension
    /// plus per-kind availability; (0, false, false) when not negotiated.
    pub(crate) async fn get_header_extension_id(
        &self,
        extension: RtpHeaderExtensionCapability,
    ) -> (isize, bool, bool) {
        let negotiated_header_extensions = self.negotiated_header_extensions.lock().await;
        if negotiated_header_extensions.is_empty() {
            return (0, false, false);
        }

        for (id, h) in &*negotiated_header_extensions {
            if extension.uri == h.uri {
                return (*id, h.is_audio, h.is_video);
            }
        }

        (0, false, false)
    }

    /// snapshot copies the user-registered state into a fresh engine; the
    /// negotiated state starts over.
    pub(crate) fn snapshot(&self) -> Self {
        MediaEngine {
            video_codecs: self.video_codecs.clone(),
            audio_codecs: self.audio_codecs.clone(),
            header_extensions: self.header_extensions.clone(),
            ..Default::default()
        }
    }

    pub(crate) async fn get_codec_by_payload(
        &self,
        payload_type: PayloadType,
    ) -> Result<(RtpCodecParameters, MediaKind)> {
        {
            let negotiated_video_codecs = self.negotiated_video_codecs.lock().await;
            for codec in &*negotiated_video_codecs {
                if codec.payload_type == payload_type {
                    return Ok((codec.clone(), MediaKind::Video));
                }
            }
        }
        {
            let negotiated_audio_codecs = self.negotiated_audio_codecs.lock().await;
            for codec in &*negotiated_audio_codecs {
                if codec.payload_type == payload_type {
                    return Ok((codec.clone(), MediaKind::Audio));
                }
            }
        }

        Err(Error::ErrCodecNotFound)
    }

    /// match_remote_codec grades a remote codec against the local registry.
    /// RTX codecs additionally need their apt target matched.
    pub(crate) fn match_remote_codec(
        &self,
        remote_codec: &RtpCodecParameters,
        kind: MediaKind,
        exact_matches: &[RtpCodecParameters],
        partial_matches: &[RtpCodecParameters],
    ) -> Result<CodecMatch> {
        let codecs = if kind == MediaKind::Audio {
            &self.audio_codecs
        } else {
            &self.video_codecs
        };

        let remote_fmtp = parse_fmtp(remote_codec.capability.sdp_fmtp_line.as_str());
        if let Some(apt) = remote_fmtp.get("apt") {
            let payload_type = apt.parse::<u8>()?;

            let mut apt_match = CodecMatch::None;
            for codec in exact_matches {
                if codec.payload_type == payload_type {
                    apt_match = CodecMatch::Exact;
                    break;
                }
            }
            if apt_match == CodecMatch::None {
                for codec in partial_matches {
                    if codec.payload_type == payload_type {
                        apt_match = CodecMatch::Partial;
                        break;
                    }
                }
            }
            if apt_match == CodecMatch::None {
                // an apt pointing at nothing we support is skipped, not an error
                return Ok(CodecMatch::None);
            }

            // an rtx codec can never be a better match than its target
            let (_, mut match_type) = codec_parameters_fuzzy_search(remote_codec, codecs);
            if match_type == CodecMatch::Exact && apt_match == CodecMatch::Partial {
                match_type = CodecMatch::Partial;
            }
            return Ok(match_type);
        }

        let (_, match_type) = codec_parameters_fuzzy_search(remote_codec, codecs);
        Ok(match_type)
    }

    /// update_header_extension enables a locally registered extension under
    /// the id the remote assigned.
    pub(crate) async fn update_header_extension(
        &self,
        id: isize,
        extension: &str,
        kind: MediaKind,
    ) -> Result<()> {
        for local_extension in &self.header_extensions {
            if local_extension.uri != extension {
                continue;
            }

            let mut negotiated_header_extensions = self.negotiated_header_extensions.lock().await;
            if let Some(h) = negotiated_header_extensions.get_mut(&id) {
                if local_extension.is_audio && kind == MediaKind::Audio {
                    h.is_audio = true;
                } else if local_extension.is_video && kind == MediaKind::Video {
                    h.is_video = true;
                }
            } else {
                let h = MediaEngineHeaderExtension {
                    uri: extension.to_owned(),
                    is_audio: local_extension.is_audio && kind == MediaKind::Audio,
                    is_video: local_extension.is_video && kind == MediaKind::Video,
                    allowed_directions: local_extension.allowed_directions.clone(),
                };
                negotiated_header_extensions.insert(id, h);
            }
        }
        Ok(())
    }

    pub(crate) async fn push_codecs(&self, codecs: Vec<RtpCodecParameters>, kind: MediaKind) {
        for codec in codecs {
            if kind == MediaKind::Audio {
                let mut negotiated_audio_codecs = self.negotiated_audio_codecs.lock().await;
                MediaEngine::add_codec(&mut negotiated_audio_codecs, codec);
            } else if kind == MediaKind::Video {
                let mut negotiated_video_codecs = self.negotiated_video_codecs.lock().await;
                MediaEngine::add_codec(&mut negotiated_video_codecs, codec);
            }
        }
    }

    /// update_from_remote_description folds the remote's codec payload
    /// types and header extension ids into the negotiated state.
    pub(crate) async fn update_from_remote_description(&self, desc: &ParsedSdp) -> Result<()> {
        for media in &desc.media_descriptions {
            let kind = if !self.negotiated_audio.load(Ordering::SeqCst)
                && media.media_name.media.to_lowercase() == "audio"
            {
                self.negotiated_audio.store(true, Ordering::SeqCst);
                MediaKind::Audio
            } else if !self.negotiated_video.load(Ordering::SeqCst)
                && media.media_name.media.to_lowercase() == "video"
            {
                self.negotiated_video.store(true, Ordering::SeqCst);
                MediaKind::Video
            } else {
                continue;
            };

            let codecs = codecs_from_media_description(media)?;

            let mut exact_matches = vec![];
            let mut partial_matches = vec![];

            for codec in codecs {
                let match_type =
                    self.match_remote_codec(&codec, kind, &exact_matches, &partial_matches)?;

                if match_type == CodecMatch::Exact {
                    exact_matches.push(codec);
                } else if match_type == CodecMatch::Partial {
                    partial_matches.push(codec);
                }
            }

            // exact matches win; partial matches only fill an empty set
            if !exact_matches.is_empty() {
                self.push_codecs(exact_matches, kind).await;
            } else if !partial_matches.is_empty() {
                self.push_codecs(partial_matches, kind).await;
            } else {
                // no overlap, nothing negotiated for this section
                continue;
            }

            let extensions = rtp_extensions_from_media_description(media)?;
            for (extension, id) in extensions {
                self.update_header_extension(id, &extension, kind).await?;
            }
        }

        Ok(())
    }

    pub(crate) async fn get_codecs_by_kind(&self, kind: MediaKind) -> Vec<RtpCodecParameters> {
        if kind == MediaKind::Video {
            if self.negotiated_video.load(Ordering::SeqCst) {
                let negotiated_video_codecs = self.negotiated_video_codecs.lock().await;
                negotiated_video_codecs.clone()
            } else {
                self.video_codecs.clone()
            }
        } else if kind == MediaKind::Audio {
            if self.negotiated_audio.load(Ordering::SeqCst) {
                let negotiated_audio_codecs = self.negotiated_audio_codecs.lock().await;
                negotiated_audio_codecs.clone()
            } else {
                self.audio_codecs.clone()
            }
        } else {
            vec![]
        }
    }

    pub(crate) async fn get_rtp_parameters_by_kind(
        &self,
        kind: MediaKind,
        directions: &[RtpTransceiverDirection],
    ) -> RtpParameters {
        let mut header_extensions = vec![];

        if self.negotiated_video.load(Ordering::SeqCst) && kind == MediaKind::Video
            || self.negotiated_audio.load(Ordering::SeqCst) && kind == MediaKind::Audio
        {
            let negotiated_header_extensions = self.negotiated_header_extensions.lock().await;
            for (id, e) in &*negotiated_header_extensions {
                if have_direction_intersection(&e.allowed_directions, directions)
                    && (e.is_audio && kind == MediaKind::Audio
                        || e.is_video && kind == MediaKind::Video)
                {
                    header_extensions.push(RtpHeaderExtensionParameters {
                        id: *id,
                        uri: e.uri.clone(),
                    });
                }
            }
        } else {
            for (id, e) in self.header_extensions.iter().enumerate() {
                if have_direction_intersection(&e.allowed_directions, directions)
                    && (e.is_audio && kind == MediaKind::Audio
                        || e.is_video && kind == MediaKind::Video)
                {
                    header_extensions.push(RtpHeaderExtensionParameters {
                        id: id as isize + 1,
                        uri: e.uri.clone(),
                    })
                }
            }
        }

        RtpParameters {
            header_extensions,
            codecs: self.get_codecs_by_kind(kind).await,
        }
    }

    pub(crate) async fn get_rtp_parameters_by_payload_type(
        &self,
        payload_type: PayloadType,
    ) -> Result<RtpParameters> {
        let (codec, kind) = self.get_codec_by_payload(payload_type).await?;

        let mut header_extensions = vec![];
        {
            let negotiated_header_extensions = self.negotiated_header_extensions.lock().await;
            for (id, e) in &*negotiated_header_extensions {
                if e.is_audio && kind == MediaKind::Audio || e.is_video && kind == MediaKind::Video
                {
                    header_extensions.push(RtpHeaderExtensionParameters {
                        uri: e.uri.clone(),
                        id: *id,
                    });
                }
            }
        }

        Ok(RtpParameters {
            header_extensions,
            codecs: vec![codec],
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn must_parse(sdp: &str) -> ParsedSdp {
        let mut reader = Cursor::new(sdp.as_bytes());
        ParsedSdp::unmarshal(&mut reader).expect("valid sdp")
    }

    const BASE_SDP: &str = "v=0\r\n\
o=- 4596489990601351948 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n";

    #[tokio::test]
    async fn test_opus_case_insensitive_negotiation() -> Result<()> {
        let sdp = BASE_SDP.to_owned()
            + "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=rtpmap:111 OPUS/48000/2\r\n\
a=fmtp:111 minptime=10; useinbandfec=1\r\n";

        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        m.update_from_remote_description(&must_parse(&sdp)).await?;

        let (codec, kind) = m.get_codec_by_payload(111).await?;
        assert_eq!(kind, MediaKind::Audio);
        assert_eq!(codec.capability.mime_type, MIME_TYPE_OPUS);

        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_codec_is_not_negotiated() -> Result<()> {
        let sdp = BASE_SDP.to_owned()
            + "m=audio 9 UDP/TLS/RTP/SAVPF 112\r\n\
a=rtpmap:112 NOTHING/48000/2\r\n";

        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        m.update_from_remote_description(&must_parse(&sdp)).await?;

        assert_eq!(
            m.get_codec_by_payload(112).await,
            Err(Error::ErrCodecNotFound)
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_remote_payload_types_win() -> Result<()> {
        // the remote moved opus to 122; our negotiated view must follow
        let sdp = BASE_SDP.to_owned()
            + "m=audio 9 UDP/TLS/RTP/SAVPF 122\r\n\
a=rtpmap:122 opus/48000/2\r\n\
a=fmtp:122 minptime=10;useinbandfec=1\r\n";

        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        m.update_from_remote_description(&must_parse(&sdp)).await?;

        let (codec, _) = m.get_codec_by_payload(122).await?;
        assert_eq!(codec.capability.mime_type.to_lowercase(), "audio/opus");
        assert_eq!(
            m.get_codec_by_payload(111).await,
            Err(Error::ErrCodecNotFound)
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_header_extension_id_follows_remote() -> Result<()> {
        let sdp = BASE_SDP.to_owned()
            + "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=extmap:7 urn:ietf:params:rtp-hdrext:sdes:mid\r\n";

        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        m.register_header_extension(
            RtpHeaderExtensionCapability {
                uri: sdp::extmap::SDES_MID_URI.to_owned(),
            },
            MediaKind::Audio,
            vec![],
        )
        .await?;
        m.update_from_remote_description(&must_parse(&sdp)).await?;

        let (id, audio, video) = m
            .get_header_extension_id(RtpHeaderExtensionCapability {
                uri: sdp::extmap::SDES_MID_URI.to_owned(),
            })
            .await;
        assert_eq!(id, 7);
        assert!(audio);
        assert!(!video);

        Ok(())
    }

    #[test]
    fn test_snapshot_resets_negotiated_state() {
        let mut m = MediaEngine::default();
        m.register_default_codecs().expect("codecs");
        m.negotiated_audio.store(true, Ordering::SeqCst);

        let copy = m.snapshot();
        assert!(!copy.negotiated_audio.load(Ordering::SeqCst));
        assert_eq!(copy.audio_codecs.len(), m.audio_codecs.len());
        assert_eq!(copy.video_codecs.len(), m.video_codecs.len());
    }
}
