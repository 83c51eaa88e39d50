pub mod codecs;
pub mod receiver;
pub mod sender;
pub(crate) mod srtp_writer;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use interceptor::stream_info::{RTPHeaderExtension, StreamInfo};
use interceptor::Attributes;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use util::Unmarshal;

use crate::api::media_engine::MediaEngine;
use crate::error::{Error, Result};
use crate::track::local::TrackLocal;
use crate::transceiver::codecs::{
    codec_parameters_fuzzy_search, CodecMatch, RtpCodecParameters,
    RtpHeaderExtensionParameters,
};
use crate::transceiver::receiver::{ReceiverInternal, RtpReceiver};
use crate::transceiver::sender::RtpSender;

/// SSRC identifies a single synchronization source, i.e. one stream of RTP
/// packets. <https://tools.ietf.org/html/rfc3550#section-3>
#[allow(clippy::upper_case_acronyms)]
pub type SSRC = u32;

/// PayloadType identifies the format of the RTP payload.
/// <https://tools.ietf.org/html/rfc3550#section-3>
pub type PayloadType = u8;

/// MediaKind distinguishes the two track types a transceiver can carry.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum MediaKind {
    #[default]
    Unspecified = 0,
    Audio,
    Video,
}

const MEDIA_KIND_AUDIO_STR: &str = "audio";
const MEDIA_KIND_VIDEO_STR: &str = "video";

impl From<&str> for MediaKind {
    fn from(raw: &str) -> Self {
        match raw {
            MEDIA_KIND_AUDIO_STR => MediaKind::Audio,
            MEDIA_KIND_VIDEO_STR => MediaKind::Video,
            _ => MediaKind::Unspecified,
        }
    }
}

impl From<u8> for MediaKind {
    fn from(v: u8) -> Self {
        match v {
            1 => MediaKind::Audio,
            2 => MediaKind::Video,
            _ => MediaKind::Unspecified,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MediaKind::Audio => write!(f, "{MEDIA_KIND_AUDIO_STR}"),
            MediaKind::Video => write!(f, "{MEDIA_KIND_VIDEO_STR}"),
            _ => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}

/// RtpTransceiverDirection is the direction attribute of a transceiver.
///
/// <https://w3c.github.io/webrtc-pc/#dom-rtcrtptransceiverdirection>
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum RtpTransceiverDirection {
    #[default]
    Unspecified = 0,
    Sendrecv,
    Sendonly,
    Recvonly,
    Inactive,
}

const DIRECTION_SENDRECV_STR: &str = "sendrecv";
const DIRECTION_SENDONLY_STR: &str = "sendonly";
const DIRECTION_RECVONLY_STR: &str = "recvonly";
const DIRECTION_INACTIVE_STR: &str = "inactive";

impl From<&str> for RtpTransceiverDirection {
    fn from(raw: &str) -> Self {
        match raw {
            DIRECTION_SENDRECV_STR => RtpTransceiverDirection::Sendrecv,
            DIRECTION_SENDONLY_STR => RtpTransceiverDirection::Sendonly,
            DIRECTION_RECVONLY_STR => RtpTransceiverDirection::Recvonly,
            DIRECTION_INACTIVE_STR => RtpTransceiverDirection::Inactive,
            _ => RtpTransceiverDirection::Unspecified,
        }
    }
}

impl From<u8> for RtpTransceiverDirection {
    fn from(v: u8) -> Self {
        match v {
            1 => RtpTransceiverDirection::Sendrecv,
            2 => RtpTransceiverDirection::Sendonly,
            3 => RtpTransceiverDirection::Recvonly,
            4 => RtpTransceiverDirection::Inactive,
            _ => RtpTransceiverDirection::Unspecified,
        }
    }
}

impl fmt::Display for RtpTransceiverDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RtpTransceiverDirection::Sendrecv => write!(f, "{DIRECTION_SENDRECV_STR}"),
            RtpTransceiverDirection::Sendonly => write!(f, "{DIRECTION_SENDONLY_STR}"),
            RtpTransceiverDirection::Recvonly => write!(f, "{DIRECTION_RECVONLY_STR}"),
            RtpTransceiverDirection::Inactive => write!(f, "{DIRECTION_INACTIVE_STR}"),
            _ => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}

impl RtpTransceiverDirection {
    /// reverse maps the direction into the one the remote peer sees.
    pub fn reverse(&self) -> RtpTransceiverDirection {
        match *self {
            RtpTransceiverDirection::Sendonly => RtpTransceiverDirection::Recvonly,
            RtpTransceiverDirection::Recvonly => RtpTransceiverDirection::Sendonly,
            _ => *self,
        }
    }
}

pub(crate) fn have_direction_intersection(
    haystack: &[RtpTransceiverDirection],
    needle: &[RtpTransceiverDirection],
) -> bool {
    haystack.iter().any(|h| needle.contains(h))
}

/// RtpRtxParameters holds retransmission settings for one encoding.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct RtpRtxParameters {
    pub ssrc: SSRC,
}

/// RtpCodingParameters describes one encoding (or decoding) of a track:
/// its rid, SSRC, payload type and optional repair streams.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct RtpCodingParameters {
    pub rid: String,
    pub ssrc: SSRC,
    pub payload_type: PayloadType,
    pub rtx: RtpRtxParameters,
}

pub type RtpDecodingParameters = RtpCodingParameters;
pub type RtpEncodingParameters = RtpCodingParameters;

/// RtpReceiveParameters configures a receiver's inbound encodings.
#[derive(Debug)]
pub struct RtpReceiveParameters {
    pub encodings: Vec<RtpDecodingParameters>,
}

/// RtpSendParameters configures a sender's outbound encodings.
#[derive(Debug)]
pub struct RtpSendParameters {
    pub rtp_parameters: codecs::RtpParameters,
    pub encodings: Vec<RtpEncodingParameters>,
}

/// RtpTransceiverInit configures a transceiver created through
/// `add_transceiver_from_kind` or `add_transceiver_from_track`.
pub struct RtpTransceiverInit {
    pub direction: RtpTransceiverDirection,
    pub send_encodings: Vec<RtpEncodingParameters>,
}

pub(crate) fn create_stream_info(
    id: String,
    ssrc: SSRC,
    payload_type: PayloadType,
    codec: codecs::RtpCodecCapability,
    header_extensions: &[RtpHeaderExtensionParameters],
) -> StreamInfo {
    let rtp_header_extensions: Vec<RTPHeaderExtension> = header_extensions
        .iter()
        .map(|h| RTPHeaderExtension {
            id: h.id,
            uri: h.uri.clone(),
        })
        .collect();

    let feedbacks: Vec<interceptor::stream_info::RTCPFeedback> = codec
        .rtcp_feedback
        .iter()
        .map(|f| interceptor::stream_info::RTCPFeedback {
            typ: f.typ.clone(),
            parameter: f.parameter.clone(),
        })
        .collect();

    StreamInfo {
        id,
        attributes: Attributes::new(),
        ssrc,
        payload_type,
        rtp_header_extensions,
        mime_type: codec.mime_type,
        clock_rate: codec.clock_rate,
        channels: codec.channels,
        sdp_fmtp_line: codec.sdp_fmtp_line,
        rtcp_feedback: feedbacks,
    }
}

/// RtpTransceiver pairs an optional sender and receiver under a common mid
/// and direction.
pub struct RtpTransceiver {
    mid: Mutex<String>,
    sender: Mutex<Option<Arc<RtpSender>>>,
    receiver: Mutex<Option<Arc<RtpReceiver>>>,
    direction: AtomicU8,
    /// The direction that was last negotiated, unspecified until an answer
    /// has been applied.
    current_direction: AtomicU8,

    /// Preference override installed via set_codec_preferences.
    codecs: Arc<Mutex<Vec<RtpCodecParameters>>>,

    pub(crate) stopped: AtomicBool,
    pub(crate) kind: MediaKind,

    media_engine: Arc<MediaEngine>,
}

impl RtpTransceiver {
    pub(crate) async fn new(
        receiver: Option<Arc<RtpReceiver>>,
        sender: Option<Arc<RtpSender>>,
        direction: RtpTransceiverDirection,
        kind: MediaKind,
        codecs: Vec<RtpCodecParameters>,
        media_engine: Arc<MediaEngine>,
    ) -> Arc<Self> {
        let t = Arc::new(RtpTransceiver {
            mid: Mutex::new(String::new()),
            sender: Mutex::new(None),
            receiver: Mutex::new(None),
            direction: AtomicU8::new(direction as u8),
            current_direction: AtomicU8::new(RtpTransceiverDirection::Unspecified as u8),
            codecs: Arc::new(Mutex::new(codecs)),
            stopped: AtomicBool::new(false),
            kind,
            media_engine,
        });

        t.set_receiver(receiver).await;
        t.set_sender(sender).await;

        t
    }

    /// set_codec_preferences overrides the codecs this transceiver offers.
    /// An empty list resets to the media engine defaults.
    pub async fn set_codec_preferences(&self, codecs: Vec<RtpCodecParameters>) -> Result<()> {
        for codec in &codecs {
            let engine_codecs = self.media_engine.get_codecs_by_kind(self.kind).await;
            let (_, match_type) = codec_parameters_fuzzy_search(codec, &engine_codecs);
            if match_type == CodecMatch::None {
                return Err(Error::ErrTransceiverCodecUnsupported);
            }
        }

        {
            let mut c = self.codecs.lock().await;
            *c = codecs;
        }
        Ok(())
    }

    /// get_codecs returns the effective codec list: the preference override
    /// filtered against the media engine, or the engine defaults.
    pub(crate) async fn get_codecs(&self) -> Vec<RtpCodecParameters> {
        let codecs = self.codecs.lock().await;
        ReceiverInternal::filter_codecs(&codecs, self.kind, &self.media_engine).await
    }

    pub async fn sender(&self) -> Option<Arc<RtpSender>> {
        let sender = self.sender.lock().await;
        sender.clone()
    }

    pub(crate) async fn set_sender_track(
        self: &Arc<Self>,
        sender: Option<Arc<RtpSender>>,
        track: Option<Arc<dyn TrackLocal + Send + Sync>>,
    ) -> Result<()> {
        self.set_sender(sender).await;
        self.set_sending_track(track).await
    }

    pub(crate) async fn set_sender(self: &Arc<Self>, s: Option<Arc<RtpSender>>) {
        if let Some(sender) = &s {
            sender.set_transceiver(Some(Arc::downgrade(self))).await;
        }

        if let Some(prev) = self.sender().await {
            prev.set_transceiver(None).await;
        }

        let mut sender = self.sender.lock().await;
        *sender = s;
    }

    pub async fn receiver(&self) -> Option<Arc<RtpReceiver>> {
        let receiver = self.receiver.lock().await;
        receiver.clone()
    }

    pub(crate) async fn set_receiver(&self, r: Option<Arc<RtpReceiver>>) {
        if let Some(receiver) = &r {
            receiver
                .set_transceiver_codecs(Some(Arc::clone(&self.codecs)))
                .await;
        }

        let mut receiver = self.receiver.lock().await;
        if let Some(prev) = &*receiver {
            prev.set_transceiver_codecs(None).await;
        }
        *receiver = r;
    }

    /// set_mid assigns the mid. A mid may only be assigned once.
    pub(crate) async fn set_mid(&self, mid: String) -> Result<()> {
        let mut m = self.mid.lock().await;
        if !m.is_empty() {
            return Err(Error::ErrTransceiverCannotChangeMid);
        }
        *m = mid;
        Ok(())
    }

    /// mid returns the mid, or the empty string while unassigned. The mid
    /// is assigned by create_offer/create_answer or an applied remote
    /// description.
    pub async fn mid(&self) -> String {
        let mid = self.mid.lock().await;
        mid.clone()
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// direction returns the currently requested direction.
    pub fn direction(&self) -> RtpTransceiverDirection {
        self.direction.load(Ordering::SeqCst).into()
    }

    pub(crate) fn set_direction(&self, d: RtpTransceiverDirection) {
        self.direction.store(d as u8, Ordering::SeqCst);
    }

    /// current_direction returns the direction negotiated by the last
    /// offer/answer exchange that reached stable.
    pub fn current_direction(&self) -> RtpTransceiverDirection {
        self.current_direction.load(Ordering::SeqCst).into()
    }

    pub(crate) fn set_current_direction(&self, d: RtpTransceiverDirection) {
        self.current_direction.store(d as u8, Ordering::SeqCst);
    }

    /// stop irreversibly stops the transceiver and both of its halves.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.stopped.store(true, Ordering::SeqCst);

        {
            let s = self.sender.lock().await;
            if let Some(sender) = &*s {
                sender.stop().await?;
            }
        }
        {
            let r = self.receiver.lock().await;
            if let Some(receiver) = &*r {
                receiver.stop().await?;
            }
        }

        self.set_direction(RtpTransceiverDirection::Inactive);
        Ok(())
    }

    /// set_sending_track swaps the outbound track and adjusts direction to
    /// match the new sending state.
    pub(crate) async fn set_sending_track(
        &self,
        track: Option<Arc<dyn TrackLocal + Send + Sync>>,
    ) -> Result<()> {
        let track_is_none = track.is_none();
        {
            let mut s = self.sender.lock().await;
            if let Some(sender) = &*s {
                sender.replace_track(track).await?;
            }
            if track_is_none {
                *s = None;
            }
        }

        let direction = self.direction();
        if !track_is_none && direction == RtpTransceiverDirection::Recvonly {
            self.set_direction(RtpTransceiverDirection::Sendrecv);
        } else if !track_is_none && direction == RtpTransceiverDirection::Inactive {
            self.set_direction(RtpTransceiverDirection::Sendonly);
        } else if track_is_none && direction == RtpTransceiverDirection::Sendrecv {
            self.set_direction(RtpTransceiverDirection::Recvonly);
        } else if !track_is_none
            && (direction == RtpTransceiverDirection::Sendonly
                || direction == RtpTransceiverDirection::Sendrecv)
        {
            // A sendonly transceiver created by a remote-initiated
            // negotiation keeps its direction when the track is installed.
        } else if track_is_none && direction == RtpTransceiverDirection::Sendonly {
            self.set_direction(RtpTransceiverDirection::Inactive);
        } else {
            return Err(Error::ErrTransceiverSetSendingInvalidState);
        }
        Ok(())
    }
}

/// find_by_mid plucks the transceiver with the given mid out of the list.
pub(crate) async fn find_by_mid(
    mid: &str,
    local_transceivers: &mut Vec<Arc<RtpTransceiver>>,
) -> Option<Arc<RtpTransceiver>> {
    for (i, t) in local_transceivers.iter().enumerate() {
        if t.mid().await == mid {
            return Some(local_transceivers.remove(i));
        }
    }
    None
}

/// satisfy_type_and_direction plucks a transceiver matching the remote
/// kind+direction out of the list, trying the most preferred local
/// direction first.
pub(crate) async fn satisfy_type_and_direction(
    remote_kind: MediaKind,
    remote_direction: RtpTransceiverDirection,
    local_transceivers: &mut Vec<Arc<RtpTransceiver>>,
) -> Option<Arc<RtpTransceiver>> {
    let preferred = match remote_direction {
        RtpTransceiverDirection::Sendrecv => vec![
            RtpTransceiverDirection::Recvonly,
            RtpTransceiverDirection::Sendrecv,
        ],
        RtpTransceiverDirection::Sendonly => vec![RtpTransceiverDirection::Recvonly],
        RtpTransceiverDirection::Recvonly => vec![
            RtpTransceiverDirection::Sendonly,
            RtpTransceiverDirection::Sendrecv,
        ],
        _ => vec![],
    };

    for possible_direction in preferred {
        for (i, t) in local_transceivers.iter().enumerate() {
            if t.mid().await.is_empty()
                && t.kind == remote_kind
                && possible_direction == t.direction()
            {
                return Some(local_transceivers.remove(i));
            }
        }
    }

    None
}

/// handle_unknown_rtp_packet reads the mid/rid/repair-rid header extensions
/// out of a single raw RTP packet, used while probing undeclared SSRCs.
pub(crate) fn handle_unknown_rtp_packet(
    buf: &[u8],
    mid_extension_id: u8,
    sid_extension_id: u8,
    rsid_extension_id: u8,
) -> Result<(String, String, String, PayloadType)> {
    let mut reader = buf;
    let rp = rtp::packet::Packet::unmarshal(&mut reader)?;

    if !rp.header.extension {
        return Ok((String::new(), String::new(), String::new(), 0));
    }

    let payload_type = rp.header.payload_type;

    let mid = if let Some(payload) = rp.header.get_extension(mid_extension_id) {
        String::from_utf8(payload.to_vec())?
    } else {
        String::new()
    };

    let rid = if let Some(payload) = rp.header.get_extension(sid_extension_id) {
        String::from_utf8(payload.to_vec())?
    } else {
        String::new()
    };

    let rsid = if let Some(payload) = rp.header.get_extension(rsid_extension_id) {
        String::from_utf8(payload.to_vec())?
    } else {
        String::new()
    };

    Ok((mid, rid, rsid, payload_type))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_direction_round_trip() {
        let tests = vec![
            ("sendrecv", RtpTransceiverDirection::Sendrecv),
            ("sendonly", RtpTransceiverDirection::Sendonly),
            ("recvonly", RtpTransceiverDirection::Recvonly),
            ("inactive", RtpTransceiverDirection::Inactive),
        ];

        for (s, d) in tests {
            assert_eq!(RtpTransceiverDirection::from(s), d);
            assert_eq!(d.to_string(), s);
            assert_eq!(RtpTransceiverDirection::from(d as u8), d);
        }
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(
            RtpTransceiverDirection::Sendonly.reverse(),
            RtpTransceiverDirection::Recvonly
        );
        assert_eq!(
            RtpTransceiverDirection::Recvonly.reverse(),
            RtpTransceiverDirection::Sendonly
        );
        assert_eq!(
            RtpTransceiverDirection::Sendrecv.reverse(),
            RtpTransceiverDirection::Sendrecv
        );
        assert_eq!(
            RtpTransceiverDirection::Inactive.reverse(),
            RtpTransceiverDirection::Inactive
        );
    }

    #[test]
    fn test_media_kind_round_trip() {
        assert_eq!(MediaKind::from("audio"), MediaKind::Audio);
        assert_eq!(MediaKind::from("video"), MediaKind::Video);
        assert_eq!(MediaKind::from("data"), MediaKind::Unspecified);
        assert_eq!(MediaKind::Audio.to_string(), "audio");
        assert_eq!(MediaKind::Video.to_string(), "video");
    }
}
