use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use interceptor::Attributes;
use tokio::sync::Mutex;
use util::Unmarshal;

use crate::api::media_engine::MediaEngine;
use crate::error::{Error, Result};
use crate::track::RTP_PAYLOAD_TYPE_BITMASK;
use crate::transceiver::codecs::{RtpCodecParameters, RtpParameters};
use crate::transceiver::receiver::ReceiverInternal;
use crate::transceiver::{MediaKind, PayloadType, SSRC};

lazy_static! {
    static ref TRACK_REMOTE_UNIQUE_ID: AtomicUsize = AtomicUsize::new(0);
}

#[derive(Default)]
struct TrackRemoteInternal {
    peeked: Option<Bytes>,
    peeked_attributes: Option<Attributes>,
}

/// TrackRemote represents a single inbound source of media.
pub struct TrackRemote {
    tid: usize,

    id: Mutex<String>,
    stream_id: Mutex<String>,

    receive_mtu: usize,
    payload_type: AtomicU8,
    kind: AtomicU8,
    ssrc: AtomicU32,
    codec: Mutex<RtpCodecParameters>,
    pub(crate) params: Mutex<RtpParameters>,
    rid: String,

    media_engine: Arc<MediaEngine>,

    receiver: Option<Weak<ReceiverInternal>>,
    internal: Mutex<TrackRemoteInternal>,
}

impl std::fmt::Debug for TrackRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackRemote")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("payload_type", &self.payload_type)
            .field("kind", &self.kind)
            .field("ssrc", &self.ssrc)
            .field("rid", &self.rid)
            .finish()
    }
}

impl TrackRemote {
    pub(crate) fn new(
        receive_mtu: usize,
        kind: MediaKind,
        ssrc: SSRC,
        rid: String,
        receiver: Weak<ReceiverInternal>,
        media_engine: Arc<MediaEngine>,
    ) -> Self {
        TrackRemote {
            tid: TRACK_REMOTE_UNIQUE_ID.fetch_add(1, Ordering::SeqCst),
            id: Default::default(),
            stream_id: Default::default(),
            receive_mtu,
            payload_type: Default::default(),
            kind: AtomicU8::new(kind as u8),
            ssrc: AtomicU32::new(ssrc),
            codec: Default::default(),
            params: Default::default(),
            rid,
            receiver: Some(receiver),
            media_engine,
            internal: Default::default(),
        }
    }

    pub(crate) fn tid(&self) -> usize {
        self.tid
    }

    /// id identifies the track inside its stream, e.g. "audio" or "video".
    pub async fn id(&self) -> String {
        let id = self.id.lock().await;
        id.clone()
    }

    pub(crate) async fn set_id(&self, s: String) {
        let mut id = self.id.lock().await;
        *id = s;
    }

    /// stream_id is the group this track belongs to, e.g. "webcam".
    pub async fn stream_id(&self) -> String {
        let stream_id = self.stream_id.lock().await;
        stream_id.clone()
    }

    pub(crate) async fn set_stream_id(&self, s: String) {
        let mut stream_id = self.stream_id.lock().await;
        *stream_id = s;
    }

    /// rid is the restriction id of this simulcast layer. Empty for
    /// non-simulcast tracks.
    pub fn rid(&self) -> &str {
        self.rid.as_str()
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type.load(Ordering::SeqCst)
    }

    pub(crate) fn set_payload_type(&self, payload_type: PayloadType) {
        self.payload_type.store(payload_type, Ordering::SeqCst);
    }

    pub fn kind(&self) -> MediaKind {
        self.kind.load(Ordering::SeqCst).into()
    }

    pub(crate) fn set_kind(&self, kind: MediaKind) {
        self.kind.store(kind as u8, Ordering::SeqCst);
    }

    pub fn ssrc(&self) -> SSRC {
        self.ssrc.load(Ordering::SeqCst)
    }

    pub(crate) fn set_ssrc(&self, ssrc: SSRC) {
        self.ssrc.store(ssrc, Ordering::SeqCst);
    }

    /// msid is "stream_id track_id", as written to the SDP.
    pub async fn msid(&self) -> String {
        self.stream_id().await + " " + self.id().await.as_str()
    }

    pub async fn codec(&self) -> RtpCodecParameters {
        let codec = self.codec.lock().await;
        codec.clone()
    }

    pub(crate) async fn set_codec(&self, codec: RtpCodecParameters) {
        let mut c = self.codec.lock().await;
        *c = codec;
    }

    pub async fn params(&self) -> RtpParameters {
        let p = self.params.lock().await;
        p.clone()
    }

    pub(crate) async fn set_params(&self, params: RtpParameters) {
        let mut p = self.params.lock().await;
        *p = params;
    }

    /// read pulls the next RTP payload for this track.
    pub async fn read(&self, b: &mut [u8]) -> Result<(usize, Attributes)> {
        let (peeked, peeked_attributes) = {
            let mut internal = self.internal.lock().await;
            (internal.peeked.take(), internal.peeked_attributes.take())
        };

        if let (Some(data), Some(attributes)) = (peeked, peeked_attributes) {
            // A peeked packet may have been stolen while we did not hold
            // the lock.
            let n = std::cmp::min(b.len(), data.len());
            b[..n].copy_from_slice(&data[..n]);
            self.check_and_update_track(&b[..n]).await?;
            Ok((n, attributes))
        } else {
            let receiver = match &self.receiver {
                Some(receiver) => receiver.upgrade().ok_or(Error::ErrReceiverNil)?,
                None => return Err(Error::ErrReceiverNil),
            };

            let (n, attributes) = receiver.read_rtp(b, self.tid).await?;
            self.check_and_update_track(&b[..n]).await?;
            Ok((n, attributes))
        }
    }

    /// check_and_update_track watches the payload type of every inbound
    /// packet and re-resolves the codec when it changes.
    pub(crate) async fn check_and_update_track(&self, b: &[u8]) -> Result<()> {
        if b.len() < 2 {
            return Err(Error::ErrRtpTooShort);
        }

        let payload_type = b[1] & RTP_PAYLOAD_TYPE_BITMASK;
        if payload_type == self.payload_type() {
            return Ok(());
        }

        let p = self
            .media_engine
            .get_rtp_parameters_by_payload_type(payload_type)
            .await?;

        if let Some(receiver) = &self.receiver {
            if let Some(receiver) = receiver.upgrade() {
                self.kind.store(receiver.kind as u8, Ordering::SeqCst);
            }
        }
        self.payload_type.store(payload_type, Ordering::SeqCst);
        {
            let mut codec = self.codec.lock().await;
            *codec = if let Some(codec) = p.codecs.first() {
                codec.clone()
            } else {
                return Err(Error::ErrCodecNotFound);
            };
        }
        {
            let mut params = self.params.lock().await;
            *params = p;
        }

        Ok(())
    }

    /// read_rtp reads and unmarshals one packet.
    pub async fn read_rtp(&self) -> Result<(rtp::packet::Packet, Attributes)> {
        let mut b = vec![0u8; self.receive_mtu];
        let (n, attributes) = self.read(&mut b).await?;

        let mut buf = &b[..n];
        let r = rtp::packet::Packet::unmarshal(&mut buf)?;
        Ok((r, attributes))
    }

    /// peek reads the next packet without consuming it, so the payload type
    /// of a track can be determined before it is surfaced to the
    /// application.
    pub(crate) async fn peek(&self, b: &mut [u8]) -> Result<(usize, Attributes)> {
        let (n, a) = self.read(b).await?;

        // A racing peek between our read and this lock overwrites the
        // stash; one packet is dropped in that case.
        let mut data = BytesMut::new();
        data.extend(b[..n].to_vec());
        {
            let mut internal = self.internal.lock().await;
            internal.peeked = Some(data.freeze());
            internal.peeked_attributes = Some(a.clone());
        }
        Ok((n, a))
    }
}
