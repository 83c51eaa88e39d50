use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use util::Unmarshal;

use crate::error::{flatten_errs, Error, Result};
use crate::transceiver::codecs::{
    codec_parameters_fuzzy_search, CodecMatch, RtpCodecCapability, RtpCodecParameters,
    RtpHeaderExtensionParameters, RtpParameters,
};
use crate::transceiver::{MediaKind, PayloadType, SSRC};

/// TrackLocalContext is the state a [`TrackLocal`] is bound against: the
/// negotiated parameters, the SSRC to stamp, and the write path into the
/// sender's interceptor chain.
#[derive(Default, Clone)]
pub struct TrackLocalContext {
    pub(crate) id: String,
    pub(crate) params: RtpParameters,
    pub(crate) ssrc: SSRC,
    pub(crate) write_stream: Option<Arc<dyn TrackLocalWriter + Send + Sync>>,
}

impl TrackLocalContext {
    /// codec_parameters are the codecs the peer negotiated, ordered by
    /// preference.
    pub fn codec_parameters(&self) -> &[RtpCodecParameters] {
        &self.params.codecs
    }

    /// header_extensions are the negotiated RTP header extensions.
    pub fn header_extensions(&self) -> &[RtpHeaderExtensionParameters] {
        &self.params.header_extensions
    }

    /// ssrc is the synchronization source the binding must stamp on
    /// outbound packets.
    pub fn ssrc(&self) -> SSRC {
        self.ssrc
    }

    /// write_stream is where bound tracks write RTP.
    pub fn write_stream(&self) -> Option<Arc<dyn TrackLocalWriter + Send + Sync>> {
        self.write_stream.clone()
    }

    /// id is the unique identifier of this binding.
    pub fn id(&self) -> String {
        self.id.clone()
    }
}

/// TrackLocal is an outbound media source. Implementations are bound by the
/// connection once negotiation settles the codec and SSRC.
#[async_trait]
pub trait TrackLocal {
    /// bind is called when the track is attached to a negotiated sender.
    /// It must assert that the negotiated codecs contain one the track can
    /// produce and remember the write stream.
    async fn bind(&self, t: &TrackLocalContext) -> Result<RtpCodecParameters>;

    /// unbind tears the binding down again, e.g. because the sender
    /// stopped.
    async fn unbind(&self, t: &TrackLocalContext) -> Result<()>;

    /// id identifies the track inside its stream, e.g. "audio" or "video".
    fn id(&self) -> &str;

    /// stream_id groups tracks that belong together, e.g. "webcam".
    fn stream_id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn as_any(&self) -> &dyn Any;
}

/// TrackLocalWriter is the sink a bound track writes RTP into.
#[async_trait]
pub trait TrackLocalWriter: fmt::Debug {
    /// write_rtp encrypts and forwards a single RTP packet.
    async fn write_rtp(&self, p: &rtp::packet::Packet) -> Result<usize>;

    /// write parses `b` as one RTP packet and forwards it.
    async fn write(&self, b: &[u8]) -> Result<usize>;
}

/// One active binding of a track to a sender.
pub(crate) struct TrackBinding {
    pub(crate) id: String,
    pub(crate) ssrc: SSRC,
    pub(crate) payload_type: PayloadType,
    pub(crate) write_stream: Option<Arc<dyn TrackLocalWriter + Send + Sync>>,
}

impl fmt::Debug for TrackBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackBinding")
            .field("id", &self.id)
            .field("ssrc", &self.ssrc)
            .field("payload_type", &self.payload_type)
            .finish()
    }
}

/// TrackLocalStaticRTP is a [`TrackLocal`] with a fixed codec that accepts
/// pre-packetized RTP.
#[derive(Debug, Clone)]
pub struct TrackLocalStaticRTP {
    pub(crate) bindings: Arc<Mutex<Vec<TrackBinding>>>,
    codec: RtpCodecCapability,
    id: String,
    stream_id: String,
}

impl TrackLocalStaticRTP {
    pub fn new(codec: RtpCodecCapability, id: String, stream_id: String) -> Self {
        TrackLocalStaticRTP {
            codec,
            bindings: Arc::new(Mutex::new(vec![])),
            id,
            stream_id,
        }
    }

    /// codec returns the fixed codec of this track.
    pub fn codec(&self) -> RtpCodecCapability {
        self.codec.clone()
    }
}

#[async_trait]
impl TrackLocal for TrackLocalStaticRTP {
    async fn bind(&self, t: &TrackLocalContext) -> Result<RtpCodecParameters> {
        let parameters = RtpCodecParameters {
            capability: self.codec.clone(),
            ..Default::default()
        };

        let (codec, match_type) = codec_parameters_fuzzy_search(&parameters, t.codec_parameters());
        if match_type == CodecMatch::None {
            return Err(Error::ErrUnsupportedCodec);
        }

        {
            let mut bindings = self.bindings.lock().await;
            bindings.push(TrackBinding {
                ssrc: t.ssrc(),
                payload_type: codec.payload_type,
                write_stream: t.write_stream(),
                id: t.id(),
            });
        }

        Ok(codec)
    }

    async fn unbind(&self, t: &TrackLocalContext) -> Result<()> {
        let mut bindings = self.bindings.lock().await;
        let idx = bindings.iter().position(|b| b.id == t.id());
        if let Some(idx) = idx {
            bindings.remove(idx);
            Ok(())
        } else {
            Err(Error::ErrUnbindFailed)
        }
    }

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn stream_id(&self) -> &str {
        self.stream_id.as_str()
    }

    fn kind(&self) -> MediaKind {
        if self.codec.mime_type.starts_with("audio/") {
            MediaKind::Audio
        } else if self.codec.mime_type.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Unspecified
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl TrackLocalWriter for TrackLocalStaticRTP {
    /// write_rtp rewrites the packet header for every binding and forwards
    /// it. Bindings that fail do not stop the rest; the error aggregates
    /// the failed ones.
    async fn write_rtp(&self, p: &rtp::packet::Packet) -> Result<usize> {
        let mut n = 0;
        let mut write_errs = vec![];
        let mut pkt = p.clone();

        let bindings = self.bindings.lock().await;
        for b in &*bindings {
            pkt.header.ssrc = b.ssrc;
            pkt.header.payload_type = b.payload_type;
            if let Some(write_stream) = &b.write_stream {
                match write_stream.write_rtp(&pkt).await {
                    Ok(m) => n += m,
                    Err(err) => write_errs.push(err),
                }
            } else {
                write_errs.push(Error::new("track binding has no write stream".to_owned()));
            }
        }

        flatten_errs(write_errs)?;
        Ok(n)
    }

    async fn write(&self, mut b: &[u8]) -> Result<usize> {
        let pkt = rtp::packet::Packet::unmarshal(&mut b)?;
        self.write_rtp(&pkt).await?;
        Ok(b.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::media_engine::MIME_TYPE_VP8;

    #[tokio::test]
    async fn test_static_rtp_track_bind_rejects_unknown_codec() {
        let track = TrackLocalStaticRTP::new(
            RtpCodecCapability {
                mime_type: "video/nonsense".to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video".to_owned(),
            "screen".to_owned(),
        );

        let ctx = TrackLocalContext {
            id: "binding".to_owned(),
            params: RtpParameters {
                codecs: vec![RtpCodecParameters {
                    capability: RtpCodecCapability {
                        mime_type: MIME_TYPE_VP8.to_owned(),
                        clock_rate: 90000,
                        ..Default::default()
                    },
                    payload_type: 96,
                }],
                ..Default::default()
            },
            ssrc: 1234,
            write_stream: None,
        };

        assert_eq!(track.bind(&ctx).await, Err(Error::ErrUnsupportedCodec));
        assert_eq!(track.unbind(&ctx).await, Err(Error::ErrUnbindFailed));
    }

    #[tokio::test]
    async fn test_static_rtp_track_kind_follows_mime() {
        let video = TrackLocalStaticRTP::new(
            RtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "v".to_owned(),
            "s".to_owned(),
        );
        assert_eq!(video.kind(), MediaKind::Video);
    }
}
