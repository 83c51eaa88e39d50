use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use interceptor::stream_info::StreamInfo;
use interceptor::{Attributes, Interceptor, RTCPReader, RTPWriter};
use tokio::sync::{mpsc, Mutex, Notify};
use util::Unmarshal;

use crate::api::media_engine::MediaEngine;
use crate::error::{Error, Result};
use crate::track::local::{TrackLocal, TrackLocalContext, TrackLocalWriter};
use crate::transceiver::create_stream_info;
use crate::transceiver::srtp_writer::SrtpWriter;
use crate::transceiver::{
    MediaKind, PayloadType, RtpEncodingParameters, RtpRtxParameters, RtpSendParameters,
    RtpTransceiver, RtpTransceiverDirection, SSRC,
};
use crate::transport::dtls::DtlsTransport;

pub(crate) struct SenderInternal {
    pub(crate) send_called_rx: Mutex<mpsc::Receiver<()>>,
    pub(crate) stop_called_rx: Arc<Notify>,
    pub(crate) stop_called_signal: Arc<AtomicBool>,
}

/// Adapts the interceptor write path into the [`TrackLocalWriter`] a bound
/// track writes into.
struct InterceptorToTrackLocalWriter {
    interceptor_rtp_writer: Mutex<Option<Arc<dyn RTPWriter + Send + Sync>>>,
}

impl InterceptorToTrackLocalWriter {
    fn new() -> Self {
        InterceptorToTrackLocalWriter {
            interceptor_rtp_writer: Mutex::new(None),
        }
    }
}

impl fmt::Debug for InterceptorToTrackLocalWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorToTrackLocalWriter").finish()
    }
}

#[async_trait]
impl TrackLocalWriter for InterceptorToTrackLocalWriter {
    async fn write_rtp(&self, pkt: &rtp::packet::Packet) -> Result<usize> {
        let writer = {
            let writer = self.interceptor_rtp_writer.lock().await;
            writer.clone()
        };
        if let Some(writer) = writer {
            let a = Attributes::new();
            Ok(writer.write(pkt, &a).await?)
        } else {
            Ok(0)
        }
    }

    async fn write(&self, mut b: &[u8]) -> Result<usize> {
        let pkt = rtp::packet::Packet::unmarshal(&mut b)?;
        self.write_rtp(&pkt).await
    }
}

/// RtpSender carries one outbound track towards the remote peer.
pub struct RtpSender {
    pub(crate) track: Mutex<Option<Arc<dyn TrackLocal + Send + Sync>>>,

    pub(crate) srtp_stream: Arc<SrtpWriter>,
    rtcp_interceptor: Arc<dyn RTCPReader + Send + Sync>,
    stream_info: Mutex<StreamInfo>,

    context: Mutex<TrackLocalContext>,

    pub(crate) transport: Arc<DtlsTransport>,

    pub(crate) payload_type: PayloadType,
    pub(crate) ssrc: SSRC,
    /// SSRC of the retransmission stream, cleared when the remote
    /// negotiated no RTX support.
    rtx_ssrc: AtomicU32,
    /// SSRC of the forward-error-correction stream, cleared when the remote
    /// negotiated no FEC support.
    fec_ssrc: AtomicU32,
    receive_mtu: usize,

    /// Set when the sender appears in a generated description.
    negotiated: AtomicBool,

    pub(crate) media_engine: Arc<MediaEngine>,
    interceptor: Arc<dyn Interceptor + Send + Sync>,

    pub(crate) id: String,

    transceiver: Mutex<Option<Weak<RtpTransceiver>>>,

    send_called_tx: Mutex<Option<mpsc::Sender<()>>>,
    stop_called_tx: Arc<Notify>,
    stop_called_signal: Arc<AtomicBool>,

    pub(crate) internal: Arc<SenderInternal>,
}

impl RtpSender {
    pub(crate) async fn new(
        receive_mtu: usize,
        track: Arc<dyn TrackLocal + Send + Sync>,
        transport: Arc<DtlsTransport>,
        media_engine: Arc<MediaEngine>,
        interceptor: Arc<dyn Interceptor + Send + Sync>,
    ) -> RtpSender {
        let id = crate::rand_alpha(32);
        let (send_called_tx, send_called_rx) = mpsc::channel(1);
        let stop_called_tx = Arc::new(Notify::new());
        let stop_called_rx = Arc::clone(&stop_called_tx);
        let ssrc = rand::random::<u32>();
        let rtx_ssrc = rand::random::<u32>();
        let stop_called_signal = Arc::new(AtomicBool::new(false));

        let internal = Arc::new(SenderInternal {
            send_called_rx: Mutex::new(send_called_rx),
            stop_called_rx,
            stop_called_signal: Arc::clone(&stop_called_signal),
        });

        let srtp_stream = Arc::new(SrtpWriter {
            closed: AtomicBool::new(false),
            ssrc,
            sender: Arc::downgrade(&internal),
            transport: Arc::clone(&transport),
            rtcp_read_stream: Mutex::new(None),
            rtp_write_session: Mutex::new(None),
        });

        let srtp_rtcp_reader = Arc::clone(&srtp_stream) as Arc<dyn RTCPReader + Send + Sync>;
        let rtcp_interceptor = interceptor.bind_rtcp_reader(srtp_rtcp_reader).await;

        RtpSender {
            track: Mutex::new(Some(track)),
            srtp_stream,
            rtcp_interceptor,
            stream_info: Mutex::new(StreamInfo::default()),
            context: Mutex::new(TrackLocalContext::default()),
            transport,
            payload_type: 0,
            ssrc,
            rtx_ssrc: AtomicU32::new(rtx_ssrc),
            fec_ssrc: AtomicU32::new(0),
            receive_mtu,
            negotiated: AtomicBool::new(false),
            media_engine,
            interceptor,
            id,
            transceiver: Mutex::new(None),
            send_called_tx: Mutex::new(Some(send_called_tx)),
            stop_called_tx,
            stop_called_signal,
            internal,
        }
    }

    pub(crate) fn is_negotiated(&self) -> bool {
        self.negotiated.load(Ordering::SeqCst)
    }

    pub(crate) fn set_negotiated(&self) {
        self.negotiated.store(true, Ordering::SeqCst);
    }

    pub(crate) async fn set_transceiver(&self, transceiver: Option<Weak<RtpTransceiver>>) {
        let mut t = self.transceiver.lock().await;
        *t = transceiver;
    }

    pub(crate) fn rtx_ssrc(&self) -> SSRC {
        self.rtx_ssrc.load(Ordering::SeqCst)
    }

    pub(crate) fn fec_ssrc(&self) -> SSRC {
        self.fec_ssrc.load(Ordering::SeqCst)
    }

    /// disable_rtx drops the retransmission encoding, for remotes that
    /// negotiated no rtx support.
    pub(crate) fn disable_rtx(&self) {
        self.rtx_ssrc.store(0, Ordering::SeqCst);
    }

    /// disable_fec drops the forward-error-correction encoding, for
    /// remotes that negotiated no fec support.
    pub(crate) fn disable_fec(&self) {
        self.fec_ssrc.store(0, Ordering::SeqCst);
    }

    /// transport returns the DTLS transport this sender writes through.
    pub fn transport(&self) -> Arc<DtlsTransport> {
        Arc::clone(&self.transport)
    }

    /// track returns the currently attached outbound track.
    pub async fn track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        let track = self.track.lock().await;
        track.clone()
    }

    /// replace_track swaps the outbound track, rebinding in place when the
    /// sender has already started.
    pub async fn replace_track(
        &self,
        track: Option<Arc<dyn TrackLocal + Send + Sync>>,
    ) -> Result<()> {
        if let (Some(t), Some(transceiver)) = (&track, self.upgraded_transceiver().await) {
            if transceiver.kind() != t.kind() {
                return Err(Error::ErrSenderNewTrackKindMismatch);
            }
        }

        if self.has_sent().await {
            let prev = {
                let track = self.track.lock().await;
                track.clone()
            };
            if let Some(prev) = prev {
                let context = self.context.lock().await;
                prev.unbind(&context).await?;
            }
        }

        if !self.has_sent().await || track.is_none() {
            let mut t = self.track.lock().await;
            *t = track;
            return Ok(());
        }

        let bind_result = match &track {
            Some(new_track) => {
                let context = self.context.lock().await;
                new_track.bind(&context).await
            }
            // unreachable, the none case returned above
            None => return Ok(()),
        };

        match bind_result {
            Ok(codec) => {
                {
                    let mut context = self.context.lock().await;
                    context.params.codecs = vec![codec];
                }
                let mut t = self.track.lock().await;
                *t = track;
                Ok(())
            }
            Err(err) => {
                // restore the previous binding so the sender keeps working
                let prev = {
                    let track = self.track.lock().await;
                    track.clone()
                };
                if let Some(prev) = prev {
                    let context = self.context.lock().await;
                    let _ = prev.bind(&context).await;
                }
                Err(err)
            }
        }
    }

    /// get_parameters describes the outbound encodings in effect.
    pub async fn get_parameters(&self) -> RtpSendParameters {
        let kind = {
            let track = self.track.lock().await;
            if let Some(t) = &*track {
                t.kind()
            } else {
                MediaKind::Unspecified
            }
        };

        let mut send_parameters = RtpSendParameters {
            rtp_parameters: self
                .media_engine
                .get_rtp_parameters_by_kind(kind, &[RtpTransceiverDirection::Sendonly])
                .await,
            encodings: vec![RtpEncodingParameters {
                ssrc: self.ssrc,
                payload_type: self.payload_type,
                rtx: RtpRtxParameters {
                    ssrc: self.rtx_ssrc(),
                },
                ..Default::default()
            }],
        };

        send_parameters.rtp_parameters.codecs =
            if let Some(transceiver) = self.upgraded_transceiver().await {
                transceiver.get_codecs().await
            } else {
                self.media_engine.get_codecs_by_kind(kind).await
            };

        send_parameters
    }

    /// send starts the outbound stream: the track is bound against the
    /// negotiated parameters and the interceptor write path is armed. The
    /// first successful call transitions the sender to sending.
    pub async fn send(&self, parameters: &RtpSendParameters) -> Result<()> {
        if self.has_sent().await {
            return Err(Error::ErrSenderSendAlreadyCalled);
        }

        let write_stream = Arc::new(InterceptorToTrackLocalWriter::new());

        let (context, stream_info) = {
            let track = self.track.lock().await;
            let kind = if let Some(t) = &*track {
                t.kind()
            } else {
                MediaKind::Unspecified
            };

            let mut context = TrackLocalContext {
                id: self.id.clone(),
                params: self
                    .media_engine
                    .get_rtp_parameters_by_kind(kind, &[RtpTransceiverDirection::Sendonly])
                    .await,
                ssrc: parameters.encodings[0].ssrc,
                write_stream: Some(
                    Arc::clone(&write_stream) as Arc<dyn TrackLocalWriter + Send + Sync>
                ),
            };

            let codec = if let Some(t) = &*track {
                t.bind(&context).await?
            } else {
                return Err(Error::ErrSenderTrackNil);
            };
            let payload_type = codec.payload_type;
            let capability = codec.capability.clone();
            context.params.codecs = vec![codec];

            let stream_info = create_stream_info(
                self.id.clone(),
                parameters.encodings[0].ssrc,
                payload_type,
                capability,
                &parameters.rtp_parameters.header_extensions,
            );

            (context, stream_info)
        };

        let srtp_rtp_writer = Arc::clone(&self.srtp_stream) as Arc<dyn RTPWriter + Send + Sync>;
        let rtp_interceptor = self
            .interceptor
            .bind_local_stream(&stream_info, srtp_rtp_writer)
            .await;
        {
            let mut interceptor_rtp_writer = write_stream.interceptor_rtp_writer.lock().await;
            *interceptor_rtp_writer = Some(rtp_interceptor);
        }

        {
            let mut ctx = self.context.lock().await;
            *ctx = context;
        }
        {
            let mut info = self.stream_info.lock().await;
            *info = stream_info;
        }

        {
            let mut send_called_tx = self.send_called_tx.lock().await;
            send_called_tx.take();
        }

        Ok(())
    }

    /// stop irreversibly stops the sender and unbinds its track.
    pub async fn stop(&self) -> Result<()> {
        if self.stop_called_signal.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.stop_called_signal.store(true, Ordering::SeqCst);
        self.stop_called_tx.notify_waiters();

        if !self.has_sent().await {
            return Ok(());
        }

        self.replace_track(None).await?;

        {
            let stream_info = self.stream_info.lock().await;
            self.interceptor.unbind_local_stream(&stream_info).await;
        }

        self.srtp_stream.close().await
    }

    /// has_sent reports whether send has run.
    pub(crate) async fn has_sent(&self) -> bool {
        let send_called_tx = self.send_called_tx.lock().await;
        send_called_tx.is_none()
    }

    /// read reads inbound RTCP for this sender, blocking until it has
    /// started sending.
    pub async fn read(&self, b: &mut [u8]) -> Result<(usize, Attributes)> {
        let mut send_called_rx = self.internal.send_called_rx.lock().await;

        tokio::select! {
            _ = send_called_rx.recv() => {
                let a = Attributes::new();
                Ok(self.rtcp_interceptor.read(b, &a).await?)
            }
            _ = self.internal.stop_called_rx.notified() => Err(Error::ErrClosedPipe),
        }
    }

    /// read_rtcp reads and unmarshals a compound RTCP packet.
    pub async fn read_rtcp(
        &self,
    ) -> Result<(Vec<Box<dyn rtcp::packet::Packet + Send + Sync>>, Attributes)> {
        let mut b = vec![0u8; self.receive_mtu];
        let (n, attributes) = self.read(&mut b).await?;

        let mut buf = &b[..n];
        let pkts = rtcp::packet::unmarshal(&mut buf)?;

        Ok((pkts, attributes))
    }

    async fn upgraded_transceiver(&self) -> Option<Arc<RtpTransceiver>> {
        let transceiver = self.transceiver.lock().await;
        transceiver.as_ref().and_then(|t| t.upgrade())
    }
}
