use std::sync::Arc;

use interceptor::{Attributes, Interceptor};
use tokio::sync::{mpsc, Mutex};

use crate::api::media_engine::MediaEngine;
use crate::error::{Error, Result};
use crate::peer::sdp::TrackDetails;
use crate::track::remote::TrackRemote;
use crate::track::{TrackStream, TrackStreams};
use crate::transceiver::codecs::{
    codec_parameters_fuzzy_search, CodecMatch, RtpCodecParameters, RtpParameters,
};
use crate::transceiver::{
    create_stream_info, MediaKind, RtpCodingParameters, RtpReceiveParameters, RtpRtxParameters,
    RtpTransceiverDirection, SSRC,
};
use crate::transport::dtls::DtlsTransport;

pub(crate) struct ReceiverInternal {
    receive_mtu: usize,
    pub(crate) kind: MediaKind,
    tracks: Mutex<Vec<TrackStreams>>,
    closed_rx: Mutex<mpsc::Receiver<()>>,
    received_rx: Mutex<mpsc::Receiver<()>>,

    transceiver_codecs: Mutex<Option<Arc<Mutex<Vec<RtpCodecParameters>>>>>,

    transport: Arc<DtlsTransport>,
    media_engine: Arc<MediaEngine>,
    interceptor: Arc<dyn Interceptor + Send + Sync>,
}

impl ReceiverInternal {
    /// read reads incoming RTCP for the first track of this receiver.
    async fn read(&self, b: &mut [u8]) -> Result<(usize, Attributes)> {
        let (mut received_rx, mut closed_rx) =
            (self.received_rx.lock().await, self.closed_rx.lock().await);

        tokio::select! {
            _ = received_rx.recv() => {
                let interceptor = {
                    let tracks = self.tracks.lock().await;
                    tracks.first().and_then(|t| t.stream.rtcp_interceptor.clone())
                };
                if let Some(rtcp_interceptor) = interceptor {
                    let a = Attributes::new();
                    Ok(rtcp_interceptor.read(b, &a).await?)
                } else {
                    Err(Error::ErrInterceptorNotBind)
                }
            }
            _ = closed_rx.recv() => Err(Error::ErrClosedPipe),
        }
    }

    /// read_simulcast reads incoming RTCP for the layer with the given rid.
    async fn read_simulcast(&self, b: &mut [u8], rid: &str) -> Result<(usize, Attributes)> {
        let (mut received_rx, mut closed_rx) =
            (self.received_rx.lock().await, self.closed_rx.lock().await);

        tokio::select! {
            _ = received_rx.recv() => {
                let interceptor = {
                    let tracks = self.tracks.lock().await;
                    tracks
                        .iter()
                        .find(|t| t.track.rid() == rid)
                        .and_then(|t| t.stream.rtcp_interceptor.clone())
                };
                if let Some(rtcp_interceptor) = interceptor {
                    let a = Attributes::new();
                    Ok(rtcp_interceptor.read(b, &a).await?)
                } else {
                    Err(Error::ErrReceiverRidStreamNotFound)
                }
            }
            _ = closed_rx.recv() => Err(Error::ErrClosedPipe),
        }
    }

    async fn read_rtcp(
        &self,
        receive_mtu: usize,
    ) -> Result<(Vec<Box<dyn rtcp::packet::Packet + Send + Sync>>, Attributes)> {
        let mut b = vec![0u8; receive_mtu];
        let (n, attributes) = self.read(&mut b).await?;

        let mut buf = &b[..n];
        let pkts = rtcp::packet::unmarshal(&mut buf)?;

        Ok((pkts, attributes))
    }

    async fn read_simulcast_rtcp(
        &self,
        rid: &str,
        receive_mtu: usize,
    ) -> Result<(Vec<Box<dyn rtcp::packet::Packet + Send + Sync>>, Attributes)> {
        let mut b = vec![0u8; receive_mtu];
        let (n, attributes) = self.read_simulcast(&mut b, rid).await?;

        let mut buf = &b[..n];
        let pkts = rtcp::packet::unmarshal(&mut buf)?;

        Ok((pkts, attributes))
    }

    /// read_rtp reads RTP for the track identified by tid.
    pub(crate) async fn read_rtp(&self, b: &mut [u8], tid: usize) -> Result<(usize, Attributes)> {
        {
            let mut received_rx = self.received_rx.lock().await;
            let _ = received_rx.recv().await;
        }

        let rtp_interceptor = {
            let tracks = self.tracks.lock().await;
            tracks
                .iter()
                .find(|t| t.track.tid() == tid)
                .and_then(|t| t.stream.rtp_interceptor.clone())
        };

        if let Some(ri) = rtp_interceptor {
            let a = Attributes::new();
            Ok(ri.read(b, &a).await?)
        } else {
            Err(Error::ErrReceiverSsrcStreamNotFound)
        }
    }

    async fn get_parameters(&self) -> RtpParameters {
        let mut parameters = self
            .media_engine
            .get_rtp_parameters_by_kind(self.kind, &[RtpTransceiverDirection::Recvonly])
            .await;

        let transceiver_codecs = self.transceiver_codecs.lock().await;
        if let Some(codecs) = &*transceiver_codecs {
            let c = codecs.lock().await;
            parameters.codecs =
                ReceiverInternal::filter_codecs(&c, self.kind, &self.media_engine).await;
        }

        parameters
    }

    /// filter_codecs intersects a preference list with the media engine's
    /// codecs; an empty preference list means the engine's defaults.
    pub(crate) async fn filter_codecs(
        codecs: &[RtpCodecParameters],
        kind: MediaKind,
        media_engine: &Arc<MediaEngine>,
    ) -> Vec<RtpCodecParameters> {
        let engine_codecs = media_engine.get_codecs_by_kind(kind).await;
        if codecs.is_empty() {
            return engine_codecs;
        }

        let mut filtered = vec![];
        for codec in codecs {
            let (c, match_type) = codec_parameters_fuzzy_search(codec, &engine_codecs);
            if match_type != CodecMatch::None {
                filtered.push(c);
            }
        }
        filtered
    }
}

/// RtpReceiver surfaces the inbound tracks of one transceiver. With
/// simulcast a receiver carries several tracks, one per rid.
pub struct RtpReceiver {
    receive_mtu: usize,
    kind: MediaKind,
    transport: Arc<DtlsTransport>,
    closed_tx: Mutex<Option<mpsc::Sender<()>>>,
    received_tx: Mutex<Option<mpsc::Sender<()>>>,

    pub(crate) internal: Arc<ReceiverInternal>,
}

impl RtpReceiver {
    pub(crate) fn new(
        receive_mtu: usize,
        kind: MediaKind,
        transport: Arc<DtlsTransport>,
        media_engine: Arc<MediaEngine>,
        interceptor: Arc<dyn Interceptor + Send + Sync>,
    ) -> Self {
        let (closed_tx, closed_rx) = mpsc::channel(1);
        let (received_tx, received_rx) = mpsc::channel(1);

        RtpReceiver {
            receive_mtu,
            kind,
            transport: Arc::clone(&transport),
            closed_tx: Mutex::new(Some(closed_tx)),
            received_tx: Mutex::new(Some(received_tx)),

            internal: Arc::new(ReceiverInternal {
                receive_mtu,
                kind,
                tracks: Mutex::new(vec![]),
                transport,
                media_engine,
                interceptor,
                closed_rx: Mutex::new(closed_rx),
                received_rx: Mutex::new(received_rx),
                transceiver_codecs: Mutex::new(None),
            }),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub(crate) async fn set_transceiver_codecs(
        &self,
        codecs: Option<Arc<Mutex<Vec<RtpCodecParameters>>>>,
    ) {
        let mut transceiver_codecs = self.internal.transceiver_codecs.lock().await;
        *transceiver_codecs = codecs;
    }

    /// transport returns the DTLS transport this receiver reads from.
    pub fn transport(&self) -> Arc<DtlsTransport> {
        Arc::clone(&self.transport)
    }

    /// get_parameters describes the codecs and extensions in effect.
    pub async fn get_parameters(&self) -> RtpParameters {
        self.internal.get_parameters().await
    }

    /// track returns the single track of a non-simulcast receiver.
    pub async fn track(&self) -> Option<Arc<TrackRemote>> {
        let tracks = self.internal.tracks.lock().await;
        if tracks.len() != 1 {
            None
        } else {
            tracks.first().map(|t| Arc::clone(&t.track))
        }
    }

    /// tracks returns every track of this receiver, one per simulcast
    /// layer.
    pub async fn tracks(&self) -> Vec<Arc<TrackRemote>> {
        let tracks = self.internal.tracks.lock().await;
        tracks.iter().map(|t| Arc::clone(&t.track)).collect()
    }

    /// receive installs the inbound encodings and opens the SRTP streams
    /// for those that already name an SSRC. May only be called once.
    pub async fn receive(&self, parameters: &RtpReceiveParameters) -> Result<()> {
        let _d = {
            let mut received_tx = self.received_tx.lock().await;
            if received_tx.is_none() {
                return Err(Error::ErrReceiverReceiveAlreadyCalled);
            }
            received_tx.take()
        };

        let (global_params, interceptor, media_engine) = (
            self.internal.get_parameters().await,
            Arc::clone(&self.internal.interceptor),
            Arc::clone(&self.internal.media_engine),
        );
        let codec = global_params
            .codecs
            .first()
            .map(|c| c.capability.clone())
            .unwrap_or_default();

        let mut tracks = vec![];
        for encoding in &parameters.encodings {
            let stream = if encoding.ssrc != 0 {
                let stream_info = create_stream_info(
                    String::new(),
                    encoding.ssrc,
                    0,
                    codec.clone(),
                    &global_params.header_extensions,
                );
                self.transport
                    .streams_for_ssrc(encoding.ssrc, &stream_info, &interceptor)
                    .await?
            } else {
                TrackStream::default()
            };

            let repair_stream = if encoding.rtx.ssrc != 0 {
                let stream_info = create_stream_info(
                    String::new(),
                    encoding.rtx.ssrc,
                    0,
                    codec.clone(),
                    &global_params.header_extensions,
                );
                self.transport
                    .streams_for_ssrc(encoding.rtx.ssrc, &stream_info, &interceptor)
                    .await?
            } else {
                TrackStream::default()
            };

            tracks.push(TrackStreams {
                track: Arc::new(TrackRemote::new(
                    self.receive_mtu,
                    self.kind,
                    encoding.ssrc,
                    encoding.rid.clone(),
                    Arc::downgrade(&self.internal),
                    Arc::clone(&media_engine),
                )),
                stream,
                repair_stream,
            });
        }

        {
            let mut internal_tracks = self.internal.tracks.lock().await;
            internal_tracks.extend(tracks);
        }

        Ok(())
    }

    /// read reads incoming RTCP for this receiver.
    pub async fn read(&self, b: &mut [u8]) -> Result<(usize, Attributes)> {
        self.internal.read(b).await
    }

    /// read_simulcast reads incoming RTCP for the given rid.
    pub async fn read_simulcast(&self, b: &mut [u8], rid: &str) -> Result<(usize, Attributes)> {
        self.internal.read_simulcast(b, rid).await
    }

    /// read_rtcp reads and unmarshals incoming RTCP.
    pub async fn read_rtcp(
        &self,
    ) -> Result<(Vec<Box<dyn rtcp::packet::Packet + Send + Sync>>, Attributes)> {
        self.internal.read_rtcp(self.receive_mtu).await
    }

    /// read_simulcast_rtcp reads and unmarshals incoming RTCP for a rid.
    pub async fn read_simulcast_rtcp(
        &self,
        rid: &str,
    ) -> Result<(Vec<Box<dyn rtcp::packet::Packet + Send + Sync>>, Attributes)> {
        self.internal.read_simulcast_rtcp(rid, self.receive_mtu).await
    }

    pub(crate) async fn have_received(&self) -> bool {
        let received_tx = self.received_tx.lock().await;
        received_tx.is_none()
    }

    /// start configures this receiver from the track details extracted out
    /// of an applied remote description. Returns whether the receiver has a
    /// declared SSRC, i.e. whether its track can be surfaced right away.
    pub(crate) async fn start(&self, incoming: &TrackDetails) -> bool {
        let primary_ssrc = incoming.ssrcs.first().copied().unwrap_or(0);

        let mut encodings = vec![];
        if primary_ssrc != 0 {
            encodings.push(RtpCodingParameters {
                ssrc: primary_ssrc,
                rtx: RtpRtxParameters {
                    ssrc: incoming.rtx_ssrc.unwrap_or(0),
                },
                ..Default::default()
            });
        }
        for rid in &incoming.rids {
            encodings.push(RtpCodingParameters {
                rid: rid.to_owned(),
                ..Default::default()
            });
        }

        if let Err(err) = self.receive(&RtpReceiveParameters { encodings }).await {
            log::warn!("RtpReceiver receive failed: {}", err);
            return false;
        }

        // id and stream id become visible before the first packet arrives
        for track in self.tracks().await {
            track.set_id(incoming.id.clone()).await;
            track.set_stream_id(incoming.stream_id.clone()).await;
        }

        primary_ssrc != 0
    }

    /// stop irreversibly stops the receiver and closes its streams.
    pub async fn stop(&self) -> Result<()> {
        let _d = {
            let mut closed_tx = self.closed_tx.lock().await;
            if closed_tx.is_none() {
                return Ok(());
            }
            closed_tx.take()
        };

        if !self.have_received().await {
            return Ok(());
        }

        let mut errs = vec![];
        let tracks = self.internal.tracks.lock().await;
        for t in &*tracks {
            for stream in [&t.stream, &t.repair_stream] {
                if let Some(rtcp_read_stream) = &stream.rtcp_read_stream {
                    if let Err(err) = rtcp_read_stream.close().await {
                        errs.push(err.into());
                    }
                }
                if let Some(rtp_read_stream) = &stream.rtp_read_stream {
                    if let Err(err) = rtp_read_stream.close().await {
                        errs.push(err.into());
                    }
                }
                if let Some(stream_info) = &stream.stream_info {
                    self.internal
                        .interceptor
                        .unbind_remote_stream(stream_info)
                        .await;
                }
            }
        }

        crate::error::flatten_errs(errs)
    }

    /// read_rtp is called by a track; state lives here so all tracks of the
    /// receiver share it.
    pub(crate) async fn read_rtp(&self, b: &mut [u8], tid: usize) -> Result<(usize, Attributes)> {
        self.internal.read_rtp(b, tid).await
    }

    /// receive_for_rid fills in the state of a simulcast layer once its
    /// SSRC has been learned by probing.
    pub(crate) async fn receive_for_rid(
        &self,
        rid: &str,
        params: RtpParameters,
        stream: TrackStream,
    ) -> Result<Arc<TrackRemote>> {
        let mut tracks = self.internal.tracks.lock().await;
        for t in &mut *tracks {
            if t.track.rid() == rid && !params.codecs.is_empty() {
                let ssrc = stream.stream_info.as_ref().map_or(0, |info| info.ssrc);

                t.track.set_kind(self.kind);
                t.track.set_codec(params.codecs[0].clone()).await;
                t.track.set_params(params.clone()).await;
                t.track.set_ssrc(ssrc);
                t.stream = stream;

                return Ok(Arc::clone(&t.track));
            }
        }

        Err(Error::ErrReceiverRidStreamNotFound)
    }

    /// receive_for_rtx wires an RTX substream to the layer it repairs,
    /// identified by rsid (or, without one, the single track).
    pub(crate) async fn receive_for_rtx(
        &self,
        ssrc: SSRC,
        rsid: &str,
        repair_stream: TrackStream,
    ) -> Result<()> {
        let mut tracks = self.internal.tracks.lock().await;

        let track = if ssrc != 0 && tracks.len() == 1 {
            tracks.first_mut()
        } else {
            tracks.iter_mut().find(|t| t.track.rid() == rsid)
        };

        if let Some(t) = track {
            t.repair_stream = repair_stream;
            Ok(())
        } else {
            Err(Error::ErrReceiverRidStreamNotFound)
        }
    }
}
