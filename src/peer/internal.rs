use std::sync::atomic::{AtomicIsize, AtomicU64, AtomicU8};
use std::sync::Weak;

use super::*;
use crate::peer::sdp::find_media_section_by_payload_type;
use crate::track::TrackStream;
use crate::transceiver::handle_unknown_rtp_packet;
use crate::SDES_REPAIR_RTP_STREAM_ID_URI;

/// The lock-guarded half of a connection: everything the operations chain
/// and the background dispatch loops touch lives here, behind an Arc, so
/// the public façade can stay reentrant.
pub(crate) struct PeerConnectionInner {
    /// The highest numeric mid handed out so far. JSEP requires fresh mids
    /// to be strictly greater than anything seen in either direction.
    pub(super) greater_mid: AtomicIsize,
    pub(super) sdp_origin: Mutex<::sdp::description::session::Origin>,
    pub(super) last_offer: Mutex<String>,
    pub(super) last_answer: Mutex<String>,

    pub(super) on_negotiation_needed_handler: Arc<Mutex<Option<OnNegotiationNeededFn>>>,
    pub(super) is_closed: Arc<AtomicBool>,

    /// The serial executor behind every description-changing or
    /// transport-affecting operation.
    pub(crate) ops: Arc<OperationsChain>,
    pub(super) is_negotiation_needed: Arc<AtomicBool>,
    pub(super) signaling_state: Arc<AtomicU8>,

    pub(super) ice_transport: Arc<IceTransport>,
    pub(super) dtls_transport: Arc<DtlsTransport>,
    pub(super) sctp_transport: Arc<SctpTransport>,
    pub(super) ice_gatherer: Arc<IceGatherer>,

    pub(super) on_peer_connection_state_change_handler:
        Arc<Mutex<Option<OnPeerConnectionStateChangeFn>>>,
    pub(super) peer_connection_state: Arc<AtomicU8>,
    pub(super) ice_connection_state: Arc<AtomicU8>,

    pub(super) transceivers: Arc<Mutex<Vec<Arc<RtpTransceiver>>>>,

    pub(super) on_track_handler: Arc<Mutex<Option<OnTrackFn>>>,
    pub(super) on_signaling_state_change_handler: Arc<Mutex<Option<OnSignalingStateChangeFn>>>,
    pub(super) on_ice_connection_state_change_handler:
        Arc<Mutex<Option<OnIceConnectionStateChangeFn>>>,
    pub(super) on_data_channel_handler: Arc<Mutex<Option<OnDataChannelFn>>>,

    pub(super) current_local_description: Arc<Mutex<Option<SessionDescription>>>,
    pub(super) current_remote_description: Arc<Mutex<Option<SessionDescription>>>,
    pub(super) pending_local_description: Arc<Mutex<Option<SessionDescription>>>,
    pub(super) pending_remote_description: Arc<Mutex<Option<SessionDescription>>>,

    pub(super) setting_engine: Arc<SettingEngine>,
    pub(crate) media_engine: Arc<MediaEngine>,
    pub(super) interceptor: Weak<dyn Interceptor + Send + Sync>,
}

impl PeerConnectionInner {
    pub(super) async fn new(
        api: &Api,
        interceptor: Weak<dyn Interceptor + Send + Sync>,
        mut configuration: Configuration,
    ) -> Result<(Arc<Self>, Configuration)> {
        let mut inner = PeerConnectionInner {
            greater_mid: AtomicIsize::new(-1),
            sdp_origin: Mutex::new(Default::default()),
            last_offer: Mutex::new(String::new()),
            last_answer: Mutex::new(String::new()),

            on_negotiation_needed_handler: Arc::new(Default::default()),
            ops: Arc::new(OperationsChain::new()),
            is_closed: Arc::new(AtomicBool::new(false)),
            is_negotiation_needed: Arc::new(AtomicBool::new(false)),
            signaling_state: Arc::new(AtomicU8::new(SignalingState::Stable as u8)),
            ice_transport: Arc::new(Default::default()),
            dtls_transport: Arc::new(Default::default()),
            sctp_transport: Arc::new(Default::default()),
            ice_gatherer: Arc::new(Default::default()),
            ice_connection_state: Arc::new(AtomicU8::new(IceConnectionState::New as u8)),
            peer_connection_state: Arc::new(AtomicU8::new(PeerConnectionState::New as u8)),
            transceivers: Arc::new(Default::default()),
            on_track_handler: Arc::new(Default::default()),
            on_signaling_state_change_handler: Arc::new(Default::default()),
            on_ice_connection_state_change_handler: Arc::new(Default::default()),
            on_data_channel_handler: Arc::new(Default::default()),
            on_peer_connection_state_change_handler: Arc::new(Default::default()),
            current_local_description: Arc::new(Default::default()),
            current_remote_description: Arc::new(Default::default()),
            pending_local_description: Arc::new(Default::default()),
            pending_remote_description: Arc::new(Default::default()),

            setting_engine: Arc::clone(&api.setting_engine),
            media_engine: if !api.setting_engine.disable_media_engine_copy {
                Arc::new(api.media_engine.snapshot())
            } else {
                Arc::clone(&api.media_engine)
            },
            interceptor,
        };

        inner.ice_gatherer = Arc::new(api.new_ice_gatherer(GatherOptions {
            ice_servers: configuration.get_ice_servers(),
            ice_gather_policy: configuration.ice_transport_policy,
        })?);

        inner.ice_transport = Arc::new(api.new_ice_transport(Arc::clone(&inner.ice_gatherer)));

        let certificates = configuration.certificates.drain(..).collect();
        inner.dtls_transport = Arc::new(
            api.new_dtls_transport(Arc::clone(&inner.ice_transport), certificates)?,
        );

        inner.sctp_transport = Arc::new(api.new_sctp_transport(Arc::clone(&inner.dtls_transport))?);

        let inner = Arc::new(inner);
        inner.wire_ice_state_callback().await;

        // inbound data channels bubble up through our handler slot
        {
            let on_data_channel_handler = Arc::clone(&inner.on_data_channel_handler);
            inner
                .sctp_transport
                .on_data_channel(Box::new(move |d: Arc<DataChannel>| {
                    let on_data_channel_handler = Arc::clone(&on_data_channel_handler);
                    Box::pin(async move {
                        let mut handler = on_data_channel_handler.lock().await;
                        if let Some(f) = &mut *handler {
                            f(d).await;
                        }
                    })
                }))
                .await;
        }

        // the empty-chain hook re-evaluates the negotiation-needed flag
        {
            let weak_inner = Arc::downgrade(&inner);
            inner
                .ops
                .set_empty_chain_hook(Box::new(move || {
                    let weak_inner = weak_inner.clone();
                    Box::pin(async move {
                        if let Some(inner) = weak_inner.upgrade() {
                            PeerConnection::negotiation_needed_op(
                                inner.negotiation_needed_params(),
                            )
                            .await;
                        }
                    })
                }))
                .await;
        }

        Ok((inner, configuration))
    }

    /// wire_ice_state_callback maps ICE transport states into the
    /// connection's atomic cells and the aggregate state derivation.
    async fn wire_ice_state_callback(self: &Arc<Self>) {
        let ice_connection_state = Arc::clone(&self.ice_connection_state);
        let peer_connection_state = Arc::clone(&self.peer_connection_state);
        let is_closed = Arc::clone(&self.is_closed);
        let dtls_transport = Arc::clone(&self.dtls_transport);
        let on_ice_connection_state_change_handler =
            Arc::clone(&self.on_ice_connection_state_change_handler);
        let on_peer_connection_state_change_handler =
            Arc::clone(&self.on_peer_connection_state_change_handler);

        self.ice_transport
            .on_connection_state_change(Box::new(move |state: IceTransportState| {
                let cs = match state {
                    IceTransportState::New => IceConnectionState::New,
                    IceTransportState::Checking => IceConnectionState::Checking,
                    IceTransportState::Connected => IceConnectionState::Connected,
                    IceTransportState::Completed => IceConnectionState::Completed,
                    IceTransportState::Failed => IceConnectionState::Failed,
                    IceTransportState::Disconnected => IceConnectionState::Disconnected,
                    IceTransportState::Closed => IceConnectionState::Closed,
                    _ => {
                        log::warn!("unhandled ICE transport state: {}", state);
                        return Box::pin(async {});
                    }
                };

                let ice_connection_state = Arc::clone(&ice_connection_state);
                let on_ice_connection_state_change_handler =
                    Arc::clone(&on_ice_connection_state_change_handler);
                let on_peer_connection_state_change_handler =
                    Arc::clone(&on_peer_connection_state_change_handler);
                let is_closed = Arc::clone(&is_closed);
                let dtls_transport_state = dtls_transport.state();
                let peer_connection_state = Arc::clone(&peer_connection_state);
                Box::pin(async move {
                    PeerConnection::do_ice_connection_state_change(
                        &on_ice_connection_state_change_handler,
                        &ice_connection_state,
                        cs,
                    )
                    .await;

                    PeerConnection::update_connection_state(
                        &on_peer_connection_state_change_handler,
                        &is_closed,
                        &peer_connection_state,
                        cs,
                        dtls_transport_state,
                    )
                    .await;
                })
            }))
            .await;
    }

    pub(super) fn negotiation_needed_params(&self) -> NegotiationNeededParams {
        NegotiationNeededParams {
            on_negotiation_needed_handler: Arc::clone(&self.on_negotiation_needed_handler),
            is_closed: Arc::clone(&self.is_closed),
            ops: Arc::clone(&self.ops),
            is_negotiation_needed: Arc::clone(&self.is_negotiation_needed),
            signaling_state: Arc::clone(&self.signaling_state),
            check: CheckNegotiationNeededParams {
                sctp_transport: Arc::clone(&self.sctp_transport),
                transceivers: Arc::clone(&self.transceivers),
                current_local_description: Arc::clone(&self.current_local_description),
                current_remote_description: Arc::clone(&self.current_remote_description),
            },
        }
    }

    pub(crate) async fn trigger_negotiation_needed(&self) {
        PeerConnection::do_negotiation_needed(self.negotiation_needed_params()).await;
    }

    pub(super) async fn remote_description(&self) -> Option<SessionDescription> {
        let pending_remote_description = self.pending_remote_description.lock().await;
        if pending_remote_description.is_some() {
            pending_remote_description.clone()
        } else {
            let current_remote_description = self.current_remote_description.lock().await;
            current_remote_description.clone()
        }
    }

    pub(super) fn ice_gathering_state(&self) -> IceGatheringState {
        match self.ice_gatherer.state() {
            IceGathererState::New => IceGatheringState::New,
            IceGathererState::Gathering => IceGatheringState::Gathering,
            _ => IceGatheringState::Complete,
        }
    }

    /// add_transceiver appends a transceiver and re-evaluates the
    /// negotiation-needed flag.
    pub(super) async fn add_transceiver(&self, t: Arc<RtpTransceiver>) {
        {
            let mut transceivers = self.transceivers.lock().await;
            transceivers.push(t);
        }
        self.trigger_negotiation_needed().await;
    }

    pub(super) async fn new_transceiver_from_track(
        &self,
        direction: RtpTransceiverDirection,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<Arc<RtpTransceiver>> {
        let interceptor = self
            .interceptor
            .upgrade()
            .ok_or(Error::ErrInterceptorNotBind)?;

        let (r, s) = match direction {
            RtpTransceiverDirection::Sendrecv => {
                let r = Some(Arc::new(RtpReceiver::new(
                    self.setting_engine.get_receive_mtu(),
                    track.kind(),
                    Arc::clone(&self.dtls_transport),
                    Arc::clone(&self.media_engine),
                    Arc::clone(&interceptor),
                )));
                let s = Some(Arc::new(
                    RtpSender::new(
                        self.setting_engine.get_receive_mtu(),
                        Arc::clone(&track),
                        Arc::clone(&self.dtls_transport),
                        Arc::clone(&self.media_engine),
                        Arc::clone(&interceptor),
                    )
                    .await,
                ));
                (r, s)
            }
            RtpTransceiverDirection::Sendonly => {
                let s = Some(Arc::new(
                    RtpSender::new(
                        self.setting_engine.get_receive_mtu(),
                        Arc::clone(&track),
                        Arc::clone(&self.dtls_transport),
                        Arc::clone(&self.media_engine),
                        Arc::clone(&interceptor),
                    )
                    .await,
                ));
                (None, s)
            }
            _ => return Err(Error::ErrTransceiverDirectionSupport),
        };

        Ok(RtpTransceiver::new(
            r,
            s,
            direction,
            track.kind(),
            vec![],
            Arc::clone(&self.media_engine),
        )
        .await)
    }

    pub(super) async fn add_transceiver_from_kind(
        &self,
        kind: MediaKind,
        init: &[RtpTransceiverInit],
    ) -> Result<Arc<RtpTransceiver>> {
        if self.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        let direction = match init.len() {
            0 => RtpTransceiverDirection::Sendrecv,
            1 => init[0].direction,
            _ => return Err(Error::ErrTransceiverOneInitOnly),
        };

        let t = match direction {
            RtpTransceiverDirection::Sendonly | RtpTransceiverDirection::Sendrecv => {
                let codecs = self.media_engine.get_codecs_by_kind(kind).await;
                if codecs.is_empty() {
                    return Err(Error::ErrNoCodecsAvailable);
                }
                let track = Arc::new(TrackLocalStaticRTP::new(
                    codecs[0].capability.clone(),
                    crate::rand_alpha(16),
                    crate::rand_alpha(16),
                ));
                self.new_transceiver_from_track(direction, track).await?
            }
            RtpTransceiverDirection::Recvonly => {
                let interceptor = self
                    .interceptor
                    .upgrade()
                    .ok_or(Error::ErrInterceptorNotBind)?;
                let receiver = Arc::new(RtpReceiver::new(
                    self.setting_engine.get_receive_mtu(),
                    kind,
                    Arc::clone(&self.dtls_transport),
                    Arc::clone(&self.media_engine),
                    interceptor,
                ));

                RtpTransceiver::new(
                    Some(receiver),
                    None,
                    RtpTransceiverDirection::Recvonly,
                    kind,
                    vec![],
                    Arc::clone(&self.media_engine),
                )
                .await
            }
            _ => return Err(Error::ErrTransceiverDirectionSupport),
        };

        self.add_transceiver(Arc::clone(&t)).await;

        Ok(t)
    }

    /// disable_repair_streams_if_unsupported clears the senders' RTX/FEC
    /// encodings when the remote description negotiated no support for
    /// them.
    pub(super) async fn disable_repair_streams_if_unsupported(&self) {
        let negotiated_video = self.media_engine.get_codecs_by_kind(MediaKind::Video).await;
        let rtx_supported = negotiated_video
            .iter()
            .any(|c| c.capability.mime_type.eq_ignore_ascii_case("video/rtx"));
        let fec_supported = negotiated_video
            .iter()
            .any(|c| c.capability.mime_type.eq_ignore_ascii_case("video/ulpfec"));

        if rtx_supported && fec_supported {
            return;
        }

        let transceivers = self.transceivers.lock().await;
        for t in &*transceivers {
            if let Some(sender) = t.sender().await {
                if !rtx_supported {
                    sender.disable_rtx();
                }
                if !fec_supported {
                    sender.disable_fec();
                }
            }
        }
    }

    /// start_transports drives ICE then DTLS; invoked from the operations
    /// chain once the first answer is applied.
    pub(super) async fn start_transports(
        self: &Arc<Self>,
        ice_role: IceRole,
        dtls_role: DtlsRole,
        remote_ufrag: String,
        remote_pwd: String,
        fingerprint: String,
        fingerprint_hash: String,
    ) {
        if let Err(err) = self
            .ice_transport
            .start(
                &IceParameters {
                    username_fragment: remote_ufrag,
                    password: remote_pwd,
                    ice_lite: false,
                },
                Some(ice_role),
            )
            .await
        {
            log::warn!("Failed to start ICE: {}", err);
            return;
        }

        let result = self
            .dtls_transport
            .start(DtlsParameters {
                role: dtls_role,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: fingerprint_hash,
                    value: fingerprint,
                }],
            })
            .await;
        PeerConnection::update_connection_state(
            &self.on_peer_connection_state_change_handler,
            &self.is_closed,
            &self.peer_connection_state,
            self.ice_connection_state.load(Ordering::SeqCst).into(),
            self.dtls_transport.state(),
        )
        .await;
        if let Err(err) = result {
            log::warn!("Failed to start DTLS: {}", err);
        }
    }

    pub(super) async fn start_rtp(
        self: &Arc<Self>,
        is_renegotiation: bool,
        remote_desc: Arc<SessionDescription>,
        sdp_semantics: SdpSemantics,
    ) -> Result<()> {
        let mut track_details = if let Some(parsed) = &remote_desc.parsed {
            track_details_from_sdp(parsed, false)
        } else {
            vec![]
        };

        let current_transceivers = {
            let transceivers = self.transceivers.lock().await;
            transceivers.clone()
        };

        if !is_renegotiation {
            self.undeclared_media_processor();
        } else {
            // renegotiation: rebind surviving tracks, replace receivers
            // whose tracks no longer appear in the description
            for t in &current_transceivers {
                let receiver = match t.receiver().await {
                    Some(receiver) => receiver,
                    None => continue,
                };
                let tracks = receiver.tracks().await;
                if tracks.is_empty() {
                    continue;
                }

                let mut receiver_needs_stopped = false;

                for track in tracks {
                    if !track.rid().is_empty() {
                        if let Some(details) =
                            track_details_for_rid(&track_details, track.rid())
                        {
                            track.set_id(details.id.clone()).await;
                            track.set_stream_id(details.stream_id.clone()).await;
                            continue;
                        }
                    } else if track.ssrc() != 0 {
                        if let Some(details) = track_details_for_ssrc(&track_details, track.ssrc())
                        {
                            track.set_id(details.id.clone()).await;
                            track.set_stream_id(details.stream_id.clone()).await;
                            continue;
                        }
                    }

                    receiver_needs_stopped = true;
                }

                if !receiver_needs_stopped {
                    continue;
                }

                log::info!("stopping orphaned receiver {:?}", receiver.kind());
                if let Err(err) = receiver.stop().await {
                    log::warn!("failed to stop receiver: {}", err);
                    continue;
                }

                let interceptor = self
                    .interceptor
                    .upgrade()
                    .ok_or(Error::ErrInterceptorNotBind)?;
                let receiver = Arc::new(RtpReceiver::new(
                    self.setting_engine.get_receive_mtu(),
                    receiver.kind(),
                    Arc::clone(&self.dtls_transport),
                    Arc::clone(&self.media_engine),
                    interceptor,
                ));
                t.set_receiver(Some(receiver)).await;
            }
        }

        self.start_rtp_receivers(&mut track_details, &current_transceivers, sdp_semantics)
            .await?;

        if let Some(parsed) = &remote_desc.parsed {
            if have_application_media_section(parsed) {
                self.start_sctp().await;
            }
        }

        Ok(())
    }

    /// start_rtp_receivers opens the inbound SRTP streams every declared
    /// track needs.
    async fn start_rtp_receivers(
        self: &Arc<Self>,
        incoming_tracks: &mut Vec<TrackDetails>,
        local_transceivers: &[Arc<RtpTransceiver>],
        sdp_semantics: SdpSemantics,
    ) -> Result<()> {
        let remote_is_plan_b = match sdp_semantics {
            SdpSemantics::PlanB => true,
            SdpSemantics::UnifiedPlanWithFallback => {
                description_is_plan_b(self.remote_description().await.as_ref())?
            }
            _ => false,
        };

        // skip tracks whose SSRC is already live on some receiver
        let mut filtered_tracks = incoming_tracks.clone();
        for incoming_track in incoming_tracks.iter() {
            for t in local_transceivers {
                if let Some(receiver) = t.receiver().await {
                    for track in receiver.tracks().await {
                        for ssrc in &incoming_track.ssrcs {
                            if *ssrc == track.ssrc() {
                                filter_track_with_ssrc(&mut filtered_tracks, track.ssrc());
                            }
                        }
                    }
                }
            }
        }

        let mut unhandled_tracks = vec![];
        for incoming_track in filtered_tracks.iter() {
            let mut track_handled = false;
            for t in local_transceivers {
                if t.mid().await != incoming_track.mid {
                    continue;
                }

                if (incoming_track.kind != t.kind())
                    || (t.direction() != RtpTransceiverDirection::Recvonly
                        && t.direction() != RtpTransceiverDirection::Sendrecv)
                {
                    continue;
                }

                if let Some(receiver) = t.receiver().await {
                    if receiver.have_received().await {
                        continue;
                    }
                    PeerConnectionInner::start_receiver(
                        self.setting_engine.get_receive_mtu(),
                        incoming_track,
                        receiver,
                        Arc::clone(&self.on_track_handler),
                    )
                    .await;
                    track_handled = true;
                }
            }

            if !track_handled {
                unhandled_tracks.push(incoming_track);
            }
        }

        if remote_is_plan_b {
            for incoming in unhandled_tracks {
                let t = match self
                    .add_transceiver_from_kind(
                        incoming.kind,
                        &[RtpTransceiverInit {
                            direction: RtpTransceiverDirection::Sendrecv,
                            send_encodings: vec![],
                        }],
                    )
                    .await
                {
                    Ok(t) => t,
                    Err(err) => {
                        log::warn!(
                            "could not add transceiver for remote SSRC {:?}: {}",
                            incoming.ssrcs.first(),
                            err
                        );
                        continue;
                    }
                };
                if let Some(receiver) = t.receiver().await {
                    PeerConnectionInner::start_receiver(
                        self.setting_engine.get_receive_mtu(),
                        incoming,
                        receiver,
                        Arc::clone(&self.on_track_handler),
                    )
                    .await;
                }
            }
        }

        Ok(())
    }

    /// start_receiver wires up one receiver and surfaces its track once
    /// the first packet pinned the payload type.
    async fn start_receiver(
        receive_mtu: usize,
        incoming: &TrackDetails,
        receiver: Arc<RtpReceiver>,
        on_track_handler: Arc<Mutex<Option<OnTrackFn>>>,
    ) {
        if !receiver.start(incoming).await {
            // simulcast layers surface through the undeclared-SSRC probe
            return;
        }

        for track in receiver.tracks().await {
            if track.ssrc() == 0 {
                continue;
            }

            let receiver = Arc::clone(&receiver);
            let on_track_handler = Arc::clone(&on_track_handler);
            let track = Arc::clone(&track);
            tokio::spawn(async move {
                // peek one packet so the payload type and codec are known
                // before the application observes the track
                let mut b = vec![0u8; receive_mtu];
                if let Err(err) = track.peek(&mut b).await {
                    log::warn!(
                        "could not determine PayloadType for SSRC {} ({})",
                        track.ssrc(),
                        err
                    );
                    return;
                }

                PeerConnection::do_track(on_track_handler, Some(track), Some(receiver)).await;
            });
        }
    }

    /// Start the SCTP association and open the locally requested channels.
    async fn start_sctp(self: &Arc<Self>) {
        if let Err(err) = self
            .sctp_transport
            .start(SctpTransportCapabilities {
                max_message_size: 0,
            })
            .await
        {
            log::warn!("Failed to start SCTP: {}", err);
            if let Err(err) = self.sctp_transport.stop().await {
                log::warn!("Failed to stop SctpTransport: {}", err);
            }
            return;
        }

        // copy out, inbound channels may grow the vector while we open
        let data_channels = {
            let data_channels = self.sctp_transport.data_channels.lock().await;
            data_channels.clone()
        };

        let mut opened = 0;
        for d in data_channels {
            if d.ready_state() == DataChannelState::Connecting {
                if let Err(err) = d.open(Arc::clone(&self.sctp_transport)).await {
                    log::warn!("failed to open data channel: {}", err);
                    continue;
                }
                opened += 1;
            }
        }

        self.sctp_transport
            .data_channels_opened
            .fetch_add(opened, Ordering::SeqCst);
    }

    /// undeclared_media_processor accepts inbound SRTP/SRTCP streams that
    /// no declared SSRC claimed and routes them per the dispatch policy.
    fn undeclared_media_processor(self: &Arc<Self>) {
        let dtls_transport = Arc::clone(&self.dtls_transport);
        let is_closed = Arc::clone(&self.is_closed);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let simulcast_routine_count = Arc::new(AtomicU64::new(0));
            loop {
                let srtp_session = match dtls_transport.get_srtp_session().await {
                    Some(s) => s,
                    None => {
                        log::warn!("undeclared_media_processor failed to open SrtpSession");
                        return;
                    }
                };

                let stream = match srtp_session.accept().await {
                    Ok(stream) => stream,
                    Err(err) => {
                        log::warn!("Failed to accept RTP {}", err);
                        return;
                    }
                };

                if is_closed.load(Ordering::SeqCst) {
                    if let Err(err) = stream.close().await {
                        log::warn!("Failed to close RTP stream {}", err);
                    }
                    continue;
                }

                let ssrc = stream.get_ssrc();
                if ssrc == 0 {
                    // a bandwidth probe, drained without surfacing a track
                    PeerConnectionInner::drain_bandwidth_probe(
                        stream,
                        inner.setting_engine.get_receive_mtu(),
                    );
                    continue;
                }

                if simulcast_routine_count.fetch_add(1, Ordering::SeqCst) + 1
                    >= SIMULCAST_MAX_PROBE_TASKS
                {
                    simulcast_routine_count.fetch_sub(1, Ordering::SeqCst);
                    log::warn!("{}", Error::ErrSimulcastProbeOverflow);
                    if let Err(err) = stream.close().await {
                        log::warn!("Failed to close RTP stream {}", err);
                    }
                    continue;
                }

                let dtls_transport = Arc::clone(&dtls_transport);
                let simulcast_routine_count = Arc::clone(&simulcast_routine_count);
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    dtls_transport
                        .store_simulcast_stream(ssrc, Arc::clone(&stream))
                        .await;

                    if let Err(err) = inner.handle_incoming_ssrc(stream, ssrc).await {
                        log::error!(
                            "incoming unhandled RTP ssrc({}), on_track will not fire: {}",
                            ssrc,
                            err
                        );
                    }

                    simulcast_routine_count.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        let dtls_transport = Arc::clone(&self.dtls_transport);
        tokio::spawn(async move {
            loop {
                let srtcp_session = match dtls_transport.get_srtcp_session().await {
                    Some(s) => s,
                    None => {
                        log::warn!("undeclared_media_processor failed to open SrtcpSession");
                        return;
                    }
                };

                let stream = match srtcp_session.accept().await {
                    Ok(stream) => stream,
                    Err(err) => {
                        log::warn!("Failed to accept RTCP {}", err);
                        return;
                    }
                };
                log::warn!(
                    "incoming unhandled RTCP ssrc({}), on_track will not fire",
                    stream.get_ssrc()
                );
            }
        });
    }

    fn drain_bandwidth_probe(stream: Arc<srtp::stream::Stream>, receive_mtu: usize) {
        tokio::spawn(async move {
            let mut b = vec![0u8; receive_mtu];
            while stream.read(&mut b).await.is_ok() {}
        });
    }

    /// handle_undeclared_ssrc attaches an unknown SSRC to the only media
    /// section, when there is exactly one and it doesn't pin other SSRCs.
    async fn handle_undeclared_ssrc(
        self: &Arc<Self>,
        ssrc: SSRC,
        remote_description: &::sdp::description::session::SessionDescription,
    ) -> Result<bool> {
        if remote_description.media_descriptions.len() != 1 {
            return Ok(false);
        }

        let only_media_section = &remote_description.media_descriptions[0];
        let mut stream_id = "";
        let mut id = "";

        for a in &only_media_section.attributes {
            match a.key.as_str() {
                "msid" => {
                    if let Some(value) = &a.value {
                        let split: Vec<&str> = value.split(' ').collect();
                        if split.len() == 2 {
                            stream_id = split[0];
                            id = split[1];
                        }
                    }
                }
                // an explicit ssrc means this stream is somebody else's
                "ssrc" => return Err(Error::ErrSingleMediaSectionHasExplicitSsrc),
                // a simulcast section resolves through probing instead
                crate::SDP_ATTRIBUTE_RID => return Ok(false),
                _ => {}
            };
        }

        let mut incoming = TrackDetails {
            ssrcs: vec![ssrc],
            kind: MediaKind::Video,
            stream_id: stream_id.to_owned(),
            id: id.to_owned(),
            ..Default::default()
        };
        if only_media_section.media_name.media == MediaKind::Audio.to_string() {
            incoming.kind = MediaKind::Audio;
        }

        let t = self
            .add_transceiver_from_kind(
                incoming.kind,
                &[RtpTransceiverInit {
                    direction: RtpTransceiverDirection::Sendrecv,
                    send_encodings: vec![],
                }],
            )
            .await?;

        if let Some(receiver) = t.receiver().await {
            PeerConnectionInner::start_receiver(
                self.setting_engine.get_receive_mtu(),
                &incoming,
                receiver,
                Arc::clone(&self.on_track_handler),
            )
            .await;
        }
        Ok(true)
    }

    /// handle_incoming_ssrc is the simulcast/undeclared dispatch of §the
    /// connection: single-section attach, then mid/rid probing, then the
    /// payload-type fallback.
    async fn handle_incoming_ssrc(
        self: &Arc<Self>,
        rtp_stream: Arc<srtp::stream::Stream>,
        ssrc: SSRC,
    ) -> Result<()> {
        let rd = match self.remote_description().await {
            Some(rd) => rd,
            None => return Err(Error::ErrRemoteDescriptionNil),
        };
        let parsed = match &rd.parsed {
            Some(parsed) => parsed,
            None => return Err(Error::ErrRemoteDescriptionNil),
        };

        // a single media section can adopt the SSRC wholesale
        if self.handle_undeclared_ssrc(ssrc, parsed).await? {
            return Ok(());
        }

        let (mid_extension_id, audio_supported, video_supported) = self
            .media_engine
            .get_header_extension_id(RtpHeaderExtensionCapability {
                uri: ::sdp::extmap::SDES_MID_URI.to_owned(),
            })
            .await;
        let mid_negotiated = audio_supported || video_supported;

        let (sid_extension_id, audio_supported, video_supported) = self
            .media_engine
            .get_header_extension_id(RtpHeaderExtensionCapability {
                uri: ::sdp::extmap::SDES_RTP_STREAM_ID_URI.to_owned(),
            })
            .await;
        let rid_negotiated = audio_supported || video_supported;

        if !mid_negotiated || !rid_negotiated {
            // no way to probe: the payload type decides the section
            return self
                .handle_incoming_ssrc_by_payload_type(rtp_stream, ssrc, parsed)
                .await;
        }

        let (rsid_extension_id, _, _) = self
            .media_engine
            .get_header_extension_id(RtpHeaderExtensionCapability {
                uri: SDES_REPAIR_RTP_STREAM_ID_URI.to_owned(),
            })
            .await;

        let mut buf = vec![0u8; self.setting_engine.get_receive_mtu()];
        let n = rtp_stream.read(&mut buf).await?;

        let (mut mid, mut rid, mut rsid, payload_type) = handle_unknown_rtp_packet(
            &buf[..n],
            mid_extension_id as u8,
            sid_extension_id as u8,
            rsid_extension_id as u8,
        )?;

        let params = self
            .media_engine
            .get_rtp_parameters_by_payload_type(payload_type)
            .await?;

        let icpr = match self.interceptor.upgrade() {
            Some(icpr) => icpr,
            None => return Err(Error::ErrInterceptorNotBind),
        };

        let stream_info = create_stream_info(
            String::new(),
            ssrc,
            params.codecs[0].payload_type,
            params.codecs[0].capability.clone(),
            &params.header_extensions,
        );
        let stream = self
            .dtls_transport
            .streams_for_ssrc(ssrc, &stream_info, &icpr)
            .await?;

        let a = interceptor::Attributes::new();
        for _ in 0..=SIMULCAST_PROBE_COUNT {
            if mid.is_empty() || (rid.is_empty() && rsid.is_empty()) {
                // padding-only packets carry no extensions worth reading
                if let Some(rtp_interceptor) = &stream.rtp_interceptor {
                    let (n, _) = rtp_interceptor.read(&mut buf, &a).await?;
                    let (m, r, rs, _) = handle_unknown_rtp_packet(
                        &buf[..n],
                        mid_extension_id as u8,
                        sid_extension_id as u8,
                        rsid_extension_id as u8,
                    )?;
                    mid = m;
                    rid = r;
                    rsid = rs;
                    continue;
                } else {
                    return Err(Error::ErrInterceptorNotBind);
                }
            }

            let transceivers = {
                let transceivers = self.transceivers.lock().await;
                transceivers.clone()
            };
            for t in &transceivers {
                if t.mid().await != mid {
                    continue;
                }
                let receiver = match t.receiver().await {
                    Some(receiver) => receiver,
                    None => continue,
                };

                if !rsid.is_empty() {
                    return receiver.receive_for_rtx(0, &rsid, stream.clone()).await;
                }

                let track = receiver
                    .receive_for_rid(&rid, params.clone(), stream.clone())
                    .await?;
                PeerConnection::do_track(
                    Arc::clone(&self.on_track_handler),
                    Some(track),
                    Some(receiver),
                )
                .await;
                return Ok(());
            }
        }

        // probe exhausted: unwind the streams we opened for it
        if let Some(rtp_read_stream) = &stream.rtp_read_stream {
            let _ = rtp_read_stream.close().await;
        }
        if let Some(rtcp_read_stream) = &stream.rtcp_read_stream {
            let _ = rtcp_read_stream.close().await;
        }
        icpr.unbind_remote_stream(&stream_info).await;
        self.dtls_transport.remove_simulcast_stream(ssrc).await;

        Err(Error::ErrSimulcastIncomingSsrcFailed)
    }

    /// The fallback when mid/rid extensions were never negotiated: find
    /// the media section owning the stream's payload type and attach the
    /// SSRC there the way a single-section description would.
    async fn handle_incoming_ssrc_by_payload_type(
        self: &Arc<Self>,
        rtp_stream: Arc<srtp::stream::Stream>,
        ssrc: SSRC,
        parsed: &::sdp::description::session::SessionDescription,
    ) -> Result<()> {
        let mut buf = vec![0u8; self.setting_engine.get_receive_mtu()];
        let n = rtp_stream.read(&mut buf).await?;

        let (_, _, _, payload_type) = handle_unknown_rtp_packet(&buf[..n], 0, 0, 0)?;

        let media = match find_media_section_by_payload_type(parsed, payload_type) {
            Some(media) => media,
            None => return Err(Error::ErrSimulcastMidRtpExtensionRequired),
        };

        let narrowed = ::sdp::description::session::SessionDescription {
            media_descriptions: vec![media.clone()],
            ..Default::default()
        };
        if self.handle_undeclared_ssrc(ssrc, &narrowed).await? {
            Ok(())
        } else {
            Err(Error::ErrSimulcastMidRtpExtensionRequired)
        }
    }

    /// generate_unmatched_sdp renders an offer with no remote state to
    /// match against, the initial create_offer path.
    pub(super) async fn generate_unmatched_sdp(
        &self,
        local_transceivers: Vec<Arc<RtpTransceiver>>,
        sdp_semantics: SdpSemantics,
    ) -> Result<::sdp::description::session::SessionDescription> {
        let d = ::sdp::description::session::SessionDescription::new_jsep_session_description(false);

        let ice_params = self.ice_gatherer.get_local_parameters().await?;
        let candidates = self.ice_gatherer.get_local_candidates().await?;

        let is_plan_b = sdp_semantics == SdpSemantics::PlanB;
        let mut media_sections = vec![];

        if is_plan_b {
            let mut video = vec![];
            let mut audio = vec![];

            for t in &local_transceivers {
                if t.kind == MediaKind::Video {
                    video.push(Arc::clone(t));
                } else if t.kind == MediaKind::Audio {
                    audio.push(Arc::clone(t));
                }
                if let Some(sender) = t.sender().await {
                    sender.set_negotiated();
                }
            }

            // a plan-b section forms per kind even when only one
            // transceiver of that kind exists
            if !video.is_empty() {
                media_sections.push(MediaSection {
                    id: "video".to_owned(),
                    transceivers: video,
                    ..Default::default()
                })
            }
            if !audio.is_empty() {
                media_sections.push(MediaSection {
                    id: "audio".to_owned(),
                    transceivers: audio,
                    ..Default::default()
                });
            }

            if self
                .sctp_transport
                .data_channels_requested
                .load(Ordering::SeqCst)
                != 0
            {
                media_sections.push(MediaSection {
                    id: "data".to_owned(),
                    data: true,
                    ..Default::default()
                });
            }
        } else {
            for t in &local_transceivers {
                if t.stopped.load(Ordering::SeqCst) {
                    // stopped transceivers get no m-section
                    continue;
                }

                if let Some(sender) = t.sender().await {
                    sender.set_negotiated();
                }
                media_sections.push(MediaSection {
                    id: t.mid().await,
                    transceivers: vec![Arc::clone(t)],
                    ..Default::default()
                });
            }

            if self
                .sctp_transport
                .data_channels_requested
                .load(Ordering::SeqCst)
                != 0
            {
                media_sections.push(MediaSection {
                    id: format!("{}", media_sections.len()),
                    data: true,
                    ..Default::default()
                });
            }
        }

        let dtls_fingerprints = if let Some(cert) = self.dtls_transport.certificates.first() {
            cert.get_fingerprints()?
        } else {
            return Err(Error::ErrNoCertificate);
        };

        let params = PopulateSdpParams {
            is_plan_b,
            media_description_fingerprint: self.setting_engine.sdp_media_level_fingerprints,
            is_icelite: self.setting_engine.candidates.ice_lite,
            connection_role: DEFAULT_DTLS_ROLE_OFFER.to_connection_role(),
            ice_gathering_state: self.ice_gathering_state(),
        };
        populate_sdp(
            d,
            &dtls_fingerprints,
            &self.media_engine,
            &candidates,
            &ice_params,
            &media_sections,
            params,
        )
        .await
    }

    /// generate_matched_sdp renders a description mirroring the remote's
    /// section order; used whenever a remote description exists.
    pub(super) async fn generate_matched_sdp(
        &self,
        mut local_transceivers: Vec<Arc<RtpTransceiver>>,
        include_unmatched: bool,
        connection_role: ConnectionRole,
        sdp_semantics: SdpSemantics,
    ) -> Result<::sdp::description::session::SessionDescription> {
        let d = ::sdp::description::session::SessionDescription::new_jsep_session_description(false);

        let ice_params = self.ice_gatherer.get_local_parameters().await?;
        let candidates = self.ice_gatherer.get_local_candidates().await?;

        let remote_description = self.remote_description().await;
        let detected_plan_b = description_is_plan_b(remote_description.as_ref())?;
        let mut media_sections = vec![];
        let mut already_have_application_media_section = false;

        if let Some(remote_description) = remote_description.as_ref() {
            if let Some(parsed) = &remote_description.parsed {
                for media in &parsed.media_descriptions {
                    let mid_value = match get_mid_value(media) {
                        Some(mid) if !mid.is_empty() => mid,
                        _ => return Err(Error::ErrRemoteDescriptionWithoutMidValue),
                    };

                    if media.media_name.media == MEDIA_SECTION_APPLICATION {
                        media_sections.push(MediaSection {
                            id: mid_value.to_owned(),
                            data: true,
                            ..Default::default()
                        });
                        already_have_application_media_section = true;
                        continue;
                    }

                    let kind = MediaKind::from(media.media_name.media.as_str());
                    let direction = get_peer_direction(media);
                    if kind == MediaKind::Unspecified
                        || direction == RtpTransceiverDirection::Unspecified
                    {
                        continue;
                    }

                    if sdp_semantics == SdpSemantics::PlanB
                        || (sdp_semantics == SdpSemantics::UnifiedPlanWithFallback
                            && detected_plan_b)
                    {
                        if !detected_plan_b {
                            return Err(Error::ErrIncorrectSdpSemantics);
                        }
                        // plan-b: fill the section with every matching
                        // local transceiver
                        let mut media_transceivers = vec![];
                        loop {
                            if let Some(t) = satisfy_type_and_direction(
                                kind,
                                direction,
                                &mut local_transceivers,
                            )
                            .await
                            {
                                if let Some(sender) = t.sender().await {
                                    sender.set_negotiated();
                                }
                                media_transceivers.push(t);
                            } else {
                                if media_transceivers.is_empty() {
                                    let t = RtpTransceiver::new(
                                        None,
                                        None,
                                        RtpTransceiverDirection::Inactive,
                                        kind,
                                        vec![],
                                        Arc::clone(&self.media_engine),
                                    )
                                    .await;
                                    media_transceivers.push(t);
                                }
                                break;
                            }
                        }
                        media_sections.push(MediaSection {
                            id: mid_value.to_owned(),
                            transceivers: media_transceivers,
                            ..Default::default()
                        });
                    } else {
                        if detected_plan_b {
                            return Err(Error::ErrIncorrectSdpSemantics);
                        }
                        if let Some(t) = find_by_mid(mid_value, &mut local_transceivers).await {
                            if let Some(sender) = t.sender().await {
                                sender.set_negotiated();
                            }
                            media_sections.push(MediaSection {
                                id: mid_value.to_owned(),
                                transceivers: vec![t],
                                rid_map: get_rids(media),
                                offered_direction: (!include_unmatched).then_some(direction),
                                ..Default::default()
                            });
                        } else {
                            return Err(Error::ErrTransceiverMidNotFound);
                        }
                    }
                }
            }
        }

        // an offer also includes every transceiver the remote has not
        // matched yet
        if include_unmatched {
            if !detected_plan_b {
                for t in &local_transceivers {
                    if let Some(sender) = t.sender().await {
                        sender.set_negotiated();
                    }
                    media_sections.push(MediaSection {
                        id: t.mid().await,
                        transceivers: vec![Arc::clone(t)],
                        ..Default::default()
                    });
                }
            }

            if self
                .sctp_transport
                .data_channels_requested
                .load(Ordering::SeqCst)
                != 0
                && !already_have_application_media_section
            {
                if detected_plan_b {
                    media_sections.push(MediaSection {
                        id: "data".to_owned(),
                        data: true,
                        ..Default::default()
                    });
                } else {
                    media_sections.push(MediaSection {
                        id: format!("{}", media_sections.len()),
                        data: true,
                        ..Default::default()
                    });
                }
            }
        }

        if sdp_semantics == SdpSemantics::UnifiedPlanWithFallback && detected_plan_b {
            log::info!("Plan-B offer detected; responding with Plan-B answer");
        }

        let dtls_fingerprints = if let Some(cert) = self.dtls_transport.certificates.first() {
            cert.get_fingerprints()?
        } else {
            return Err(Error::ErrNoCertificate);
        };

        let params = PopulateSdpParams {
            is_plan_b: detected_plan_b,
            media_description_fingerprint: self.setting_engine.sdp_media_level_fingerprints,
            is_icelite: self.setting_engine.candidates.ice_lite,
            connection_role,
            ice_gathering_state: self.ice_gathering_state(),
        };
        populate_sdp(
            d,
            &dtls_fingerprints,
            &self.media_engine,
            &candidates,
            &ice_params,
            &media_sections,
            params,
        )
        .await
    }

    /// has_local_description_changed reports whether the transceiver set
    /// drifted from a freshly generated offer.
    pub(super) async fn has_local_description_changed(&self, desc: &SessionDescription) -> bool {
        let transceivers = self.transceivers.lock().await;
        for t in &*transceivers {
            match get_by_mid(t.mid().await.as_str(), desc) {
                Some(m) => {
                    if get_peer_direction(m) != t.direction() {
                        return true;
                    }
                }
                None => return true,
            }
        }
        false
    }

    pub(super) async fn set_gather_complete_handler(&self, f: OnGatheringCompleteFn) {
        self.ice_gatherer.on_gathering_complete(f);
    }
}

type IResult<T> = std::result::Result<T, interceptor::Error>;

#[async_trait]
impl RTCPWriter for PeerConnectionInner {
    async fn write(
        &self,
        pkts: &[Box<dyn rtcp::packet::Packet + Send + Sync>],
        _a: &interceptor::Attributes,
    ) -> IResult<usize> {
        Ok(self.dtls_transport.write_rtcp(pkts).await?)
    }
}
