pub mod description;
mod internal;
pub(crate) mod operations;
pub(crate) mod sdp;
pub mod states;

#[cfg(test)]
mod peer_connection_test;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use ::sdp::util::ConnectionRole;
use async_trait::async_trait;
use ice::candidate::candidate_base::unmarshal_candidate;
use ice::candidate::Candidate;
use interceptor::{Attributes, Interceptor, RTCPWriter};
use rcgen::KeyPair;
use tokio::sync::{mpsc, Mutex};

use crate::api::media_engine::MediaEngine;
use crate::api::setting_engine::SettingEngine;
use crate::api::Api;
use crate::configuration::{
    AnswerOptions, BundlePolicy, Configuration, OfferOptions, SdpSemantics,
};
use crate::data_channel::{
    DataChannel, DataChannelInit, DataChannelParameters, DataChannelState,
};
use crate::error::{flatten_errs, Error, Result};
use crate::peer::description::{SdpType, SessionDescription};
use crate::peer::internal::PeerConnectionInner;
use crate::peer::operations::{Operation, OperationsChain};
use crate::peer::sdp::{
    description_is_plan_b, filter_track_with_ssrc, get_by_mid, get_mid_value, get_peer_direction,
    get_rids, have_application_media_section, have_data_channel, populate_local_candidates,
    populate_sdp, track_details_for_rid, track_details_for_ssrc, track_details_from_sdp,
    update_sdp_origin, MediaSection, PopulateSdpParams, TrackDetails, MEDIA_SECTION_APPLICATION,
};
use crate::peer::states::{
    check_next_signaling_state, PeerConnectionState, SignalingState, StateChangeOp,
};
use crate::track::local::{TrackLocal, TrackLocalStaticRTP};
use crate::track::remote::TrackRemote;
use crate::transceiver::codecs::RtpHeaderExtensionCapability;
use crate::transceiver::receiver::RtpReceiver;
use crate::transceiver::sender::RtpSender;
use crate::transceiver::{
    create_stream_info, find_by_mid, satisfy_type_and_direction, MediaKind, RtpTransceiver,
    RtpTransceiverDirection, RtpTransceiverInit, SSRC,
};
use crate::transport::candidate::{IceCandidate, IceCandidateInit};
use crate::transport::dtls::{
    DtlsFingerprint, DtlsParameters, DtlsRole, DtlsTransport, DtlsTransportState,
    DEFAULT_DTLS_ROLE_ANSWER, DEFAULT_DTLS_ROLE_OFFER,
};
use crate::transport::ice::{
    GatherOptions, IceConnectionState, IceGatherer, IceGathererState, IceGatheringState,
    IceParameters, IceRole, IceTransport, IceTransportState, OnGatheringCompleteFn,
    OnGathererStateChangeFn, OnLocalCandidateFn,
};
use crate::transport::sctp::{SctpTransport, SctpTransportCapabilities, SctpTransportState};
use crate::EventFuture;

/// How many packets an undeclared stream is probed for mid/rid headers.
pub(crate) const SIMULCAST_PROBE_COUNT: usize = 10;

/// How many undeclared-SSRC probes may run at once; excess streams are
/// dropped.
pub(crate) const SIMULCAST_MAX_PROBE_TASKS: u64 = 25;

/// How often an offer is regenerated when transceivers mutate mid-flight
/// before giving up.
const OFFER_GENERATION_ATTEMPTS: usize = 128;

pub type OnSignalingStateChangeFn =
    Box<dyn (FnMut(SignalingState) -> EventFuture) + Send + Sync>;
pub type OnIceConnectionStateChangeFn =
    Box<dyn (FnMut(IceConnectionState) -> EventFuture) + Send + Sync>;
pub type OnPeerConnectionStateChangeFn =
    Box<dyn (FnMut(PeerConnectionState) -> EventFuture) + Send + Sync>;
pub type OnDataChannelFn = Box<dyn (FnMut(Arc<DataChannel>) -> EventFuture) + Send + Sync>;
pub type OnTrackFn = Box<
    dyn (FnMut(Option<Arc<TrackRemote>>, Option<Arc<RtpReceiver>>) -> EventFuture) + Send + Sync,
>;
pub type OnNegotiationNeededFn = Box<dyn (FnMut() -> EventFuture) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct CheckNegotiationNeededParams {
    pub(crate) sctp_transport: Arc<SctpTransport>,
    pub(crate) transceivers: Arc<Mutex<Vec<Arc<RtpTransceiver>>>>,
    pub(crate) current_local_description: Arc<Mutex<Option<SessionDescription>>>,
    pub(crate) current_remote_description: Arc<Mutex<Option<SessionDescription>>>,
}

#[derive(Clone)]
pub(crate) struct NegotiationNeededParams {
    pub(crate) on_negotiation_needed_handler: Arc<Mutex<Option<OnNegotiationNeededFn>>>,
    pub(crate) is_closed: Arc<AtomicBool>,
    pub(crate) ops: Arc<OperationsChain>,
    pub(crate) is_negotiation_needed: Arc<AtomicBool>,
    pub(crate) signaling_state: Arc<AtomicU8>,
    pub(crate) check: CheckNegotiationNeededParams,
}

#[derive(Default)]
struct CloseProgress {
    closed: bool,
    gracefully_closed: bool,
}

/// PeerConnection is one WebRTC endpoint: it negotiates sessions with a
/// remote peer over exchanged descriptions and carries media tracks and
/// data channels over the resulting ICE/DTLS transport pair.
pub struct PeerConnection {
    /// Stable identifier, useful in logs when several connections coexist.
    id: String,

    configuration: Configuration,

    interceptor_rtcp_writer: Arc<dyn RTCPWriter + Send + Sync>,
    interceptor: Arc<dyn Interceptor + Send + Sync>,

    close_progress: Mutex<CloseProgress>,

    pub(crate) internal: Arc<PeerConnectionInner>,
}

impl PeerConnection {
    /// new builds a connection from an [`Api`]. Called through
    /// `Api::new_peer_connection`.
    pub(crate) async fn new(api: &Api, mut configuration: Configuration) -> Result<Self> {
        PeerConnection::init_configuration(&mut configuration)?;

        let interceptor = api.interceptor_registry.build("")?;
        let (internal, configuration) =
            PeerConnectionInner::new(api, Arc::downgrade(&interceptor), configuration).await?;
        let internal_rtcp_writer = Arc::clone(&internal) as Arc<dyn RTCPWriter + Send + Sync>;
        let interceptor_rtcp_writer = interceptor.bind_rtcp_writer(internal_rtcp_writer).await;

        Ok(PeerConnection {
            id: format!("PeerConnection-{}", crate::rand_alpha(16)),
            interceptor,
            interceptor_rtcp_writer,
            close_progress: Mutex::new(CloseProgress::default()),
            internal,
            configuration,
        })
    }

    /// init_configuration validates a configuration before any state
    /// exists, so only the per-field shape is checked here.
    fn init_configuration(configuration: &mut Configuration) -> Result<()> {
        for server in &configuration.ice_servers {
            server.validate()?;
        }

        if !configuration.certificates.is_empty() {
            let now = std::time::SystemTime::now();
            for cert in &configuration.certificates {
                cert.expires()
                    .duration_since(now)
                    .map_err(|_| Error::ErrCertificateExpired)?;
            }
        } else {
            let kp = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256)?;
            let cert = crate::certificate::Certificate::from_key_pair(kp)?;
            configuration.certificates = vec![cert];
        };

        Ok(())
    }

    pub fn get_configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// set_configuration updates the mutable subset of the configuration.
    /// Fields the W3C algorithm freezes reject a mismatched change with an
    /// invalid-modification error.
    /// <https://www.w3.org/TR/webrtc/#set-the-configuration>
    pub async fn set_configuration(&mut self, configuration: Configuration) -> Result<()> {
        if self.internal.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        // peer identity is immutable once set
        if !configuration.peer_identity.is_empty() {
            if !self.configuration.peer_identity.is_empty()
                && configuration.peer_identity != self.configuration.peer_identity
            {
                return Err(Error::ErrModifyingPeerIdentity);
            }
            self.configuration.peer_identity = configuration.peer_identity;
        }

        // certificates were handed to the DTLS transport at construction
        if !configuration.certificates.is_empty() {
            if configuration.certificates.len() != self.configuration.certificates.len() {
                return Err(Error::ErrModifyingCertificates);
            }
            self.configuration.certificates = configuration.certificates;
        }

        // the bundle policy may only move while no local description exists
        if configuration.bundle_policy != BundlePolicy::Unspecified
            && configuration.bundle_policy != self.configuration.bundle_policy
        {
            if self.local_description().await.is_some() {
                return Err(Error::ErrModifyingBundlePolicy);
            }
            self.configuration.bundle_policy = configuration.bundle_policy;
        }

        // the candidate pool size freezes once a local description exists
        if configuration.ice_candidate_pool_size != self.configuration.ice_candidate_pool_size {
            if self.local_description().await.is_some() {
                return Err(Error::ErrModifyingIceCandidatePoolSize);
            }
            self.configuration.ice_candidate_pool_size = configuration.ice_candidate_pool_size;
        }

        self.configuration.ice_transport_policy = configuration.ice_transport_policy;

        if !configuration.ice_servers.is_empty() {
            for server in &configuration.ice_servers {
                server.validate()?;
            }
            self.configuration.ice_servers = configuration.ice_servers;
        }

        Ok(())
    }

    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// on_signaling_state_change installs the signaling state handler.
    pub async fn on_signaling_state_change(&self, f: OnSignalingStateChangeFn) {
        let mut handler = self.internal.on_signaling_state_change_handler.lock().await;
        *handler = Some(f);
    }

    async fn do_signaling_state_change(&self, new_state: SignalingState) {
        log::info!("signaling state changed to {}", new_state);
        let mut handler = self.internal.on_signaling_state_change_handler.lock().await;
        if let Some(f) = &mut *handler {
            f(new_state).await;
        }
    }

    /// on_data_channel installs the handler fired for channels the remote
    /// announces.
    pub async fn on_data_channel(&self, f: OnDataChannelFn) {
        let mut handler = self.internal.on_data_channel_handler.lock().await;
        *handler = Some(f);
    }

    /// on_negotiation_needed installs the handler fired when local
    /// mutations require a fresh offer.
    pub async fn on_negotiation_needed(&self, f: OnNegotiationNeededFn) {
        let mut handler = self.internal.on_negotiation_needed_handler.lock().await;
        *handler = Some(f);
    }

    /// on_track installs the handler fired for every inbound track.
    pub async fn on_track(&self, f: OnTrackFn) {
        let mut handler = self.internal.on_track_handler.lock().await;
        *handler = Some(f);
    }

    pub(crate) async fn do_track(
        on_track_handler: Arc<Mutex<Option<OnTrackFn>>>,
        track: Option<Arc<TrackRemote>>,
        receiver: Option<Arc<RtpReceiver>>,
    ) {
        log::debug!("got new track: {:?}", track);

        if track.is_some() {
            // a detached task keeps handler bodies from re-entering the
            // connection lock
            tokio::spawn(async move {
                let mut handler = on_track_handler.lock().await;
                if let Some(f) = &mut *handler {
                    f(track, receiver).await;
                } else {
                    log::warn!("on_track unset, unable to handle incoming media streams");
                }
            });
        }
    }

    /// on_ice_candidate installs the trickle handler; it fires with `None`
    /// once gathering finishes.
    pub async fn on_ice_candidate(&self, f: OnLocalCandidateFn) {
        self.internal.ice_gatherer.on_local_candidate(f)
    }

    /// on_ice_gathering_state_change installs the gathering state handler.
    pub async fn on_ice_gathering_state_change(&self, f: OnGathererStateChangeFn) {
        self.internal.ice_gatherer.on_state_change(f)
    }

    /// on_ice_connection_state_change installs the ICE state handler.
    pub async fn on_ice_connection_state_change(&self, f: OnIceConnectionStateChangeFn) {
        let mut handler = self
            .internal
            .on_ice_connection_state_change_handler
            .lock()
            .await;
        *handler = Some(f);
    }

    pub(crate) async fn do_ice_connection_state_change(
        handler: &Arc<Mutex<Option<OnIceConnectionStateChangeFn>>>,
        ice_connection_state: &Arc<AtomicU8>,
        cs: IceConnectionState,
    ) {
        ice_connection_state.store(cs as u8, Ordering::SeqCst);

        log::info!("ICE connection state changed: {}", cs);
        let mut handler = handler.lock().await;
        if let Some(f) = &mut *handler {
            f(cs).await;
        }
    }

    /// on_peer_connection_state_change installs the aggregate state
    /// handler.
    pub async fn on_peer_connection_state_change(&self, f: OnPeerConnectionStateChangeFn) {
        let mut handler = self
            .internal
            .on_peer_connection_state_change_handler
            .lock()
            .await;
        *handler = Some(f);
    }

    async fn do_peer_connection_state_change(
        handler: &Arc<Mutex<Option<OnPeerConnectionStateChangeFn>>>,
        cs: PeerConnectionState,
    ) {
        let mut handler = handler.lock().await;
        if let Some(f) = &mut *handler {
            f(cs).await;
        }
    }

    /// update_connection_state derives the aggregate connection state from
    /// the ICE and DTLS transport states; the first matching rule wins and
    /// duplicates are suppressed.
    pub(crate) async fn update_connection_state(
        on_peer_connection_state_change_handler: &Arc<
            Mutex<Option<OnPeerConnectionStateChangeFn>>,
        >,
        is_closed: &Arc<AtomicBool>,
        peer_connection_state: &Arc<AtomicU8>,
        ice_connection_state: IceConnectionState,
        dtls_transport_state: DtlsTransportState,
    ) -> PeerConnectionState {
        use DtlsTransportState as D;
        use IceConnectionState as I;

        let connection_state = if is_closed.load(Ordering::SeqCst) {
            PeerConnectionState::Closed
        } else if ice_connection_state == I::Failed || dtls_transport_state == D::Failed {
            PeerConnectionState::Failed
        } else if ice_connection_state == I::Disconnected {
            PeerConnectionState::Disconnected
        } else if matches!(ice_connection_state, I::New | I::Closed)
            && matches!(dtls_transport_state, D::New | D::Closed)
        {
            PeerConnectionState::New
        } else if matches!(ice_connection_state, I::New | I::Checking)
            || matches!(dtls_transport_state, D::New | D::Connecting)
        {
            PeerConnectionState::Connecting
        } else if matches!(ice_connection_state, I::Connected | I::Completed | I::Closed)
            && matches!(dtls_transport_state, D::Connected | D::Closed)
        {
            PeerConnectionState::Connected
        } else {
            PeerConnectionState::New
        };

        if peer_connection_state.load(Ordering::SeqCst) == connection_state as u8 {
            return connection_state;
        }

        log::info!("peer connection state changed: {}", connection_state);
        peer_connection_state.store(connection_state as u8, Ordering::SeqCst);

        PeerConnection::do_peer_connection_state_change(
            on_peer_connection_state_change_handler,
            connection_state,
        )
        .await;

        connection_state
    }

    /// do_negotiation_needed implements the update-the-negotiation-needed
    /// flag algorithm. With a busy chain the evaluation is deferred to the
    /// chain's empty-chain hook.
    pub(crate) async fn do_negotiation_needed(params: NegotiationNeededParams) {
        if !params.ops.is_empty().await {
            params.ops.request_negotiation_on_empty();
            return;
        }

        let params2 = params.clone();
        params
            .ops
            .enqueue(Operation::new(
                move || {
                    Box::pin(async move {
                        PeerConnection::negotiation_needed_op(params2).await;
                    })
                },
                "negotiation_needed",
            ))
            .await;
    }

    pub(crate) async fn negotiation_needed_op(params: NegotiationNeededParams) {
        if params.is_closed.load(Ordering::SeqCst) {
            return;
        }

        // work arrived behind us: re-arm the latch and let the hook rerun
        if !params.ops.is_empty().await {
            params.ops.request_negotiation_on_empty();
            return;
        }

        if params.signaling_state.load(Ordering::SeqCst) != SignalingState::Stable as u8 {
            return;
        }

        if !PeerConnection::check_negotiation_needed(&params.check).await {
            params.is_negotiation_needed.store(false, Ordering::SeqCst);
            return;
        }

        if params.is_negotiation_needed.load(Ordering::SeqCst) {
            return;
        }

        params.is_negotiation_needed.store(true, Ordering::SeqCst);
        {
            let mut handler = params.on_negotiation_needed_handler.lock().await;
            if let Some(f) = &mut *handler {
                f().await;
            }
        }
    }

    async fn check_negotiation_needed(params: &CheckNegotiationNeededParams) -> bool {
        // https://www.w3.org/TR/webrtc/#dfn-check-if-negotiation-is-needed
        let current_local_description = {
            let current_local_description = params.current_local_description.lock().await;
            current_local_description.clone()
        };

        let local_desc = match &current_local_description {
            Some(desc) => desc,
            None => return true,
        };

        let len_data_channel = {
            let data_channels = params.sctp_transport.data_channels.lock().await;
            data_channels.len()
        };
        if len_data_channel != 0 && have_data_channel(local_desc).is_none() {
            return true;
        }

        let transceivers = params.transceivers.lock().await;
        for t in &*transceivers {
            let mid = t.mid().await;
            let m = get_by_mid(mid.as_str(), local_desc);

            if !t.stopped.load(Ordering::SeqCst) && m.is_none() {
                return true;
            }

            if !t.stopped.load(Ordering::SeqCst) {
                if let Some(m) = m {
                    if t.direction() == RtpTransceiverDirection::Sendrecv
                        || t.direction() == RtpTransceiverDirection::Sendonly
                    {
                        if let (Some(Some(desc_msid)), Some(sender)) =
                            (m.attribute("msid"), t.sender().await)
                        {
                            if let Some(track) = &sender.track().await {
                                if desc_msid
                                    != track.stream_id().to_owned() + " " + track.id()
                                {
                                    return true;
                                }
                            }
                        } else {
                            return true;
                        }
                    }
                    match local_desc.sdp_type {
                        SdpType::Offer => {
                            let current_remote_description =
                                params.current_remote_description.lock().await;
                            match &*current_remote_description {
                                Some(remote_desc) => {
                                    if let Some(rm) = get_by_mid(mid.as_str(), remote_desc) {
                                        if get_peer_direction(m) != t.direction()
                                            && get_peer_direction(rm) != t.direction().reverse()
                                        {
                                            return true;
                                        }
                                    } else {
                                        return true;
                                    }
                                }
                                None => return true,
                            }
                        }
                        SdpType::Answer => {
                            if m.attribute(t.direction().to_string().as_str()).is_none() {
                                return true;
                            }
                        }
                        _ => {}
                    };
                }
            }

            if t.stopped.load(Ordering::SeqCst) && !mid.is_empty() {
                let current_remote_description = params.current_remote_description.lock().await;
                if let Some(remote_desc) = &*current_remote_description {
                    if get_by_mid(mid.as_str(), local_desc).is_some()
                        || get_by_mid(mid.as_str(), remote_desc).is_some()
                    {
                        return true;
                    }
                }
            }
        }

        false
    }

    /// create_offer generates a description that proposes the current
    /// local transceiver set to the remote.
    pub async fn create_offer(&self, options: Option<OfferOptions>) -> Result<SessionDescription> {
        if self.internal.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        if let Some(options) = options {
            if options.ice_restart {
                self.internal.ice_transport.restart().await?;
            }
        }

        // Transceivers added while the offer is generated (say, a video
        // transceiver racing an audio-only offer) force a regeneration.
        let mut count = 0;
        let mut offer;

        loop {
            let current_transceivers = {
                let transceivers = self.internal.transceivers.lock().await;
                transceivers.clone()
            };

            let is_plan_b = {
                let current_remote_description =
                    self.internal.current_remote_description.lock().await;
                if current_remote_description.is_some() {
                    description_is_plan_b(current_remote_description.as_ref())?
                } else {
                    self.configuration.sdp_semantics == SdpSemantics::PlanB
                }
            };

            if !is_plan_b {
                // a fresh mid must exceed everything the remote assigned
                {
                    let current_remote_description =
                        self.internal.current_remote_description.lock().await;
                    if let Some(d) = &*current_remote_description {
                        if let Some(parsed) = &d.parsed {
                            for media in &parsed.media_descriptions {
                                if let Some(mid) = get_mid_value(media) {
                                    if mid.is_empty() {
                                        continue;
                                    }
                                    let numeric_mid = match mid.parse::<isize>() {
                                        Ok(n) => n,
                                        Err(_) => continue,
                                    };
                                    if numeric_mid
                                        > self.internal.greater_mid.load(Ordering::SeqCst)
                                    {
                                        self.internal
                                            .greater_mid
                                            .store(numeric_mid, Ordering::SeqCst);
                                    }
                                }
                            }
                        }
                    }
                }
                for t in &current_transceivers {
                    if !t.mid().await.is_empty() {
                        continue;
                    }
                    let greater_mid = self.internal.greater_mid.fetch_add(1, Ordering::SeqCst);
                    t.set_mid(format!("{}", greater_mid + 1)).await?;
                }
            }

            let current_remote_description_is_none = {
                let current_remote_description =
                    self.internal.current_remote_description.lock().await;
                current_remote_description.is_none()
            };

            let mut d = if current_remote_description_is_none {
                self.internal
                    .generate_unmatched_sdp(
                        current_transceivers,
                        self.configuration.sdp_semantics,
                    )
                    .await?
            } else {
                self.internal
                    .generate_matched_sdp(
                        current_transceivers,
                        true, /* include_unmatched */
                        DEFAULT_DTLS_ROLE_OFFER.to_connection_role(),
                        self.configuration.sdp_semantics,
                    )
                    .await?
            };

            {
                let mut sdp_origin = self.internal.sdp_origin.lock().await;
                let last_offer = self.internal.last_offer.lock().await;
                update_sdp_origin(&mut sdp_origin, &mut d, &last_offer);
            }
            let sdp = d.marshal();

            offer = SessionDescription {
                sdp_type: SdpType::Offer,
                sdp,
                parsed: Some(d),
            };

            if is_plan_b || !self.internal.has_local_description_changed(&offer).await {
                break;
            }
            count += 1;
            if count >= OFFER_GENERATION_ATTEMPTS {
                return Err(Error::ErrExcessiveRetries);
            }
        }

        {
            let mut last_offer = self.internal.last_offer.lock().await;
            *last_offer = offer.sdp.clone();
        }
        Ok(offer)
    }

    /// create_answer generates the response to the applied remote offer.
    pub async fn create_answer(
        &self,
        _options: Option<AnswerOptions>,
    ) -> Result<SessionDescription> {
        if self.remote_description().await.is_none() {
            return Err(Error::ErrNoRemoteDescription);
        } else if self.internal.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        } else if self.signaling_state() != SignalingState::HaveRemoteOffer
            && self.signaling_state() != SignalingState::HaveLocalPranswer
        {
            return Err(Error::ErrIncorrectSignalingState);
        }

        let mut connection_role = self
            .internal
            .setting_engine
            .answering_dtls_role
            .to_connection_role();
        if connection_role == ConnectionRole::Unspecified {
            connection_role = DEFAULT_DTLS_ROLE_ANSWER.to_connection_role();
        }

        let local_transceivers = self.get_transceivers().await;
        let mut d = self
            .internal
            .generate_matched_sdp(
                local_transceivers,
                false, /* include_unmatched */
                connection_role,
                self.configuration.sdp_semantics,
            )
            .await?;

        {
            let mut sdp_origin = self.internal.sdp_origin.lock().await;
            let last_answer = self.internal.last_answer.lock().await;
            update_sdp_origin(&mut sdp_origin, &mut d, &last_answer);
        }
        let sdp = d.marshal();

        let answer = SessionDescription {
            sdp_type: SdpType::Answer,
            sdp,
            parsed: Some(d),
        };

        {
            let mut last_answer = self.internal.last_answer.lock().await;
            *last_answer = answer.sdp.clone();
        }
        Ok(answer)
    }

    /// set_description runs the JSEP state machine over one description.
    /// A rejected transition leaves every piece of state untouched.
    pub(crate) async fn set_description(
        &self,
        sd: &SessionDescription,
        op: StateChangeOp,
    ) -> Result<()> {
        if self.internal.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        } else if sd.sdp_type == SdpType::Unspecified {
            return Err(Error::ErrSdpTypeInvalid);
        }

        let next_state = {
            let cur = self.signaling_state();

            match op {
                StateChangeOp::SetLocal => {
                    match sd.sdp_type {
                        // stable->SetLocal(offer)->have-local-offer
                        SdpType::Offer => {
                            let changed = {
                                let last_offer = self.internal.last_offer.lock().await;
                                sd.sdp != *last_offer
                            };
                            if changed {
                                Err(Error::ErrSdpDoesNotMatchOffer)
                            } else {
                                let next_state = check_next_signaling_state(
                                    cur,
                                    SignalingState::HaveLocalOffer,
                                    StateChangeOp::SetLocal,
                                    sd.sdp_type,
                                );
                                if next_state.is_ok() {
                                    let mut pending =
                                        self.internal.pending_local_description.lock().await;
                                    *pending = Some(sd.clone());
                                }
                                next_state
                            }
                        }
                        // have-remote-offer->SetLocal(answer)->stable
                        // have-local-pranswer->SetLocal(answer)->stable
                        SdpType::Answer => {
                            let changed = {
                                let last_answer = self.internal.last_answer.lock().await;
                                sd.sdp != *last_answer
                            };
                            if changed {
                                Err(Error::ErrSdpDoesNotMatchAnswer)
                            } else {
                                let next_state = check_next_signaling_state(
                                    cur,
                                    SignalingState::Stable,
                                    StateChangeOp::SetLocal,
                                    sd.sdp_type,
                                );
                                if next_state.is_ok() {
                                    let pending_remote_description = {
                                        let mut pending =
                                            self.internal.pending_remote_description.lock().await;
                                        pending.take()
                                    };
                                    {
                                        let mut pending =
                                            self.internal.pending_local_description.lock().await;
                                        pending.take();
                                    }
                                    {
                                        let mut current =
                                            self.internal.current_local_description.lock().await;
                                        *current = Some(sd.clone());
                                    }
                                    {
                                        let mut current =
                                            self.internal.current_remote_description.lock().await;
                                        *current = pending_remote_description;
                                    }
                                }
                                next_state
                            }
                        }
                        SdpType::Rollback => {
                            let next_state = check_next_signaling_state(
                                cur,
                                SignalingState::Stable,
                                StateChangeOp::SetLocal,
                                sd.sdp_type,
                            );
                            if next_state.is_ok() {
                                let mut pending =
                                    self.internal.pending_local_description.lock().await;
                                *pending = None;
                            }
                            next_state
                        }
                        // have-remote-offer->SetLocal(pranswer)->have-local-pranswer
                        SdpType::Pranswer => {
                            let changed = {
                                let last_answer = self.internal.last_answer.lock().await;
                                sd.sdp != *last_answer
                            };
                            if changed {
                                Err(Error::ErrSdpDoesNotMatchAnswer)
                            } else {
                                let next_state = check_next_signaling_state(
                                    cur,
                                    SignalingState::HaveLocalPranswer,
                                    StateChangeOp::SetLocal,
                                    sd.sdp_type,
                                );
                                if next_state.is_ok() {
                                    let mut pending =
                                        self.internal.pending_local_description.lock().await;
                                    *pending = Some(sd.clone());
                                }
                                next_state
                            }
                        }
                        _ => Err(Error::ErrSignalingStateProposedTransitionInvalid {
                            from: cur,
                            applying: sd.sdp_type,
                            is_local: true,
                        }),
                    }
                }
                StateChangeOp::SetRemote => {
                    match sd.sdp_type {
                        // stable->SetRemote(offer)->have-remote-offer
                        SdpType::Offer => {
                            let next_state = check_next_signaling_state(
                                cur,
                                SignalingState::HaveRemoteOffer,
                                StateChangeOp::SetRemote,
                                sd.sdp_type,
                            );
                            if next_state.is_ok() {
                                let mut pending =
                                    self.internal.pending_remote_description.lock().await;
                                *pending = Some(sd.clone());
                            }
                            next_state
                        }
                        // have-local-offer->SetRemote(answer)->stable
                        // have-remote-pranswer->SetRemote(answer)->stable
                        SdpType::Answer => {
                            let next_state = check_next_signaling_state(
                                cur,
                                SignalingState::Stable,
                                StateChangeOp::SetRemote,
                                sd.sdp_type,
                            );
                            if next_state.is_ok() {
                                let pending_local_description = {
                                    let mut pending =
                                        self.internal.pending_local_description.lock().await;
                                    pending.take()
                                };
                                {
                                    let mut pending =
                                        self.internal.pending_remote_description.lock().await;
                                    pending.take();
                                }
                                {
                                    let mut current =
                                        self.internal.current_remote_description.lock().await;
                                    *current = Some(sd.clone());
                                }
                                {
                                    let mut current =
                                        self.internal.current_local_description.lock().await;
                                    *current = pending_local_description;
                                }
                            }
                            next_state
                        }
                        SdpType::Rollback => {
                            let next_state = check_next_signaling_state(
                                cur,
                                SignalingState::Stable,
                                StateChangeOp::SetRemote,
                                sd.sdp_type,
                            );
                            if next_state.is_ok() {
                                let mut pending =
                                    self.internal.pending_remote_description.lock().await;
                                *pending = None;
                            }
                            next_state
                        }
                        // have-local-offer->SetRemote(pranswer)->have-remote-pranswer
                        SdpType::Pranswer => {
                            let next_state = check_next_signaling_state(
                                cur,
                                SignalingState::HaveRemotePranswer,
                                StateChangeOp::SetRemote,
                                sd.sdp_type,
                            );
                            if next_state.is_ok() {
                                let mut pending =
                                    self.internal.pending_remote_description.lock().await;
                                *pending = Some(sd.clone());
                            }
                            next_state
                        }
                        _ => Err(Error::ErrSignalingStateProposedTransitionInvalid {
                            from: cur,
                            applying: sd.sdp_type,
                            is_local: false,
                        }),
                    }
                }
            }
        };

        match next_state {
            Ok(next_state) => {
                self.internal
                    .signaling_state
                    .store(next_state as u8, Ordering::SeqCst);
                if self.signaling_state() == SignalingState::Stable {
                    // returning to stable resets the flag, then re-checks
                    self.internal
                        .is_negotiation_needed
                        .store(false, Ordering::SeqCst);
                    PeerConnection::do_negotiation_needed(
                        self.internal.negotiation_needed_params(),
                    )
                    .await;
                }
                self.do_signaling_state_change(next_state).await;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// set_local_description applies a locally generated description.
    pub async fn set_local_description(&self, mut desc: SessionDescription) -> Result<()> {
        if self.internal.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        let have_local_description = {
            let current = self.internal.current_local_description.lock().await;
            current.is_some()
        };

        // JSEP 5.4: an empty sdp re-applies the last generated description
        if desc.sdp.is_empty() {
            match desc.sdp_type {
                SdpType::Answer | SdpType::Pranswer => {
                    let last_answer = self.internal.last_answer.lock().await;
                    desc.sdp = last_answer.clone();
                }
                SdpType::Offer => {
                    let last_offer = self.internal.last_offer.lock().await;
                    desc.sdp = last_offer.clone();
                }
                _ => return Err(Error::ErrSdpTypeInvalidSetLocalDescription),
            }
        }

        desc.parsed = Some(desc.unmarshal()?);
        self.set_description(&desc, StateChangeOp::SetLocal).await?;

        let we_answer = desc.sdp_type == SdpType::Answer;
        let remote_description = self.remote_description().await;
        if we_answer {
            if let Some(parsed) = &desc.parsed {
                // a local answer pins current directions verbatim
                self.update_current_directions(parsed, true).await;
            }

            if let Some(remote_desc) = remote_description {
                self.start_rtp_senders().await?;

                let inner = Arc::clone(&self.internal);
                let sdp_semantics = self.configuration.sdp_semantics;
                let remote_desc = Arc::new(remote_desc);
                self.internal
                    .ops
                    .enqueue(Operation::new(
                        move || {
                            Box::pin(async move {
                                let _ = inner
                                    .start_rtp(have_local_description, remote_desc, sdp_semantics)
                                    .await;
                            })
                        },
                        "set_local_description start_rtp",
                    ))
                    .await;
            }
        }

        if self.internal.ice_gatherer.state() == IceGathererState::New {
            self.internal.ice_gatherer.gather().await
        } else {
            Ok(())
        }
    }

    /// set_remote_description applies the remote peer's description.
    pub async fn set_remote_description(&self, mut desc: SessionDescription) -> Result<()> {
        if self.internal.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        let is_renegotiation = {
            let current = self.internal.current_remote_description.lock().await;
            current.is_some()
        };

        desc.parsed = Some(desc.unmarshal()?);
        self.set_description(&desc, StateChangeOp::SetRemote).await?;

        let parsed = match &desc.parsed {
            Some(parsed) => parsed.clone(),
            None => return Err(Error::ErrRemoteDescriptionNil),
        };

        self.internal
            .media_engine
            .update_from_remote_description(&parsed)
            .await?;

        // encodings the remote cannot repair are dropped from our senders
        self.internal.disable_repair_streams_if_unsupported().await;

        let mut local_transceivers = self.get_transceivers().await;
        let remote_description = self.remote_description().await;
        let detected_plan_b = description_is_plan_b(remote_description.as_ref())?;
        let we_offer = desc.sdp_type == SdpType::Answer;

        if !we_offer && !detected_plan_b {
            // every remote media section finds or creates a transceiver
            if let Some(remote_desc) = &remote_description {
                if let Some(parsed) = &remote_desc.parsed {
                    for media in &parsed.media_descriptions {
                        let mid_value = match get_mid_value(media) {
                            Some(m) if !m.is_empty() => m,
                            _ => return Err(Error::ErrRemoteDescriptionWithoutMidValue),
                        };

                        if media.media_name.media == MEDIA_SECTION_APPLICATION {
                            continue;
                        }

                        let kind = MediaKind::from(media.media_name.media.as_str());
                        let direction = get_peer_direction(media);
                        if kind == MediaKind::Unspecified
                            || direction == RtpTransceiverDirection::Unspecified
                        {
                            continue;
                        }

                        let t = if let Some(t) =
                            find_by_mid(mid_value, &mut local_transceivers).await
                        {
                            if direction == RtpTransceiverDirection::Inactive {
                                t.stop().await?;
                            }
                            Some(t)
                        } else {
                            satisfy_type_and_direction(kind, direction, &mut local_transceivers)
                                .await
                        };

                        match t {
                            Some(t) => {
                                // adjust our direction to mirror theirs
                                if direction == RtpTransceiverDirection::Recvonly {
                                    if t.direction() == RtpTransceiverDirection::Sendrecv {
                                        t.set_direction(RtpTransceiverDirection::Sendonly);
                                    }
                                } else if direction == RtpTransceiverDirection::Sendrecv
                                    && t.direction() == RtpTransceiverDirection::Sendonly
                                {
                                    t.set_direction(RtpTransceiverDirection::Sendrecv);
                                }

                                if t.mid().await.is_empty() {
                                    t.set_mid(mid_value.to_owned()).await?;
                                }
                            }
                            None => {
                                let interceptor = self
                                    .internal
                                    .interceptor
                                    .upgrade()
                                    .ok_or(Error::ErrInterceptorNotBind)?;
                                let receiver = Arc::new(RtpReceiver::new(
                                    self.internal.setting_engine.get_receive_mtu(),
                                    kind,
                                    Arc::clone(&self.internal.dtls_transport),
                                    Arc::clone(&self.internal.media_engine),
                                    interceptor,
                                ));

                                let local_direction =
                                    if direction == RtpTransceiverDirection::Recvonly {
                                        RtpTransceiverDirection::Sendonly
                                    } else {
                                        RtpTransceiverDirection::Recvonly
                                    };

                                // a transceiver created by the remote
                                // adopts the remote codec intersection
                                let codecs = crate::peer::sdp::codecs_from_media_description(
                                    media,
                                )
                                .unwrap_or_default();
                                let filtered = crate::transceiver::receiver::ReceiverInternal::filter_codecs(
                                    &codecs,
                                    kind,
                                    &self.internal.media_engine,
                                )
                                .await;

                                let t = RtpTransceiver::new(
                                    Some(receiver),
                                    None,
                                    local_direction,
                                    kind,
                                    filtered,
                                    Arc::clone(&self.internal.media_engine),
                                )
                                .await;

                                self.internal.add_transceiver(Arc::clone(&t)).await;

                                if t.mid().await.is_empty() {
                                    t.set_mid(mid_value.to_owned()).await?;
                                }
                            }
                        }
                    }
                }
            }
        }

        let (remote_ufrag, remote_pwd, candidates) =
            crate::peer::sdp::extract_ice_details(&parsed)?;

        if is_renegotiation
            && self
                .internal
                .ice_transport
                .have_remote_credentials_change(&remote_ufrag, &remote_pwd)
                .await
        {
            // fresh credentials mean an ICE restart; implicit only when
            // the remote offered it
            if !we_offer {
                self.internal.ice_transport.restart().await?;
            }

            self.internal
                .ice_transport
                .set_remote_credentials(remote_ufrag.clone(), remote_pwd.clone())
                .await?;
        }

        for candidate in candidates {
            self.internal
                .ice_transport
                .add_remote_candidate(Some(candidate))
                .await?;
        }

        if is_renegotiation {
            if we_offer {
                self.update_current_directions(&parsed, false).await;
                self.start_rtp_senders().await?;

                let inner = Arc::clone(&self.internal);
                let sdp_semantics = self.configuration.sdp_semantics;
                let remote_desc = Arc::new(desc);
                self.internal
                    .ops
                    .enqueue(Operation::new(
                        move || {
                            Box::pin(async move {
                                let _ = inner.start_rtp(true, remote_desc, sdp_semantics).await;
                            })
                        },
                        "set_remote_description renegotiation start_rtp",
                    ))
                    .await;
            }
            return Ok(());
        }

        let remote_is_lite = parsed
            .attributes
            .iter()
            .any(|a| a.key.trim() == "ice-lite");

        let (fingerprint, fingerprint_hash) = crate::peer::sdp::extract_fingerprint(&parsed)?;

        // If exactly one side is lite the full agent takes the controlling
        // role; otherwise the offerer controls. RFC 8445 S6.1.1
        let local_is_lite = self.internal.setting_engine.candidates.ice_lite;
        let ice_role = if (we_offer && remote_is_lite == local_is_lite)
            || (remote_is_lite && !local_is_lite)
        {
            IceRole::Controlling
        } else {
            IceRole::Controlled
        };

        if we_offer {
            self.update_current_directions(&parsed, false).await;
            self.start_rtp_senders().await?;
        }

        let inner = Arc::clone(&self.internal);
        let sdp_semantics = self.configuration.sdp_semantics;
        let dtls_role = DtlsRole::from(&parsed);
        let remote_desc = Arc::new(desc);
        self.internal
            .ops
            .enqueue(Operation::new(
                move || {
                    Box::pin(async move {
                        log::trace!(
                            "start_transports: ice_role={}, dtls_role={}",
                            ice_role,
                            dtls_role,
                        );
                        inner
                            .start_transports(
                                ice_role,
                                dtls_role,
                                remote_ufrag,
                                remote_pwd,
                                fingerprint,
                                fingerprint_hash,
                            )
                            .await;

                        if we_offer {
                            let _ = inner.start_rtp(false, remote_desc, sdp_semantics).await;
                        }
                    })
                },
                "set_remote_description start_transports",
            ))
            .await;

        Ok(())
    }

    /// update_current_directions records the negotiated direction on every
    /// transceiver named by an applied answer. A local answer carries our
    /// direction verbatim, a remote one reversed.
    async fn update_current_directions(
        &self,
        parsed: &::sdp::description::session::SessionDescription,
        is_local_answer: bool,
    ) {
        let mut transceivers = self.get_transceivers().await;
        for media in &parsed.media_descriptions {
            if media.media_name.media == MEDIA_SECTION_APPLICATION {
                continue;
            }
            let mid_value = match get_mid_value(media) {
                Some(mid) if !mid.is_empty() => mid,
                _ => continue,
            };
            let direction = get_peer_direction(media);
            if direction == RtpTransceiverDirection::Unspecified {
                continue;
            }

            if let Some(t) = find_by_mid(mid_value, &mut transceivers).await {
                t.set_current_direction(if is_local_answer {
                    direction
                } else {
                    direction.reverse()
                });
            }
        }
    }

    /// start_rtp_senders starts every negotiated sender that has not sent
    /// yet.
    pub(crate) async fn start_rtp_senders(&self) -> Result<()> {
        let current_transceivers = self.internal.transceivers.lock().await;
        for transceiver in &*current_transceivers {
            if let Some(sender) = transceiver.sender().await {
                if sender.is_negotiated() && !sender.has_sent().await {
                    sender.send(&sender.get_parameters().await).await?;
                }
            }
        }

        Ok(())
    }

    /// local_description is the pending description when one exists,
    /// otherwise the current one, with gathered candidates folded in.
    pub async fn local_description(&self) -> Option<SessionDescription> {
        if let Some(pending) = self.pending_local_description().await {
            return Some(pending);
        }
        self.current_local_description().await
    }

    /// remote_description is the pending remote description, otherwise the
    /// current one.
    pub async fn remote_description(&self) -> Option<SessionDescription> {
        self.internal.remote_description().await
    }

    /// add_ice_candidate feeds a trickled remote candidate, with or
    /// without its `candidate:` prefix. Candidates that fail to parse are
    /// logged and dropped, not surfaced as errors.
    pub async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        if self.remote_description().await.is_none() {
            return Err(Error::ErrNoRemoteDescription);
        }

        let candidate_value = match candidate.candidate.strip_prefix("candidate:") {
            Some(s) => s,
            None => candidate.candidate.as_str(),
        };

        let ice_candidate = if !candidate_value.is_empty() {
            match unmarshal_candidate(candidate_value) {
                Ok(c) => {
                    let candidate: Arc<dyn Candidate + Send + Sync> = Arc::new(c);
                    Some(IceCandidate::from(&candidate))
                }
                Err(err) => {
                    log::warn!("dropping unparsable candidate {}: {}", candidate_value, err);
                    return Ok(());
                }
            }
        } else {
            None
        };

        self.internal
            .ice_transport
            .add_remote_candidate(ice_candidate)
            .await
    }

    /// ice_connection_state is the ICE side of the aggregate state.
    pub fn ice_connection_state(&self) -> IceConnectionState {
        self.internal
            .ice_connection_state
            .load(Ordering::SeqCst)
            .into()
    }

    /// get_senders lists the senders of every transceiver.
    pub async fn get_senders(&self) -> Vec<Arc<RtpSender>> {
        let mut senders = vec![];
        let transceivers = self.internal.transceivers.lock().await;
        for transceiver in &*transceivers {
            if let Some(sender) = transceiver.sender().await {
                senders.push(sender);
            }
        }
        senders
    }

    /// get_receivers lists the receivers of every transceiver.
    pub async fn get_receivers(&self) -> Vec<Arc<RtpReceiver>> {
        let mut receivers = vec![];
        let transceivers = self.internal.transceivers.lock().await;
        for transceiver in &*transceivers {
            if let Some(receiver) = transceiver.receiver().await {
                receivers.push(receiver);
            }
        }
        receivers
    }

    /// get_transceivers snapshots the transceiver set.
    pub async fn get_transceivers(&self) -> Vec<Arc<RtpTransceiver>> {
        let transceivers = self.internal.transceivers.lock().await;
        transceivers.clone()
    }

    /// add_track attaches an outbound track, reusing a sender-less
    /// transceiver of the right kind when one exists.
    pub async fn add_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<Arc<RtpSender>> {
        if self.internal.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        let reusable = {
            let transceivers = self.internal.transceivers.lock().await;
            let mut found = None;
            for t in &*transceivers {
                if !t.stopped.load(Ordering::SeqCst)
                    && t.kind == track.kind()
                    && t.sender().await.is_none()
                {
                    found = Some(Arc::clone(t));
                    break;
                }
            }
            found
        };

        if let Some(t) = reusable {
            let interceptor = self
                .internal
                .interceptor
                .upgrade()
                .ok_or(Error::ErrInterceptorNotBind)?;
            let sender = Arc::new(
                RtpSender::new(
                    self.internal.setting_engine.get_receive_mtu(),
                    Arc::clone(&track),
                    Arc::clone(&self.internal.dtls_transport),
                    Arc::clone(&self.internal.media_engine),
                    interceptor,
                )
                .await,
            );

            if let Err(err) = t
                .set_sender_track(Some(Arc::clone(&sender)), Some(Arc::clone(&track)))
                .await
            {
                let _ = sender.stop().await;
                t.set_sender(None).await;
                return Err(err);
            }

            self.internal.trigger_negotiation_needed().await;
            return Ok(sender);
        }

        let transceiver = self
            .internal
            .new_transceiver_from_track(RtpTransceiverDirection::Sendrecv, track)
            .await?;
        self.internal
            .add_transceiver(Arc::clone(&transceiver))
            .await;

        match transceiver.sender().await {
            Some(sender) => Ok(sender),
            None => Err(Error::ErrSenderMissing),
        }
    }

    /// remove_track detaches a sender created by this connection.
    pub async fn remove_track(&self, sender: &Arc<RtpSender>) -> Result<()> {
        if self.internal.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        let mut transceiver = None;
        {
            let transceivers = self.internal.transceivers.lock().await;
            for t in &*transceivers {
                if let Some(s) = t.sender().await {
                    if s.id == sender.id {
                        transceiver = Some(t.clone());
                        break;
                    }
                }
            }
        }

        let t = transceiver.ok_or(Error::ErrSenderNotCreatedByConnection)?;
        if sender.stop().await.is_ok() && t.set_sending_track(None).await.is_ok() {
            self.internal.trigger_negotiation_needed().await;
        }
        Ok(())
    }

    /// add_transceiver_from_kind creates a transceiver with a generated
    /// track (when sending) or only a receiver.
    pub async fn add_transceiver_from_kind(
        &self,
        kind: MediaKind,
        init: &[RtpTransceiverInit],
    ) -> Result<Arc<RtpTransceiver>> {
        self.internal.add_transceiver_from_kind(kind, init).await
    }

    /// add_transceiver_from_track creates a sendrecv or sendonly
    /// transceiver around the given track.
    pub async fn add_transceiver_from_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
        init: &[RtpTransceiverInit],
    ) -> Result<Arc<RtpTransceiver>> {
        if self.internal.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        let direction = match init.len() {
            0 => RtpTransceiverDirection::Sendrecv,
            1 => init[0].direction,
            _ => return Err(Error::ErrTransceiverOneInitOnly),
        };

        let t = self
            .internal
            .new_transceiver_from_track(direction, track)
            .await?;

        self.internal.add_transceiver(Arc::clone(&t)).await;

        Ok(t)
    }

    /// create_data_channel opens a channel with the given label; channels
    /// created while SCTP is already connected open without renegotiation.
    pub async fn create_data_channel(
        &self,
        label: &str,
        options: Option<DataChannelInit>,
    ) -> Result<Arc<DataChannel>> {
        if self.internal.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        if label.len() > 65535 {
            return Err(Error::ErrStringSizeLimit);
        }

        let mut params = DataChannelParameters {
            label: label.to_owned(),
            ordered: true,
            ..Default::default()
        };

        if let Some(options) = options {
            if let Some(id) = options.id {
                params.id = id;
            }
            if let Some(ordered) = options.ordered {
                params.ordered = ordered;
            }
            if let Some(max_packet_life_time) = options.max_packet_life_time {
                params.max_packet_life_time = max_packet_life_time;
            }
            if let Some(max_retransmits) = options.max_retransmits {
                params.max_retransmits = max_retransmits;
            }
            if let Some(protocol) = options.protocol {
                params.protocol = protocol;
            }
            if params.protocol.len() > 65535 {
                return Err(Error::ErrProtocolTooLarge);
            }
            if let Some(negotiated) = options.negotiated {
                params.negotiated = negotiated;
                if negotiated && options.id.is_none() {
                    return Err(Error::ErrNegotiatedWithoutId);
                }
            }
        }

        // the reliability bounds are mutually exclusive
        if params.max_packet_life_time != 0 && params.max_retransmits != 0 {
            return Err(Error::ErrRetransmitsOrPacketLifeTime);
        }

        let d = Arc::new(DataChannel::new(
            params,
            Arc::clone(&self.internal.setting_engine),
        ));

        {
            let mut data_channels = self.internal.sctp_transport.data_channels.lock().await;
            data_channels.push(Arc::clone(&d));
        }
        self.internal
            .sctp_transport
            .data_channels_requested
            .fetch_add(1, Ordering::SeqCst);

        // an established association opens the channel immediately
        if self.internal.sctp_transport.state() == SctpTransportState::Connected {
            d.open(Arc::clone(&self.internal.sctp_transport)).await?;
        }

        self.internal.trigger_negotiation_needed().await;

        Ok(d)
    }

    /// set_identity_provider would configure an identity provider for
    /// assertion generation; identity assertions are not supported.
    pub fn set_identity_provider(&self, _provider: &str) -> Result<()> {
        Err(Error::ErrIdentityProviderNotSupported)
    }

    /// write_rtcp sends an application RTCP packet through the interceptor
    /// chain; without a connected peer it is silently discarded.
    pub async fn write_rtcp(
        &self,
        pkts: &[Box<dyn rtcp::packet::Packet + Send + Sync>],
    ) -> Result<usize> {
        let a = Attributes::new();
        Ok(self.interceptor_rtcp_writer.write(pkts, &a).await?)
    }

    /// close tears the connection down without waiting on background
    /// work. Idempotent; concurrent callers block until the first one
    /// finishes and then return Ok.
    pub async fn close(&self) -> Result<()> {
        self.close_internal(false).await
    }

    /// graceful_close additionally drains the operations chain, closes
    /// every data channel gracefully, and stops ICE last so in-flight
    /// traffic settles.
    pub async fn graceful_close(&self) -> Result<()> {
        self.close_internal(true).await
    }

    async fn close_internal(&self, graceful: bool) -> Result<()> {
        // the progress lock serializes concurrent closers; the loser
        // observes `closed` and only runs the graceful-only tail
        let mut progress = self.close_progress.lock().await;
        let mut close_errs = vec![];

        if !progress.closed {
            progress.closed = true;

            // no new descriptions, transceivers, channels or operations
            self.internal.is_closed.store(true, Ordering::SeqCst);
            if graceful {
                self.internal.ops.graceful_close().await;
            } else {
                self.internal.ops.close().await;
            }

            self.internal
                .signaling_state
                .store(SignalingState::Closed as u8, Ordering::SeqCst);

            {
                let mut transceivers = self.internal.transceivers.lock().await;
                for t in &*transceivers {
                    if let Err(err) = t.stop().await {
                        close_errs.push(Error::new(format!("transceiver: {err}")));
                    }
                }
                transceivers.clear();
            }

            {
                let data_channels = {
                    let data_channels =
                        self.internal.sctp_transport.data_channels.lock().await;
                    data_channels.clone()
                };
                for d in &data_channels {
                    let result = if graceful {
                        d.graceful_close().await
                    } else {
                        d.close().await
                    };
                    if let Err(err) = result {
                        close_errs.push(Error::new(format!("data_channel: {err}")));
                    }
                    d.set_ready_state(DataChannelState::Closed);
                }
                let mut data_channels = self.internal.sctp_transport.data_channels.lock().await;
                data_channels.clear();
            }

            if let Err(err) = self.internal.sctp_transport.stop().await {
                close_errs.push(Error::new(format!("sctp_transport: {err}")));
            }

            if let Err(err) = self.internal.dtls_transport.stop().await {
                close_errs.push(Error::new(format!("dtls_transport: {err}")));
            }

            if !graceful {
                if let Err(err) = self.internal.ice_transport.stop().await {
                    close_errs.push(Error::new(format!("ice_transport: {err}")));
                }
            }

            PeerConnection::update_connection_state(
                &self.internal.on_peer_connection_state_change_handler,
                &self.internal.is_closed,
                &self.internal.peer_connection_state,
                self.ice_connection_state(),
                self.internal.dtls_transport.state(),
            )
            .await;

            if let Err(err) = self.interceptor.close().await {
                close_errs.push(Error::new(format!("interceptor: {err}")));
            }
        } else if graceful {
            // a non-graceful close may have won the race; the chain drain
            // is still owed to this caller
            self.internal.ops.graceful_close().await;
        }

        if graceful && !progress.gracefully_closed {
            progress.gracefully_closed = true;

            // ICE goes last on the graceful path
            if let Err(err) = self.internal.ice_transport.stop().await {
                close_errs.push(Error::new(format!("ice_transport: {err}")));
            }
        }

        flatten_errs(close_errs)
    }

    /// current_local_description is the last description negotiation
    /// settled on, with any candidates gathered since folded in.
    pub async fn current_local_description(&self) -> Option<SessionDescription> {
        let local_description = {
            let current = self.internal.current_local_description.lock().await;
            current.clone()
        };
        let ice_gatherer = Some(&self.internal.ice_gatherer);
        let ice_gathering_state = self.ice_gathering_state();

        populate_local_candidates(local_description.as_ref(), ice_gatherer, ice_gathering_state)
            .await
    }

    /// pending_local_description is the description still being
    /// negotiated, empty in stable.
    pub async fn pending_local_description(&self) -> Option<SessionDescription> {
        let local_description = {
            let pending = self.internal.pending_local_description.lock().await;
            pending.clone()
        };
        let ice_gatherer = Some(&self.internal.ice_gatherer);
        let ice_gathering_state = self.ice_gathering_state();

        populate_local_candidates(local_description.as_ref(), ice_gatherer, ice_gathering_state)
            .await
    }

    /// current_remote_description is the remote half of the last settled
    /// negotiation.
    pub async fn current_remote_description(&self) -> Option<SessionDescription> {
        let current = self.internal.current_remote_description.lock().await;
        current.clone()
    }

    /// pending_remote_description is the remote description still being
    /// negotiated, empty in stable.
    pub async fn pending_remote_description(&self) -> Option<SessionDescription> {
        let pending = self.internal.pending_remote_description.lock().await;
        pending.clone()
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.internal.signaling_state.load(Ordering::SeqCst).into()
    }

    pub fn ice_gathering_state(&self) -> IceGatheringState {
        self.internal.ice_gathering_state()
    }

    /// connection_state is the aggregate derived from the transports.
    pub fn connection_state(&self) -> PeerConnectionState {
        self.internal
            .peer_connection_state
            .load(Ordering::SeqCst)
            .into()
    }

    /// sctp exposes the SCTP transport carrying the data channels.
    pub fn sctp(&self) -> Arc<SctpTransport> {
        Arc::clone(&self.internal.sctp_transport)
    }

    /// gathering_complete_promise returns a channel that closes once
    /// candidate gathering finishes, for endpoints that cannot trickle.
    /// Prefer trickling; waiting here lengthens connection setup.
    pub async fn gathering_complete_promise(&self) -> mpsc::Receiver<()> {
        let (gathering_complete_tx, gathering_complete_rx) = mpsc::channel(1);

        // Installing the handler races an already finished gathering, so
        // the state is checked afterwards as well.
        let done = Arc::new(Mutex::new(Some(gathering_complete_tx)));
        let done2 = Arc::clone(&done);
        self.internal
            .set_gather_complete_handler(Box::new(move || {
                let done3 = Arc::clone(&done2);
                Box::pin(async move {
                    let mut d = done3.lock().await;
                    d.take();
                })
            }))
            .await;

        if self.ice_gathering_state() == IceGatheringState::Complete {
            let mut d = done.lock().await;
            d.take();
        }

        gathering_complete_rx
    }
}
