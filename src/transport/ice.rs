use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use ice::agent::agent_config::AgentConfig;
use ice::agent::Agent;
use ice::candidate::{Candidate, CandidateType};
use ice::state::ConnectionState;
use ice::url::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use util::Conn;

use crate::api::setting_engine::SettingEngine;
use crate::configuration::IceServer;
use crate::configuration::IceTransportPolicy;
use crate::error::{Error, Result};
use crate::mux::endpoint::Endpoint;
use crate::mux::mux_func::MatchFunc;
use crate::mux::{Config as MuxConfig, Mux};
use crate::transport::candidate::{
    ice_candidates_from_agent, IceCandidate, IceCandidateType,
};
use crate::EventFuture;
use crate::RECEIVE_MTU;

/// IceParameters carries the local or remote ufrag/pwd pair.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    pub ice_lite: bool,
}

/// IceGathererState tracks the candidate-gathering lifecycle of the
/// gatherer itself.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum IceGathererState {
    #[default]
    Unspecified = 0,
    New,
    Gathering,
    Complete,
    Closed,
}

impl From<u8> for IceGathererState {
    fn from(v: u8) -> Self {
        match v {
            1 => IceGathererState::New,
            2 => IceGathererState::Gathering,
            3 => IceGathererState::Complete,
            4 => IceGathererState::Closed,
            _ => IceGathererState::Unspecified,
        }
    }
}

impl fmt::Display for IceGathererState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            IceGathererState::New => "new",
            IceGathererState::Gathering => "gathering",
            IceGathererState::Complete => "complete",
            IceGathererState::Closed => "closed",
            _ => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

/// IceGatheringState is the connection-level view of gathering progress.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum IceGatheringState {
    #[default]
    Unspecified,
    New,
    Gathering,
    Complete,
}

impl From<&str> for IceGatheringState {
    fn from(raw: &str) -> Self {
        match raw {
            "new" => IceGatheringState::New,
            "gathering" => IceGatheringState::Gathering,
            "complete" => IceGatheringState::Complete,
            _ => IceGatheringState::Unspecified,
        }
    }
}

impl fmt::Display for IceGatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            IceGatheringState::New => "new",
            IceGatheringState::Gathering => "gathering",
            IceGatheringState::Complete => "complete",
            _ => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

/// IceConnectionState tracks connectivity-check progress, mirroring the
/// agent's connection state.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum IceConnectionState {
    #[default]
    Unspecified = 0,
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl From<&str> for IceConnectionState {
    fn from(raw: &str) -> Self {
        match raw {
            "new" => IceConnectionState::New,
            "checking" => IceConnectionState::Checking,
            "connected" => IceConnectionState::Connected,
            "completed" => IceConnectionState::Completed,
            "disconnected" => IceConnectionState::Disconnected,
            "failed" => IceConnectionState::Failed,
            "closed" => IceConnectionState::Closed,
            _ => IceConnectionState::Unspecified,
        }
    }
}

impl From<u8> for IceConnectionState {
    fn from(v: u8) -> Self {
        match v {
            1 => IceConnectionState::New,
            2 => IceConnectionState::Checking,
            3 => IceConnectionState::Connected,
            4 => IceConnectionState::Completed,
            5 => IceConnectionState::Disconnected,
            6 => IceConnectionState::Failed,
            7 => IceConnectionState::Closed,
            _ => IceConnectionState::Unspecified,
        }
    }
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            IceConnectionState::New => "new",
            IceConnectionState::Checking => "checking",
            IceConnectionState::Connected => "connected",
            IceConnectionState::Completed => "completed",
            IceConnectionState::Disconnected => "disconnected",
            IceConnectionState::Failed => "failed",
            IceConnectionState::Closed => "closed",
            _ => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

/// IceTransportState is the transport-level equivalent.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum IceTransportState {
    #[default]
    Unspecified = 0,
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

impl From<u8> for IceTransportState {
    fn from(v: u8) -> Self {
        match v {
            1 => IceTransportState::New,
            2 => IceTransportState::Checking,
            3 => IceTransportState::Connected,
            4 => IceTransportState::Completed,
            5 => IceTransportState::Failed,
            6 => IceTransportState::Disconnected,
            7 => IceTransportState::Closed,
            _ => IceTransportState::Unspecified,
        }
    }
}

impl From<ConnectionState> for IceTransportState {
    fn from(raw: ConnectionState) -> Self {
        match raw {
            ConnectionState::New => IceTransportState::New,
            ConnectionState::Checking => IceTransportState::Checking,
            ConnectionState::Connected => IceTransportState::Connected,
            ConnectionState::Completed => IceTransportState::Completed,
            ConnectionState::Failed => IceTransportState::Failed,
            ConnectionState::Disconnected => IceTransportState::Disconnected,
            ConnectionState::Closed => IceTransportState::Closed,
            _ => IceTransportState::Unspecified,
        }
    }
}

impl fmt::Display for IceTransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            IceTransportState::New => "new",
            IceTransportState::Checking => "checking",
            IceTransportState::Connected => "connected",
            IceTransportState::Completed => "completed",
            IceTransportState::Failed => "failed",
            IceTransportState::Disconnected => "disconnected",
            IceTransportState::Closed => "closed",
            _ => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

/// IceRole is the agent's RFC 8445 role.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum IceRole {
    #[default]
    Unspecified,

    /// The agent nominating candidate pairs.
    Controlling,

    /// The agent waiting for nominations.
    Controlled,
}

impl fmt::Display for IceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            IceRole::Controlling => "controlling",
            IceRole::Controlled => "controlled",
            _ => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

/// IceCandidatePair is the local/remote pair packets currently flow over.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct IceCandidatePair {
    stats_id: String,
    pub local: IceCandidate,
    pub remote: IceCandidate,
}

impl fmt::Display for IceCandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(local) {} <-> (remote) {}", self.local, self.remote)
    }
}

impl IceCandidatePair {
    pub fn new(local: IceCandidate, remote: IceCandidate) -> Self {
        let stats_id = format!("{}-{}", local.stats_id, remote.stats_id);
        IceCandidatePair {
            stats_id,
            local,
            remote,
        }
    }
}

/// GatherOptions selects the servers and policy a gatherer works with.
#[derive(Default, Debug, Clone)]
pub struct GatherOptions {
    pub ice_servers: Vec<IceServer>,
    pub ice_gather_policy: IceTransportPolicy,
}

pub type OnLocalCandidateFn =
    Box<dyn (FnMut(Option<IceCandidate>) -> EventFuture) + Send + Sync>;
pub type OnGathererStateChangeFn =
    Box<dyn (FnMut(IceGathererState) -> EventFuture) + Send + Sync>;
pub type OnGatheringCompleteFn = Box<dyn (FnMut() -> EventFuture) + Send + Sync>;
pub type OnIceTransportStateChangeFn =
    Box<dyn (FnMut(IceTransportState) -> EventFuture) + Send + Sync>;
pub type OnSelectedCandidatePairChangeFn =
    Box<dyn (FnMut(IceCandidatePair) -> EventFuture) + Send + Sync>;

/// IceGatherer owns the ICE agent and collects local host, reflexive and
/// relay candidates.
#[derive(Default)]
pub struct IceGatherer {
    pub(crate) validated_servers: Vec<Url>,
    pub(crate) gather_policy: IceTransportPolicy,
    pub(crate) setting_engine: Arc<SettingEngine>,

    pub(crate) state: Arc<AtomicU8>,
    pub(crate) agent: Mutex<Option<Arc<Agent>>>,

    pub(crate) on_local_candidate_handler: Arc<ArcSwapOption<Mutex<OnLocalCandidateFn>>>,
    pub(crate) on_state_change_handler: Arc<ArcSwapOption<Mutex<OnGathererStateChangeFn>>>,

    // Backs the gathering-complete promise helper.
    pub(crate) on_gathering_complete_handler: Arc<ArcSwapOption<Mutex<OnGatheringCompleteFn>>>,
}

impl IceGatherer {
    pub(crate) fn new(
        validated_servers: Vec<Url>,
        gather_policy: IceTransportPolicy,
        setting_engine: Arc<SettingEngine>,
    ) -> Self {
        IceGatherer {
            gather_policy,
            validated_servers,
            setting_engine,
            state: Arc::new(AtomicU8::new(IceGathererState::New as u8)),
            ..Default::default()
        }
    }

    pub(crate) async fn create_agent(&self) -> Result<()> {
        // The lock is held for the whole function to keep a second caller
        // from racing a second agent into existence.
        let mut agent = self.agent.lock().await;
        if agent.is_some() || self.state() != IceGathererState::New {
            return Ok(());
        }

        let mut candidate_types = vec![];
        if self.setting_engine.candidates.ice_lite {
            candidate_types.push(CandidateType::Host);
        } else if self.gather_policy == IceTransportPolicy::Relay {
            candidate_types.push(CandidateType::Relay);
        }

        let nat_1to1_candidate_type = match self.setting_engine.candidates.nat_1to1_ip_candidate_type
        {
            IceCandidateType::Host => CandidateType::Host,
            IceCandidateType::Srflx => CandidateType::ServerReflexive,
            _ => CandidateType::Unspecified,
        };

        let mut config = AgentConfig {
            udp_network: self.setting_engine.udp_network.clone(),
            lite: self.setting_engine.candidates.ice_lite,
            urls: self.validated_servers.clone(),
            disconnected_timeout: self.setting_engine.timeout.ice_disconnected_timeout,
            failed_timeout: self.setting_engine.timeout.ice_failed_timeout,
            keepalive_interval: self.setting_engine.timeout.ice_keepalive_interval,
            candidate_types,
            host_acceptance_min_wait: self.setting_engine.timeout.ice_host_acceptance_min_wait,
            srflx_acceptance_min_wait: self.setting_engine.timeout.ice_srflx_acceptance_min_wait,
            prflx_acceptance_min_wait: self.setting_engine.timeout.ice_prflx_acceptance_min_wait,
            relay_acceptance_min_wait: self.setting_engine.timeout.ice_relay_acceptance_min_wait,
            interface_filter: self.setting_engine.candidates.interface_filter.clone(),
            nat_1to1_ips: self.setting_engine.candidates.nat_1to1_ips.clone(),
            nat_1to1_ip_candidate_type: nat_1to1_candidate_type,
            net: self.setting_engine.vnet.clone(),
            multicast_dns_mode: self.setting_engine.candidates.multicast_dns_mode,
            multicast_dns_host_name: self
                .setting_engine
                .candidates
                .multicast_dns_host_name
                .clone(),
            local_ufrag: self.setting_engine.candidates.username_fragment.clone(),
            local_pwd: self.setting_engine.candidates.password.clone(),
            ..Default::default()
        };

        let requested_network_types = if self.setting_engine.candidates.ice_network_types.is_empty()
        {
            ice::network_type::supported_network_types()
        } else {
            self.setting_engine.candidates.ice_network_types.clone()
        };
        config.network_types.extend(requested_network_types);

        *agent = Some(Arc::new(Agent::new(config).await?));

        Ok(())
    }

    /// gather starts candidate collection.
    pub async fn gather(&self) -> Result<()> {
        self.create_agent().await?;
        self.set_state(IceGathererState::Gathering).await;

        if let Some(agent) = self.get_agent().await {
            let state = Arc::clone(&self.state);
            let on_local_candidate_handler = Arc::clone(&self.on_local_candidate_handler);
            let on_state_change_handler = Arc::clone(&self.on_state_change_handler);
            let on_gathering_complete_handler = Arc::clone(&self.on_gathering_complete_handler);

            agent.on_candidate(Box::new(
                move |candidate: Option<Arc<dyn Candidate + Send + Sync>>| {
                    let state_clone = Arc::clone(&state);
                    let on_local_candidate_handler_clone = Arc::clone(&on_local_candidate_handler);
                    let on_state_change_handler_clone = Arc::clone(&on_state_change_handler);
                    let on_gathering_complete_handler_clone =
                        Arc::clone(&on_gathering_complete_handler);

                    Box::pin(async move {
                        if let Some(cand) = candidate {
                            if let Some(handler) = &*on_local_candidate_handler_clone.load() {
                                let mut f = handler.lock().await;
                                f(Some(IceCandidate::from(&cand))).await;
                            }
                        } else {
                            state_clone.store(IceGathererState::Complete as u8, Ordering::SeqCst);

                            if let Some(handler) = &*on_state_change_handler_clone.load() {
                                let mut f = handler.lock().await;
                                f(IceGathererState::Complete).await;
                            }

                            if let Some(handler) = &*on_gathering_complete_handler_clone.load() {
                                let mut f = handler.lock().await;
                                f().await;
                            }

                            // end-of-candidates is signaled by a None
                            if let Some(handler) = &*on_local_candidate_handler_clone.load() {
                                let mut f = handler.lock().await;
                                f(None).await;
                            }
                        }
                    })
                },
            ));

            agent.gather_candidates()?;
        }

        Ok(())
    }

    /// close prunes all local candidates and closes the agent's ports.
    pub async fn close(&self) -> Result<()> {
        self.set_state(IceGathererState::Closed).await;

        let agent = {
            let mut agent = self.agent.lock().await;
            agent.take()
        };
        if let Some(agent) = agent {
            agent.close().await?;
        }

        Ok(())
    }

    /// get_local_parameters returns the local ufrag/pwd.
    pub async fn get_local_parameters(&self) -> Result<IceParameters> {
        self.create_agent().await?;

        let (ufrag, pwd) = if let Some(agent) = self.get_agent().await {
            agent.get_local_user_credentials().await
        } else {
            return Err(Error::ErrIceAgentNotExist);
        };

        Ok(IceParameters {
            username_fragment: ufrag,
            password: pwd,
            ice_lite: false,
        })
    }

    /// get_local_candidates returns the candidates gathered so far.
    pub async fn get_local_candidates(&self) -> Result<Vec<IceCandidate>> {
        self.create_agent().await?;

        let ice_candidates = if let Some(agent) = self.get_agent().await {
            agent.get_local_candidates().await?
        } else {
            return Err(Error::ErrIceAgentNotExist);
        };

        Ok(ice_candidates_from_agent(&ice_candidates))
    }

    /// on_local_candidate fires for each new candidate; a `None` marks the
    /// end of gathering.
    pub fn on_local_candidate(&self, f: OnLocalCandidateFn) {
        self.on_local_candidate_handler
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_state_change fires whenever the gatherer state moves.
    pub fn on_state_change(&self, f: OnGathererStateChangeFn) {
        self.on_state_change_handler
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_gathering_complete fires once gathering has drained.
    pub fn on_gathering_complete(&self, f: OnGatheringCompleteFn) {
        self.on_gathering_complete_handler
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// state returns the gatherer's lifecycle state.
    pub fn state(&self) -> IceGathererState {
        self.state.load(Ordering::SeqCst).into()
    }

    pub(crate) async fn set_state(&self, s: IceGathererState) {
        self.state.store(s as u8, Ordering::SeqCst);

        if let Some(handler) = &*self.on_state_change_handler.load() {
            let mut f = handler.lock().await;
            f(s).await;
        }
    }

    pub(crate) async fn get_agent(&self) -> Option<Arc<Agent>> {
        let agent = self.agent.lock().await;
        agent.clone()
    }
}

#[derive(Default)]
struct IceTransportInternal {
    role: IceRole,
    conn: Option<Arc<dyn Conn + Send + Sync>>,
    mux: Option<Mux>,
    cancel_tx: Option<mpsc::Sender<()>>,
}

/// IceTransport drives connectivity checks over the gatherer's candidates
/// and owns the packet mux above the nominated pair.
#[derive(Default)]
pub struct IceTransport {
    gatherer: Arc<IceGatherer>,
    on_connection_state_change_handler: Arc<Mutex<Option<OnIceTransportStateChangeFn>>>,
    on_selected_candidate_pair_change_handler:
        Arc<Mutex<Option<OnSelectedCandidatePairChangeFn>>>,
    state: Arc<AtomicU8>,
    internal: Mutex<IceTransportInternal>,
}

impl IceTransport {
    pub(crate) fn new(gatherer: Arc<IceGatherer>) -> Self {
        IceTransport {
            state: Arc::new(AtomicU8::new(IceTransportState::New as u8)),
            gatherer,
            ..Default::default()
        }
    }

    /// get_selected_candidate_pair returns the pair packets are flowing
    /// over, if one has been nominated.
    pub async fn get_selected_candidate_pair(&self) -> Option<IceCandidatePair> {
        if let Some(agent) = self.gatherer.get_agent().await {
            if let Some(ice_pair) = agent.get_selected_candidate_pair() {
                let local = IceCandidate::from(&ice_pair.local);
                let remote = IceCandidate::from(&ice_pair.remote);
                return Some(IceCandidatePair::new(local, remote));
            }
        }
        None
    }

    /// start begins connectivity checks with the remote parameters in the
    /// given role.
    pub async fn start(&self, params: &IceParameters, role: Option<IceRole>) -> Result<()> {
        if self.state() != IceTransportState::New {
            return Err(Error::ErrIceTransportNotInNew);
        }

        self.ensure_gatherer().await?;

        let agent = match self.gatherer.get_agent().await {
            Some(agent) => agent,
            None => return Err(Error::ErrIceAgentNotExist),
        };

        {
            let state = Arc::clone(&self.state);
            let on_connection_state_change_handler =
                Arc::clone(&self.on_connection_state_change_handler);
            agent.on_connection_state_change(Box::new(move |ice_state: ConnectionState| {
                    let s = IceTransportState::from(ice_state);
                    state.store(s as u8, Ordering::SeqCst);

                    let handler = Arc::clone(&on_connection_state_change_handler);
                    Box::pin(async move {
                        let mut handler = handler.lock().await;
                        if let Some(f) = &mut *handler {
                            f(s).await;
                        }
                    })
                }));

            let on_selected_candidate_pair_change_handler =
                Arc::clone(&self.on_selected_candidate_pair_change_handler);
            agent.on_selected_candidate_pair_change(Box::new(
                    move |local: &Arc<dyn Candidate + Send + Sync>,
                          remote: &Arc<dyn Candidate + Send + Sync>| {
                        let handler = Arc::clone(&on_selected_candidate_pair_change_handler);
                        let local = IceCandidate::from(local);
                        let remote = IceCandidate::from(remote);
                        Box::pin(async move {
                            let mut handler = handler.lock().await;
                            if let Some(f) = &mut *handler {
                                f(IceCandidatePair::new(local, remote)).await;
                            }
                        })
                },
            ));
        }

        let role = role.unwrap_or(IceRole::Controlled);

        let (cancel_tx, cancel_rx) = mpsc::channel(1);

        let conn: Arc<dyn Conn + Send + Sync> = match role {
            IceRole::Controlling => {
                agent
                    .dial(
                        cancel_rx,
                        params.username_fragment.clone(),
                        params.password.clone(),
                    )
                    .await?
            }
            IceRole::Controlled => {
                agent
                    .accept(
                        cancel_rx,
                        params.username_fragment.clone(),
                        params.password.clone(),
                    )
                    .await?
            }
            _ => return Err(Error::ErrIceRoleUnknown),
        };

        let config = MuxConfig {
            conn: Arc::clone(&conn),
            buffer_size: RECEIVE_MTU,
        };

        {
            let mut internal = self.internal.lock().await;
            internal.role = role;
            internal.cancel_tx = Some(cancel_tx);
            internal.conn = Some(conn);
            internal.mux = Some(Mux::new(config));
        }

        Ok(())
    }

    /// restart moves the agent to fresh credentials and re-gathers.
    pub(crate) async fn restart(&self) -> Result<()> {
        if let Some(agent) = self.gatherer.get_agent().await {
            agent
                .restart(
                    self.gatherer
                        .setting_engine
                        .candidates
                        .username_fragment
                        .clone(),
                    self.gatherer.setting_engine.candidates.password.clone(),
                )
                .await?;
        } else {
            return Err(Error::ErrIceAgentNotExist);
        }
        self.gatherer.gather().await
    }

    /// stop irreversibly stops the transport and the gatherer under it.
    pub async fn stop(&self) -> Result<()> {
        self.set_state(IceTransportState::Closed);

        {
            let mut internal = self.internal.lock().await;
            internal.cancel_tx.take();
            if let Some(mut mux) = internal.mux.take() {
                mux.close().await;
            }
        }

        self.gatherer.close().await
    }

    /// on_selected_candidate_pair_change fires when the nominated pair
    /// changes.
    pub async fn on_selected_candidate_pair_change(&self, f: OnSelectedCandidatePairChangeFn) {
        let mut handler = self.on_selected_candidate_pair_change_handler.lock().await;
        *handler = Some(f);
    }

    /// on_connection_state_change fires on ICE transport state moves.
    pub async fn on_connection_state_change(&self, f: OnIceTransportStateChangeFn) {
        let mut handler = self.on_connection_state_change_handler.lock().await;
        *handler = Some(f);
    }

    /// role returns the role the transport was started with.
    pub async fn role(&self) -> IceRole {
        let internal = self.internal.lock().await;
        internal.role
    }

    /// add_remote_candidate feeds one trickled remote candidate into the
    /// agent.
    pub async fn add_remote_candidate(&self, remote_candidate: Option<IceCandidate>) -> Result<()> {
        self.ensure_gatherer().await?;

        if let Some(agent) = self.gatherer.get_agent().await {
            if let Some(r) = remote_candidate {
                let c: Arc<dyn Candidate + Send + Sync> = Arc::new(r.to_ice()?);
                agent.add_remote_candidate(&c)?;
            }
            Ok(())
        } else {
            Err(Error::ErrIceAgentNotExist)
        }
    }

    /// state returns the current transport state.
    pub fn state(&self) -> IceTransportState {
        IceTransportState::from(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, s: IceTransportState) {
        self.state.store(s as u8, Ordering::SeqCst)
    }

    pub(crate) fn gatherer(&self) -> Arc<IceGatherer> {
        Arc::clone(&self.gatherer)
    }

    pub(crate) async fn new_endpoint(&self, f: MatchFunc) -> Option<Arc<Endpoint>> {
        let internal = self.internal.lock().await;
        if let Some(mux) = &internal.mux {
            Some(mux.new_endpoint(f).await)
        } else {
            None
        }
    }

    pub(crate) async fn ensure_gatherer(&self) -> Result<()> {
        if self.gatherer.get_agent().await.is_none() {
            self.gatherer.create_agent().await
        } else {
            Ok(())
        }
    }

    pub(crate) async fn have_remote_credentials_change(
        &self,
        new_ufrag: &str,
        new_pwd: &str,
    ) -> bool {
        if let Some(agent) = self.gatherer.get_agent().await {
            let (ufrag, pwd) = agent.get_remote_user_credentials().await;
            ufrag != new_ufrag || pwd != new_pwd
        } else {
            false
        }
    }

    pub(crate) async fn set_remote_credentials(
        &self,
        new_ufrag: String,
        new_pwd: String,
    ) -> Result<()> {
        if let Some(agent) = self.gatherer.get_agent().await {
            Ok(agent.set_remote_credentials(new_ufrag, new_pwd).await?)
        } else {
            Err(Error::ErrIceAgentNotExist)
        }
    }
}
