use std::sync::Arc;

use dtls::extension::extension_use_srtp::SrtpProtectionProfile;
use ice::agent::agent_config::InterfaceFilterFn;
use ice::mdns::MulticastDnsMode;
use ice::network_type::NetworkType;
use ice::udp_network::UDPNetwork;
use tokio::time::Duration;
use util::vnet::net::Net;

use crate::error::{Error, Result};
use crate::transport::candidate::IceCandidateType;
use crate::transport::dtls::DtlsRole;
use crate::RECEIVE_MTU;

#[derive(Default, Clone)]
pub struct Detach {
    pub data_channels: bool,
}

#[derive(Default, Clone)]
pub struct Timeout {
    pub ice_disconnected_timeout: Option<Duration>,
    pub ice_failed_timeout: Option<Duration>,
    pub ice_keepalive_interval: Option<Duration>,
    pub ice_host_acceptance_min_wait: Option<Duration>,
    pub ice_srflx_acceptance_min_wait: Option<Duration>,
    pub ice_prflx_acceptance_min_wait: Option<Duration>,
    pub ice_relay_acceptance_min_wait: Option<Duration>,
}

#[derive(Default, Clone)]
pub struct Candidates {
    pub ice_lite: bool,
    pub ice_network_types: Vec<NetworkType>,
    pub interface_filter: Arc<Option<InterfaceFilterFn>>,
    pub nat_1to1_ips: Vec<String>,
    pub nat_1to1_ip_candidate_type: IceCandidateType,
    pub multicast_dns_mode: MulticastDnsMode,
    pub multicast_dns_host_name: String,
    pub username_fragment: String,
    pub password: String,
}

#[derive(Default, Clone)]
pub struct ReplayProtection {
    pub dtls: usize,
    pub srtp: usize,
    pub srtcp: usize,
}

/// SettingEngine tunes behavior the W3C API has no surface for: timeouts,
/// NAT rewrites, vnet injection, MTU, DTLS roles and replay windows.
/// Settings must not change once the engine was handed to an Api.
#[derive(Default, Clone)]
pub struct SettingEngine {
    pub(crate) detach: Detach,
    pub(crate) timeout: Timeout,
    pub(crate) candidates: Candidates,
    pub(crate) replay_protection: ReplayProtection,
    pub(crate) sdp_media_level_fingerprints: bool,
    pub(crate) answering_dtls_role: DtlsRole,
    pub(crate) disable_certificate_fingerprint_verification: bool,
    pub(crate) disable_srtp_replay_protection: bool,
    pub(crate) disable_srtcp_replay_protection: bool,
    pub(crate) vnet: Option<Arc<Net>>,
    pub(crate) udp_network: UDPNetwork,
    pub(crate) disable_media_engine_copy: bool,
    pub(crate) srtp_protection_profiles: Vec<SrtpProtectionProfile>,
    pub(crate) receive_mtu: usize,
}

impl SettingEngine {
    /// get_receive_mtu returns the configured MTU, falling back to the
    /// default when unset.
    pub(crate) fn get_receive_mtu(&self) -> usize {
        if self.receive_mtu != 0 {
            self.receive_mtu
        } else {
            RECEIVE_MTU
        }
    }

    /// detach_data_channels enables detaching; channels must then be
    /// detached from their on_open handler.
    pub fn detach_data_channels(&mut self) {
        self.detach.data_channels = true;
    }

    /// set_srtp_protection_profiles overrides the profiles offered during
    /// the DTLS handshake.
    pub fn set_srtp_protection_profiles(&mut self, profiles: Vec<SrtpProtectionProfile>) {
        self.srtp_protection_profiles = profiles
    }

    /// set_ice_timeouts tunes the agent's liveness behavior:
    /// * disconnected_timeout: silence before an agent is Disconnected (default 5s)
    /// * failed_timeout: further silence before Failed (default 25s)
    /// * keep_alive_interval: how often to ping an idle connection (default 2s)
    pub fn set_ice_timeouts(
        &mut self,
        disconnected_timeout: Option<Duration>,
        failed_timeout: Option<Duration>,
        keep_alive_interval: Option<Duration>,
    ) {
        self.timeout.ice_disconnected_timeout = disconnected_timeout;
        self.timeout.ice_failed_timeout = failed_timeout;
        self.timeout.ice_keepalive_interval = keep_alive_interval;
    }

    pub fn set_host_acceptance_min_wait(&mut self, t: Option<Duration>) {
        self.timeout.ice_host_acceptance_min_wait = t;
    }

    pub fn set_srflx_acceptance_min_wait(&mut self, t: Option<Duration>) {
        self.timeout.ice_srflx_acceptance_min_wait = t;
    }

    pub fn set_prflx_acceptance_min_wait(&mut self, t: Option<Duration>) {
        self.timeout.ice_prflx_acceptance_min_wait = t;
    }

    pub fn set_relay_acceptance_min_wait(&mut self, t: Option<Duration>) {
        self.timeout.ice_relay_acceptance_min_wait = t;
    }

    /// set_udp_network constrains ICE UDP sockets, e.g. to an ephemeral
    /// port range.
    pub fn set_udp_network(&mut self, udp_network: UDPNetwork) {
        self.udp_network = udp_network;
    }

    /// set_lite makes the agent an ice-lite agent.
    pub fn set_lite(&mut self, lite: bool) {
        self.candidates.ice_lite = lite;
    }

    /// set_network_types restricts which candidate networks are gathered.
    pub fn set_network_types(&mut self, candidate_types: Vec<NetworkType>) {
        self.candidates.ice_network_types = candidate_types;
    }

    /// set_interface_filter excludes network interfaces from gathering.
    pub fn set_interface_filter(&mut self, filter: InterfaceFilterFn) {
        self.candidates.interface_filter = Arc::new(Some(filter));
    }

    /// set_nat_1to1_ips announces the given external addresses instead of
    /// (host candidate type) or next to (srflx type) the local ones. Useful
    /// behind a 1:1 DNAT.
    pub fn set_nat_1to1_ips(&mut self, ips: Vec<String>, candidate_type: IceCandidateType) {
        self.candidates.nat_1to1_ips = ips;
        self.candidates.nat_1to1_ip_candidate_type = candidate_type;
    }

    /// set_answering_dtls_role forces the handshake direction taken when
    /// answering; only client and server are acceptable.
    pub fn set_answering_dtls_role(&mut self, role: DtlsRole) -> Result<()> {
        if role != DtlsRole::Client && role != DtlsRole::Server {
            return Err(Error::ErrSettingEngineAnsweringDtlsRole);
        }

        self.answering_dtls_role = role;
        Ok(())
    }

    /// set_vnet injects a virtual network, letting tests simulate
    /// topologies, latency and loss.
    pub fn set_vnet(&mut self, vnet: Option<Arc<Net>>) {
        self.vnet = vnet;
    }

    /// set_ice_multicast_dns_mode controls mDNS candidate querying and
    /// generation.
    pub fn set_ice_multicast_dns_mode(&mut self, multicast_dns_mode: MulticastDnsMode) {
        self.candidates.multicast_dns_mode = multicast_dns_mode
    }

    /// set_multicast_dns_host_name pins the mDNS name instead of
    /// generating one. Sharing a name between connections is undefined.
    pub fn set_multicast_dns_host_name(&mut self, host_name: String) {
        self.candidates.multicast_dns_host_name = host_name;
    }

    /// set_ice_credentials pins static ICE credentials, for signalless or
    /// reproducible sessions.
    pub fn set_ice_credentials(&mut self, username_fragment: String, password: String) {
        self.candidates.username_fragment = username_fragment;
        self.candidates.password = password;
    }

    /// disable_certificate_fingerprint_verification skips the post
    /// handshake fingerprint check.
    pub fn disable_certificate_fingerprint_verification(&mut self, is_disabled: bool) {
        self.disable_certificate_fingerprint_verification = is_disabled;
    }

    /// set_dtls_replay_protection_window sizes the DTLS anti-replay
    /// window.
    pub fn set_dtls_replay_protection_window(&mut self, n: usize) {
        self.replay_protection.dtls = n;
    }

    /// set_srtp_replay_protection_window sizes the SRTP anti-replay
    /// window.
    pub fn set_srtp_replay_protection_window(&mut self, n: usize) {
        self.disable_srtp_replay_protection = false;
        self.replay_protection.srtp = n;
    }

    /// set_srtcp_replay_protection_window sizes the SRTCP anti-replay
    /// window.
    pub fn set_srtcp_replay_protection_window(&mut self, n: usize) {
        self.disable_srtcp_replay_protection = false;
        self.replay_protection.srtcp = n;
    }

    pub fn disable_srtp_replay_protection(&mut self, is_disabled: bool) {
        self.disable_srtp_replay_protection = is_disabled;
    }

    pub fn disable_srtcp_replay_protection(&mut self, is_disabled: bool) {
        self.disable_srtcp_replay_protection = is_disabled;
    }

    /// set_sdp_media_level_fingerprints moves the certificate fingerprint
    /// from the session level into every media section, which some
    /// implementations require.
    pub fn set_sdp_media_level_fingerprints(&mut self, sdp_media_level_fingerprints: bool) {
        self.sdp_media_level_fingerprints = sdp_media_level_fingerprints;
    }

    /// disable_media_engine_copy shares the Api's media engine with the
    /// connection instead of snapshotting it, so codecs can be modified
    /// after construction. Do not share engines between connections then.
    pub fn disable_media_engine_copy(&mut self, is_disabled: bool) {
        self.disable_media_engine_copy = is_disabled;
    }

    /// set_receive_mtu sizes the buffers copying inbound packets; 0 keeps
    /// the default.
    pub fn set_receive_mtu(&mut self, receive_mtu: usize) {
        self.receive_mtu = receive_mtu;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_set_answering_dtls_role() {
        let mut s = SettingEngine::default();
        assert!(s.set_answering_dtls_role(DtlsRole::Auto).is_err());
        assert!(s.set_answering_dtls_role(DtlsRole::Client).is_ok());
        assert_eq!(s.answering_dtls_role, DtlsRole::Client);
    }

    #[test]
    fn test_set_ice_timeouts() {
        let mut s = SettingEngine::default();
        s.set_ice_timeouts(
            Some(Duration::from_secs(1)),
            Some(Duration::from_secs(2)),
            Some(Duration::from_secs(3)),
        );
        assert_eq!(s.timeout.ice_disconnected_timeout, Some(Duration::from_secs(1)));
        assert_eq!(s.timeout.ice_failed_timeout, Some(Duration::from_secs(2)));
        assert_eq!(s.timeout.ice_keepalive_interval, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_detach_data_channels() {
        let mut s = SettingEngine::default();
        assert!(!s.detach.data_channels);
        s.detach_data_channels();
        assert!(s.detach.data_channels);
    }

    #[test]
    fn test_get_receive_mtu() {
        let mut s = SettingEngine::default();
        assert_eq!(s.get_receive_mtu(), RECEIVE_MTU);
        s.set_receive_mtu(2048);
        assert_eq!(s.get_receive_mtu(), 2048);
    }
}
