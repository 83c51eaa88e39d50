use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dtls::config::ClientAuthType;
use dtls::conn::DTLSConn;
use dtls::extension::extension_use_srtp::SrtpProtectionProfile;
use interceptor::stream_info::StreamInfo;
use interceptor::{Interceptor, RTCPReader, RTPReader};
use sdp::description::session::SessionDescription as ParsedSdp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use srtp::protection_profile::ProtectionProfile;
use srtp::session::Session;
use srtp::stream::Stream;
use tokio::sync::{mpsc, Mutex};
use util::Conn;

use crate::api::setting_engine::SettingEngine;
use crate::certificate::Certificate;
use crate::error::{flatten_errs, Error, Result};
use crate::mux::mux_func::{match_dtls, match_srtcp, match_srtp};
use crate::track::TrackStream;
use crate::transceiver::SSRC;
use crate::transport::ice::IceTransport;
use crate::EventFuture;

/// DtlsRole is who initiates the DTLS handshake.
///
/// <https://tools.ietf.org/html/rfc4347#section-4.1>
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum DtlsRole {
    #[default]
    Unspecified = 0,

    /// The endpoint decides between client and server at handshake time,
    /// written as `a=setup:actpass`.
    Auto,

    /// The endpoint sends the ClientHello (`a=setup:active`).
    Client,

    /// The endpoint waits for the ClientHello (`a=setup:passive`).
    Server,
}

/// Offers carry actpass so the answerer picks the handshake direction.
pub(crate) const DEFAULT_DTLS_ROLE_OFFER: DtlsRole = DtlsRole::Auto;

/// Answers default to the client role, which lets the handshake start
/// without an extra round trip.
pub(crate) const DEFAULT_DTLS_ROLE_ANSWER: DtlsRole = DtlsRole::Client;

impl fmt::Display for DtlsRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DtlsRole::Auto => write!(f, "auto"),
            DtlsRole::Client => write!(f, "client"),
            DtlsRole::Server => write!(f, "server"),
            _ => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}

impl From<&ParsedSdp> for DtlsRole {
    /// The remote's setup attribute dictates our role: an active remote
    /// makes us the server, a passive one the client.
    fn from(parsed: &ParsedSdp) -> Self {
        for media_section in &parsed.media_descriptions {
            for attribute in &media_section.attributes {
                if attribute.key == "setup" {
                    return match attribute.value.as_deref() {
                        Some("active") => DtlsRole::Server,
                        Some("passive") => DtlsRole::Client,
                        _ => DtlsRole::Auto,
                    };
                }
            }
        }

        DtlsRole::Auto
    }
}

impl DtlsRole {
    pub(crate) fn to_connection_role(self) -> sdp::util::ConnectionRole {
        match self {
            DtlsRole::Client => sdp::util::ConnectionRole::Active,
            DtlsRole::Server => sdp::util::ConnectionRole::Passive,
            DtlsRole::Auto => sdp::util::ConnectionRole::Actpass,
            _ => sdp::util::ConnectionRole::Unspecified,
        }
    }
}

/// DtlsFingerprint is a certificate digest as carried in SDP.
///
/// <https://tools.ietf.org/html/rfc4572>
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    /// A hash function name from the 'Hash function Textual Names'
    /// registry.
    pub algorithm: String,

    /// Lowercase colon-separated hex of the digest.
    pub value: String,
}

/// DtlsParameters carries what the remote announced for its handshake.
#[derive(Default, Debug, Clone)]
pub struct DtlsParameters {
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// DtlsTransportState tracks the handshake lifecycle.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum DtlsTransportState {
    #[default]
    Unspecified = 0,

    /// DTLS has not started negotiating yet.
    New,

    /// DTLS is negotiating a secure connection and verifying the remote
    /// fingerprint.
    Connecting,

    /// The secure connection is established and the fingerprint verified.
    Connected,

    /// The transport was closed intentionally.
    Closed,

    /// The handshake or fingerprint validation failed.
    Failed,
}

impl From<u8> for DtlsTransportState {
    fn from(v: u8) -> Self {
        match v {
            1 => DtlsTransportState::New,
            2 => DtlsTransportState::Connecting,
            3 => DtlsTransportState::Connected,
            4 => DtlsTransportState::Closed,
            5 => DtlsTransportState::Failed,
            _ => DtlsTransportState::Unspecified,
        }
    }
}

impl fmt::Display for DtlsTransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            DtlsTransportState::New => "new",
            DtlsTransportState::Connecting => "connecting",
            DtlsTransportState::Connected => "connected",
            DtlsTransportState::Closed => "closed",
            DtlsTransportState::Failed => "failed",
            _ => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

pub type OnDtlsTransportStateChangeFn =
    Box<dyn (FnMut(DtlsTransportState) -> EventFuture) + Send + Sync>;

fn default_srtp_protection_profiles() -> Vec<SrtpProtectionProfile> {
    vec![
        SrtpProtectionProfile::Srtp_Aead_Aes_128_Gcm,
        SrtpProtectionProfile::Srtp_Aes128_Cm_Hmac_Sha1_80,
    ]
}

/// DtlsTransport runs the DTLS handshake over the ICE mux and exposes the
/// keyed SRTP/SRTCP sessions.
#[derive(Default)]
pub struct DtlsTransport {
    pub(crate) ice_transport: Arc<IceTransport>,
    pub(crate) certificates: Vec<Certificate>,
    pub(crate) setting_engine: Arc<SettingEngine>,

    pub(crate) remote_parameters: Mutex<DtlsParameters>,
    pub(crate) remote_certificate: Mutex<Bytes>,
    pub(crate) state: AtomicU8,
    pub(crate) srtp_protection_profile: Mutex<ProtectionProfile>,
    pub(crate) on_state_change_handler: Arc<Mutex<Option<OnDtlsTransportStateChangeFn>>>,
    pub(crate) conn: Mutex<Option<Arc<DTLSConn>>>,

    pub(crate) srtp_session: Mutex<Option<Arc<Session>>>,
    pub(crate) srtcp_session: Mutex<Option<Arc<Session>>>,
    pub(crate) srtp_endpoint: Mutex<Option<Arc<crate::mux::endpoint::Endpoint>>>,
    pub(crate) srtcp_endpoint: Mutex<Option<Arc<crate::mux::endpoint::Endpoint>>>,

    pub(crate) simulcast_streams: Mutex<std::collections::HashMap<SSRC, Arc<Stream>>>,

    /// Closed when SRTP is keyed; parked writers wake up on it.
    pub(crate) srtp_ready_signal: Arc<AtomicBool>,
    pub(crate) srtp_ready_tx: Mutex<Option<mpsc::Sender<()>>>,
    pub(crate) srtp_ready_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl DtlsTransport {
    pub(crate) fn new(
        ice_transport: Arc<IceTransport>,
        certificates: Vec<Certificate>,
        setting_engine: Arc<SettingEngine>,
    ) -> Self {
        let (srtp_ready_tx, srtp_ready_rx) = mpsc::channel(1);
        DtlsTransport {
            ice_transport,
            certificates,
            setting_engine,
            srtp_ready_signal: Arc::new(AtomicBool::new(false)),
            srtp_ready_tx: Mutex::new(Some(srtp_ready_tx)),
            srtp_ready_rx: Mutex::new(Some(srtp_ready_rx)),
            state: AtomicU8::new(DtlsTransportState::New as u8),
            ..Default::default()
        }
    }

    /// ice_transport returns the transport this DTLS connection runs over.
    pub fn ice_transport(&self) -> &IceTransport {
        &self.ice_transport
    }

    pub(crate) async fn conn(&self) -> Option<Arc<DTLSConn>> {
        let conn = self.conn.lock().await;
        conn.clone()
    }

    /// on_state_change fires on every handshake state move.
    pub async fn on_state_change(&self, f: OnDtlsTransportStateChangeFn) {
        let mut handler = self.on_state_change_handler.lock().await;
        *handler = Some(f);
    }

    /// state returns the current handshake state.
    pub fn state(&self) -> DtlsTransportState {
        self.state.load(Ordering::SeqCst).into()
    }

    pub(crate) async fn state_change(&self, state: DtlsTransportState) {
        self.state.store(state as u8, Ordering::SeqCst);

        let mut handler = self.on_state_change_handler.lock().await;
        if let Some(f) = &mut *handler {
            f(state).await;
        }
    }

    /// get_local_parameters describes our side of the handshake.
    pub fn get_local_parameters(&self) -> Result<DtlsParameters> {
        let mut fingerprints = vec![];
        for c in &self.certificates {
            fingerprints.extend(c.get_fingerprints()?);
        }

        Ok(DtlsParameters {
            role: DtlsRole::Auto,
            fingerprints,
        })
    }

    /// get_remote_certificate returns the DER certificate the remote
    /// presented, empty before the handshake finishes.
    pub async fn get_remote_certificate(&self) -> Bytes {
        let remote_certificate = self.remote_certificate.lock().await;
        remote_certificate.clone()
    }

    /// role picks the handshake direction: explicit remote parameters win,
    /// then the setting engine, then the specification default of client.
    pub(crate) async fn role(&self) -> DtlsRole {
        {
            let remote_parameters = self.remote_parameters.lock().await;
            match remote_parameters.role {
                DtlsRole::Client => return DtlsRole::Server,
                DtlsRole::Server => return DtlsRole::Client,
                _ => {}
            }
        }

        if self.setting_engine.answering_dtls_role != DtlsRole::Unspecified {
            return self.setting_engine.answering_dtls_role;
        }

        // <https://tools.ietf.org/html/rfc5763#section-5>
        DtlsRole::Client
    }

    async fn prepare_transport(
        &self,
        remote_parameters: DtlsParameters,
    ) -> Result<(DtlsRole, dtls::config::Config)> {
        self.ensure_ice_conn()?;

        if self.state() != DtlsTransportState::New {
            return Err(Error::ErrInvalidDtlsStart);
        }

        {
            let mut srtp_endpoint = self.srtp_endpoint.lock().await;
            *srtp_endpoint = self.ice_transport.new_endpoint(Box::new(match_srtp)).await;
        }
        {
            let mut srtcp_endpoint = self.srtcp_endpoint.lock().await;
            *srtcp_endpoint = self
                .ice_transport
                .new_endpoint(Box::new(match_srtcp))
                .await;
        }
        {
            let mut rp = self.remote_parameters.lock().await;
            *rp = remote_parameters;
        }

        let certificate = if let Some(cert) = self.certificates.first() {
            cert.dtls_certificate.clone()
        } else {
            return Err(Error::ErrNoCertificate);
        };
        self.state_change(DtlsTransportState::Connecting).await;

        Ok((
            self.role().await,
            dtls::config::Config {
                certificates: vec![certificate],
                srtp_protection_profiles: if !self
                    .setting_engine
                    .srtp_protection_profiles
                    .is_empty()
                {
                    self.setting_engine.srtp_protection_profiles.clone()
                } else {
                    default_srtp_protection_profiles()
                },
                client_auth: ClientAuthType::RequireAnyClientCert,
                insecure_skip_verify: true,
                ..Default::default()
            },
        ))
    }

    /// start runs the DTLS handshake with the given remote parameters and,
    /// on success, keys the SRTP/SRTCP sessions.
    pub async fn start(&self, remote_parameters: DtlsParameters) -> Result<()> {
        let dtls_conn_result = if let Some(dtls_endpoint) =
            self.ice_transport.new_endpoint(Box::new(match_dtls)).await
        {
            let (role, mut dtls_config) = self.prepare_transport(remote_parameters).await?;
            if self.setting_engine.replay_protection.dtls != 0 {
                dtls_config.replay_protection_window = self.setting_engine.replay_protection.dtls;
            }

            // The handshake blocks; the transport lock must not be held
            // here.
            let dtls_endpoint: Arc<dyn Conn + Send + Sync> = dtls_endpoint;
            DTLSConn::new(dtls_endpoint, dtls_config, role == DtlsRole::Client, None).await
        } else {
            Err(dtls::Error::Other(
                "ice_transport.new_endpoint failed".to_owned(),
            ))
        };

        let dtls_conn = match dtls_conn_result {
            Ok(dtls_conn) => dtls_conn,
            Err(err) => {
                self.state_change(DtlsTransportState::Failed).await;
                return Err(err.into());
            }
        };

        let srtp_profile = dtls_conn.selected_srtpprotection_profile();
        {
            let mut srtp_protection_profile = self.srtp_protection_profile.lock().await;
            *srtp_protection_profile = match srtp_profile {
                SrtpProtectionProfile::Srtp_Aead_Aes_128_Gcm => ProtectionProfile::AeadAes128Gcm,
                SrtpProtectionProfile::Srtp_Aes128_Cm_Hmac_Sha1_80 => {
                    ProtectionProfile::Aes128CmHmacSha1_80
                }
                _ => {
                    if let Err(err) = dtls_conn.close().await {
                        log::error!("{}", err);
                    }
                    self.state_change(DtlsTransportState::Failed).await;
                    return Err(Error::ErrNoSrtpProtectionProfile);
                }
            };
        }

        // The fingerprint check only runs when verification is not
        // explicitly disabled for testing.
        if !self
            .setting_engine
            .disable_certificate_fingerprint_verification
        {
            let remote_certs = &dtls_conn.connection_state().await.peer_certificates;
            if remote_certs.is_empty() {
                if let Err(err) = dtls_conn.close().await {
                    log::error!("{}", err);
                }
                self.state_change(DtlsTransportState::Failed).await;
                return Err(Error::ErrNoRemoteCertificate);
            }
            {
                let mut remote_certificate = self.remote_certificate.lock().await;
                *remote_certificate = Bytes::from(remote_certs[0].clone());
            }

            if let Err(err) = self.validate_fingerprint(&remote_certs[0]).await {
                if let Err(close_err) = dtls_conn.close().await {
                    log::error!("{}", close_err);
                }
                self.state_change(DtlsTransportState::Failed).await;
                return Err(err);
            }
        }

        {
            let mut conn = self.conn.lock().await;
            *conn = Some(Arc::new(dtls_conn));
        }
        self.state_change(DtlsTransportState::Connected).await;

        self.start_srtp().await
    }

    async fn start_srtp(&self) -> Result<()> {
        let profile = {
            let srtp_protection_profile = self.srtp_protection_profile.lock().await;
            *srtp_protection_profile
        };

        let mut srtp_config = srtp::config::Config {
            profile,
            ..Default::default()
        };
        if self.setting_engine.replay_protection.srtp != 0 {
            srtp_config.remote_rtp_options = Some(srtp::option::srtp_replay_protection(
                self.setting_engine.replay_protection.srtp,
            ));
        } else if self.setting_engine.disable_srtp_replay_protection {
            srtp_config.remote_rtp_options = Some(srtp::option::srtp_no_replay_protection());
        }

        let conn = match self.conn().await {
            Some(conn) => conn,
            None => return Err(Error::ErrDtlsTransportNotStarted),
        };
        let is_client = self.role().await == DtlsRole::Client;

        {
            let conn_state = conn.connection_state().await;
            srtp_config
                .extract_session_keys_from_dtls(conn_state, is_client)
                .await?;
        }

        {
            let srtp_endpoint = {
                let srtp_endpoint = self.srtp_endpoint.lock().await;
                srtp_endpoint.clone()
            };
            if let Some(srtp_endpoint) = srtp_endpoint {
                let srtp_session = Session::new(
                    srtp_endpoint as Arc<dyn Conn + Send + Sync>,
                    srtp_config,
                    true,
                )
                .await?;

                let mut s = self.srtp_session.lock().await;
                *s = Some(Arc::new(srtp_session));
            } else {
                return Err(Error::ErrDtlsTransportNotStarted);
            }
        }

        {
            let mut srtcp_config = srtp::config::Config {
                profile,
                ..Default::default()
            };
            if self.setting_engine.replay_protection.srtcp != 0 {
                srtcp_config.remote_rtcp_options = Some(srtp::option::srtcp_replay_protection(
                    self.setting_engine.replay_protection.srtcp,
                ));
            } else if self.setting_engine.disable_srtcp_replay_protection {
                srtcp_config.remote_rtcp_options = Some(srtp::option::srtcp_no_replay_protection());
            }

            {
                let conn_state = conn.connection_state().await;
                srtcp_config
                    .extract_session_keys_from_dtls(conn_state, is_client)
                    .await?;
            }

            let srtcp_endpoint = {
                let srtcp_endpoint = self.srtcp_endpoint.lock().await;
                srtcp_endpoint.clone()
            };
            if let Some(srtcp_endpoint) = srtcp_endpoint {
                let srtcp_session = Session::new(
                    srtcp_endpoint as Arc<dyn Conn + Send + Sync>,
                    srtcp_config,
                    false,
                )
                .await?;

                let mut s = self.srtcp_session.lock().await;
                *s = Some(Arc::new(srtcp_session));
            } else {
                return Err(Error::ErrDtlsTransportNotStarted);
            }
        }

        {
            let mut tx = self.srtp_ready_tx.lock().await;
            tx.take();
        }
        self.srtp_ready_signal.store(true, Ordering::SeqCst);

        Ok(())
    }

    pub(crate) async fn get_srtp_session(&self) -> Option<Arc<Session>> {
        let session = self.srtp_session.lock().await;
        session.clone()
    }

    pub(crate) async fn get_srtcp_session(&self) -> Option<Arc<Session>> {
        let session = self.srtcp_session.lock().await;
        session.clone()
    }

    /// streams_for_ssrc opens the SRTP and SRTCP read streams for one SSRC
    /// and binds them through the interceptor chain.
    pub(crate) async fn streams_for_ssrc(
        &self,
        ssrc: SSRC,
        stream_info: &StreamInfo,
        interceptor: &Arc<dyn Interceptor + Send + Sync>,
    ) -> Result<TrackStream> {
        let srtp_session = self
            .get_srtp_session()
            .await
            .ok_or(Error::ErrDtlsTransportNotStarted)?;
        let rtp_read_stream = srtp_session.open(ssrc).await;
        let rtp_stream_reader = Arc::clone(&rtp_read_stream) as Arc<dyn RTPReader + Send + Sync>;
        let rtp_interceptor = interceptor
            .bind_remote_stream(stream_info, rtp_stream_reader)
            .await;

        let srtcp_session = self
            .get_srtcp_session()
            .await
            .ok_or(Error::ErrDtlsTransportNotStarted)?;
        let rtcp_read_stream = srtcp_session.open(ssrc).await;
        let rtcp_stream_reader = Arc::clone(&rtcp_read_stream) as Arc<dyn RTCPReader + Send + Sync>;
        let rtcp_interceptor = interceptor.bind_rtcp_reader(rtcp_stream_reader).await;

        Ok(TrackStream {
            stream_info: Some(stream_info.clone()),
            rtp_read_stream: Some(rtp_read_stream),
            rtp_interceptor: Some(rtp_interceptor),
            rtcp_read_stream: Some(rtcp_read_stream),
            rtcp_interceptor: Some(rtcp_interceptor),
        })
    }

    /// write_rtcp sends a compound RTCP packet through the SRTCP session.
    pub(crate) async fn write_rtcp(
        &self,
        pkts: &[Box<dyn rtcp::packet::Packet + Send + Sync>],
    ) -> Result<usize> {
        let srtcp_session = self.get_srtcp_session().await;
        if let Some(srtcp_session) = srtcp_session {
            let raw = rtcp::packet::marshal(pkts)?;
            Ok(srtcp_session.write(&raw, false).await?)
        } else {
            Ok(0)
        }
    }

    pub(crate) async fn store_simulcast_stream(&self, ssrc: SSRC, stream: Arc<Stream>) {
        let mut simulcast_streams = self.simulcast_streams.lock().await;
        simulcast_streams.insert(ssrc, stream);
    }

    pub(crate) async fn remove_simulcast_stream(&self, ssrc: SSRC) {
        let mut simulcast_streams = self.simulcast_streams.lock().await;
        simulcast_streams.remove(&ssrc);
    }

    /// stop closes the sessions and the DTLS conn, collecting every error.
    pub async fn stop(&self) -> Result<()> {
        self.state_change(DtlsTransportState::Closed).await;

        let mut close_errs = vec![];
        {
            let srtp_session = {
                let mut srtp_session = self.srtp_session.lock().await;
                srtp_session.take()
            };
            if let Some(srtp_session) = srtp_session {
                if let Err(err) = srtp_session.close().await {
                    close_errs.push(err.into());
                }
            }
        }
        {
            let srtcp_session = {
                let mut srtcp_session = self.srtcp_session.lock().await;
                srtcp_session.take()
            };
            if let Some(srtcp_session) = srtcp_session {
                if let Err(err) = srtcp_session.close().await {
                    close_errs.push(err.into());
                }
            }
        }
        {
            let simulcast_streams = {
                let mut simulcast_streams = self.simulcast_streams.lock().await;
                simulcast_streams.drain().map(|(_, s)| s).collect::<Vec<_>>()
            };
            for ss in simulcast_streams {
                if let Err(err) = ss.close().await {
                    close_errs.push(err.into());
                }
            }
        }

        if let Some(conn) = self.conn().await {
            // dtls connection may be closed on sctp close.
            match conn.close().await {
                Ok(_) => {}
                Err(err) => {
                    if err.to_string() != dtls::Error::ErrConnClosed.to_string() {
                        close_errs.push(err.into());
                    }
                }
            }
        }

        flatten_errs(close_errs)
    }

    pub(crate) async fn validate_fingerprint(&self, remote_cert: &[u8]) -> Result<()> {
        let remote_parameters = self.remote_parameters.lock().await;
        for fp in &remote_parameters.fingerprints {
            if fp.algorithm != "sha-256" {
                return Err(Error::ErrUnsupportedFingerprintAlgorithm);
            }

            let mut h = Sha256::new();
            h.update(remote_cert);
            let hashed = h.finalize();
            let values: Vec<String> = hashed.iter().map(|x| format!("{x:02x}")).collect();
            let remote_value = values.join(":");

            if remote_value.to_lowercase() == fp.value.to_lowercase() {
                return Ok(());
            }
        }

        Err(Error::ErrNoMatchingCertificateFingerprint)
    }

    pub(crate) fn ensure_ice_conn(&self) -> Result<()> {
        if self.ice_transport.state() == crate::transport::ice::IceTransportState::New {
            Err(Error::ErrIceConnectionNotStarted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dtls_role_from_remote_sdp() {
        const OFFER_ACTIVE: &str = "v=0\r\n\
o=- 8448668841136641781 4 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=application 47299 DTLS/SCTP 5000\r\n\
c=IN IP4 192.168.20.129\r\n\
a=setup:active\r\n";

        let mut reader = std::io::Cursor::new(OFFER_ACTIVE.as_bytes());
        let parsed = ParsedSdp::unmarshal(&mut reader).expect("parse");
        assert_eq!(DtlsRole::from(&parsed), DtlsRole::Server);

        let mut reader = std::io::Cursor::new(
            OFFER_ACTIVE
                .replace("a=setup:active", "a=setup:passive")
                .into_bytes(),
        );
        let parsed = ParsedSdp::unmarshal(&mut reader).expect("parse");
        assert_eq!(DtlsRole::from(&parsed), DtlsRole::Client);

        let mut reader = std::io::Cursor::new(
            OFFER_ACTIVE.replace("a=setup:active", "a=sendrecv").into_bytes(),
        );
        let parsed = ParsedSdp::unmarshal(&mut reader).expect("parse");
        assert_eq!(DtlsRole::from(&parsed), DtlsRole::Auto);
    }

    #[test]
    fn test_connection_role_mapping() {
        assert_eq!(
            DtlsRole::Client.to_connection_role(),
            sdp::util::ConnectionRole::Active
        );
        assert_eq!(
            DtlsRole::Server.to_connection_role(),
            sdp::util::ConnectionRole::Passive
        );
        assert_eq!(
            DtlsRole::Auto.to_connection_role(),
            sdp::util::ConnectionRole::Actpass
        );
    }
}
