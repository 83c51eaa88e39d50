pub mod interceptors;
pub mod media_engine;
pub mod setting_engine;

use std::sync::Arc;
use std::time::SystemTime;

use interceptor::registry::Registry;
use rcgen::KeyPair;

use crate::certificate::Certificate;
use crate::configuration::Configuration;
use crate::error::{Error, Result};
use crate::peer::PeerConnection;
use crate::transport::dtls::DtlsTransport;
use crate::transport::ice::{GatherOptions, IceGatherer, IceTransport};
use crate::transport::sctp::SctpTransport;

use media_engine::MediaEngine;
use setting_engine::SettingEngine;

/// Api is the per-endpoint factory: it owns the engines and the
/// interceptor registry every connection it creates starts from.
pub struct Api {
    pub(crate) setting_engine: Arc<SettingEngine>,
    pub(crate) media_engine: Arc<MediaEngine>,
    pub(crate) interceptor_registry: Registry,
}

impl Api {
    /// new_peer_connection builds a connection from this Api's engines and
    /// the given configuration.
    pub async fn new_peer_connection(
        &self,
        configuration: Configuration,
    ) -> Result<PeerConnection> {
        PeerConnection::new(self, configuration).await
    }

    /// new_ice_gatherer builds a standalone gatherer after validating the
    /// configured servers.
    pub fn new_ice_gatherer(&self, opts: GatherOptions) -> Result<IceGatherer> {
        let mut validated_servers = vec![];
        for server in &opts.ice_servers {
            let urls = server.urls()?;
            validated_servers.extend(urls);
        }

        Ok(IceGatherer::new(
            validated_servers,
            opts.ice_gather_policy,
            Arc::clone(&self.setting_engine),
        ))
    }

    /// new_ice_transport wraps a gatherer into a transport.
    pub fn new_ice_transport(&self, gatherer: Arc<IceGatherer>) -> IceTransport {
        IceTransport::new(gatherer)
    }

    /// new_dtls_transport builds the DTLS layer above an ICE transport,
    /// generating an ECDSA P-256 certificate when none is supplied.
    pub fn new_dtls_transport(
        &self,
        ice_transport: Arc<IceTransport>,
        mut certificates: Vec<Certificate>,
    ) -> Result<DtlsTransport> {
        if !certificates.is_empty() {
            let now = SystemTime::now();
            for cert in &certificates {
                if cert.expires().duration_since(now).is_err() {
                    return Err(Error::ErrCertificateExpired);
                }
            }
        } else {
            let kp = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256)?;
            let cert = Certificate::from_key_pair(kp)?;
            certificates = vec![cert];
        }

        Ok(DtlsTransport::new(
            ice_transport,
            certificates,
            Arc::clone(&self.setting_engine),
        ))
    }

    /// new_sctp_transport builds the SCTP layer above a DTLS transport.
    pub fn new_sctp_transport(&self, dtls_transport: Arc<DtlsTransport>) -> Result<SctpTransport> {
        Ok(SctpTransport::new(
            dtls_transport,
            Arc::clone(&self.setting_engine),
        ))
    }
}

/// ApiBuilder assembles an [`Api`]; every part left unset falls back to
/// defaults.
#[derive(Default)]
pub struct ApiBuilder {
    setting_engine: Option<Arc<SettingEngine>>,
    media_engine: Option<Arc<MediaEngine>>,
    interceptor_registry: Option<Registry>,
}

impl ApiBuilder {
    pub fn new() -> Self {
        ApiBuilder::default()
    }

    pub fn build(mut self) -> Api {
        Api {
            setting_engine: self
                .setting_engine
                .take()
                .unwrap_or_else(|| Arc::new(SettingEngine::default())),
            media_engine: self
                .media_engine
                .take()
                .unwrap_or_else(|| Arc::new(MediaEngine::default())),
            interceptor_registry: self.interceptor_registry.take().unwrap_or_else(Registry::new),
        }
    }

    /// with_setting_engine supplies the tuning surface. Settings must not
    /// change once the Api is built.
    pub fn with_setting_engine(mut self, setting_engine: SettingEngine) -> Self {
        self.setting_engine = Some(Arc::new(setting_engine));
        self
    }

    /// with_media_engine supplies the codec registry.
    pub fn with_media_engine(mut self, media_engine: MediaEngine) -> Self {
        self.media_engine = Some(Arc::new(media_engine));
        self
    }

    /// with_interceptor_registry supplies the interceptor chain blueprint.
    pub fn with_interceptor_registry(mut self, interceptor_registry: Registry) -> Self {
        self.interceptor_registry = Some(interceptor_registry);
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_api_builder_defaults() {
        let api = ApiBuilder::new().build();
        assert!(api.media_engine.video_codecs.is_empty());
        assert!(api.media_engine.audio_codecs.is_empty());
    }

    #[test]
    fn test_api_builder_custom_parts() {
        let mut m = MediaEngine::default();
        m.register_default_codecs().expect("codecs");
        let mut s = SettingEngine::default();
        s.detach_data_channels();

        let api = ApiBuilder::new()
            .with_media_engine(m)
            .with_setting_engine(s)
            .build();

        assert!(!api.media_engine.audio_codecs.is_empty());
        assert!(api.setting_engine.detach.data_channels);
    }
}
