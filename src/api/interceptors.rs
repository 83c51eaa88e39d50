use interceptor::nack::generator::Generator;
use interceptor::nack::responder::Responder;
use interceptor::registry::Registry;
use interceptor::report::receiver::ReceiverReport;
use interceptor::report::sender::SenderReport;

use crate::api::media_engine::MediaEngine;
use crate::error::Result;
use crate::transceiver::codecs::{RtcpFeedback, RtpHeaderExtensionCapability, TYPE_RTCP_FB_TRANSPORT_CC};
use crate::transceiver::MediaKind;

/// register_default_interceptors wires the interceptors most sessions
/// want. Copy this function and drop entries to customize the chain.
pub async fn register_default_interceptors(
    mut registry: Registry,
    media_engine: &mut MediaEngine,
) -> Result<Registry> {
    registry = configure_nack(registry, media_engine);
    registry = configure_rtcp_reports(registry);

    Ok(registry)
}

/// configure_rtcp_reports enables sender and receiver report generation.
pub fn configure_rtcp_reports(mut registry: Registry) -> Registry {
    let receiver = Box::new(ReceiverReport::builder());
    let sender = Box::new(SenderReport::builder());
    registry.add(receiver);
    registry.add(sender);
    registry
}

/// configure_nack enables generating and responding to nack messages.
pub fn configure_nack(mut registry: Registry, media_engine: &mut MediaEngine) -> Registry {
    media_engine.register_feedback(
        RtcpFeedback {
            typ: "nack".to_owned(),
            parameter: String::new(),
        },
        MediaKind::Video,
    );
    media_engine.register_feedback(
        RtcpFeedback {
            typ: "nack".to_owned(),
            parameter: "pli".to_owned(),
        },
        MediaKind::Video,
    );

    registry.add(Box::new(Responder::builder()));
    registry.add(Box::new(Generator::builder()));
    registry
}

/// configure_twcc_header_extension_sender stamps the TWCC extension on
/// outbound packets so the remote can build transport-wide reports.
pub async fn configure_twcc_header_extension_sender(
    mut registry: Registry,
    media_engine: &mut MediaEngine,
) -> Result<Registry> {
    media_engine
        .register_header_extension(
            RtpHeaderExtensionCapability {
                uri: sdp::extmap::TRANSPORT_CC_URI.to_owned(),
            },
            MediaKind::Video,
            vec![],
        )
        .await?;

    media_engine
        .register_header_extension(
            RtpHeaderExtensionCapability {
                uri: sdp::extmap::TRANSPORT_CC_URI.to_owned(),
            },
            MediaKind::Audio,
            vec![],
        )
        .await?;

    let header_extension = Box::new(interceptor::twcc::sender::Sender::builder());
    registry.add(header_extension);
    Ok(registry)
}

/// configure_twcc_sender generates transport-wide congestion control
/// reports for inbound traffic.
pub async fn configure_twcc_sender(
    mut registry: Registry,
    media_engine: &mut MediaEngine,
) -> Result<Registry> {
    media_engine.register_feedback(
        RtcpFeedback {
            typ: TYPE_RTCP_FB_TRANSPORT_CC.to_owned(),
            ..Default::default()
        },
        MediaKind::Video,
    );
    media_engine
        .register_header_extension(
            RtpHeaderExtensionCapability {
                uri: sdp::extmap::TRANSPORT_CC_URI.to_owned(),
            },
            MediaKind::Video,
            vec![],
        )
        .await?;

    media_engine.register_feedback(
        RtcpFeedback {
            typ: TYPE_RTCP_FB_TRANSPORT_CC.to_owned(),
            ..Default::default()
        },
        MediaKind::Audio,
    );
    media_engine
        .register_header_extension(
            RtpHeaderExtensionCapability {
                uri: sdp::extmap::TRANSPORT_CC_URI.to_owned(),
            },
            MediaKind::Audio,
            vec![],
        )
        .await?;

    registry.add(Box::new(interceptor::twcc::sender::Sender::builder()));
    Ok(registry)
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_configure_nack_registers_feedback() -> Result<()> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;

        let _registry = configure_nack(Registry::new(), &mut m);

        let nack_count = m.video_codecs[0]
            .capability
            .rtcp_feedback
            .iter()
            .filter(|fb| fb.typ == "nack")
            .count();
        // the defaults already carry nack and nack/pli; configure_nack adds
        // its own pair on top
        assert!(nack_count >= 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_default_interceptor_registry_builds() -> Result<()> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut m).await?;
        let chain = registry.build("test")?;
        chain.close().await?;

        Ok(())
    }
}
