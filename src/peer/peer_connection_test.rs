use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;
use crate::api::interceptors::register_default_interceptors;
use crate::api::media_engine::MediaEngine;
use crate::api::{Api, ApiBuilder};
use crate::error::ErrorKind;

async fn new_api() -> Result<Api> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry =
        register_default_interceptors(interceptor::registry::Registry::new(), &mut media_engine)
            .await?;

    Ok(ApiBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

async fn new_pair() -> Result<(PeerConnection, PeerConnection)> {
    let offerer = new_api().await?.new_peer_connection(Configuration::default()).await?;
    let answerer = new_api().await?.new_peer_connection(Configuration::default()).await?;
    Ok((offerer, answerer))
}

/// Exchanges offer/answer over the "wire" (a string copy), waiting for
/// gathering so candidates ride along.
async fn signal_pair(offerer: &PeerConnection, answerer: &PeerConnection) -> Result<()> {
    let offer = offerer.create_offer(None).await?;
    let mut offer_gathering_complete = offerer.gathering_complete_promise().await;
    offerer.set_local_description(offer).await?;
    let _ = offer_gathering_complete.recv().await;

    let offer = offerer
        .local_description()
        .await
        .ok_or(Error::ErrRemoteDescriptionNil)?;
    let offer = SessionDescription::offer(offer.sdp)?;
    answerer.set_remote_description(offer).await?;

    let answer = answerer.create_answer(None).await?;
    let mut answer_gathering_complete = answerer.gathering_complete_promise().await;
    answerer.set_local_description(answer).await?;
    let _ = answer_gathering_complete.recv().await;

    let answer = answerer
        .local_description()
        .await
        .ok_or(Error::ErrRemoteDescriptionNil)?;
    let answer = SessionDescription::answer(answer.sdp)?;
    offerer.set_remote_description(answer).await
}

#[tokio::test]
async fn test_create_offer_is_idempotent() -> Result<()> {
    let pc = new_api().await?.new_peer_connection(Configuration::default()).await?;
    pc.add_transceiver_from_kind(MediaKind::Video, &[]).await?;

    let first = pc.create_offer(None).await?;
    let second = pc.create_offer(None).await?;
    assert_eq!(
        first.sdp, second.sdp,
        "offer generation must be stable for an unchanged transceiver set"
    );

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_offer_assigns_increasing_mids() -> Result<()> {
    let pc = new_api().await?.new_peer_connection(Configuration::default()).await?;
    pc.add_transceiver_from_kind(MediaKind::Video, &[]).await?;
    pc.add_transceiver_from_kind(MediaKind::Audio, &[]).await?;

    pc.create_offer(None).await?;

    let mids: Vec<String> = {
        let mut out = vec![];
        for t in pc.get_transceivers().await {
            out.push(t.mid().await);
        }
        out
    };
    assert_eq!(mids, vec!["0".to_owned(), "1".to_owned()]);

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_set_local_description_must_match_last_offer() -> Result<()> {
    let pc = new_api().await?.new_peer_connection(Configuration::default()).await?;
    pc.add_transceiver_from_kind(MediaKind::Video, &[]).await?;

    let mut offer = pc.create_offer(None).await?;
    // still valid SDP, but no longer byte-identical to the last offer
    offer.sdp += "a=unrelated\r\n";

    let err = pc.set_local_description(offer).await.unwrap_err();
    assert_eq!(err, Error::ErrSdpDoesNotMatchOffer);
    assert_eq!(err.kind(), ErrorKind::InvalidModification);
    assert_eq!(pc.signaling_state(), SignalingState::Stable);

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_second_set_local_with_answer_shape_fails() -> Result<()> {
    let pc = new_api().await?.new_peer_connection(Configuration::default()).await?;
    pc.add_transceiver_from_kind(MediaKind::Video, &[]).await?;

    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer.clone()).await?;
    assert_eq!(pc.signaling_state(), SignalingState::HaveLocalOffer);

    // same text, wrong type: there is no last answer to match
    let mut answer_shaped = offer;
    answer_shaped.sdp_type = SdpType::Answer;
    let err = pc.set_local_description(answer_shaped).await.unwrap_err();
    assert_eq!(err, Error::ErrSdpDoesNotMatchAnswer);
    assert_eq!(pc.signaling_state(), SignalingState::HaveLocalOffer);

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_rollback_from_stable_is_a_noop() -> Result<()> {
    let pc = new_api().await?.new_peer_connection(Configuration::default()).await?;

    let desc = SessionDescription {
        sdp_type: SdpType::Rollback,
        sdp: String::new(),
        parsed: None,
    };
    pc.set_description(&desc, StateChangeOp::SetRemote).await?;
    assert_eq!(pc.signaling_state(), SignalingState::Stable);

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_rollback_reverts_local_offer() -> Result<()> {
    let pc = new_api().await?.new_peer_connection(Configuration::default()).await?;
    pc.add_transceiver_from_kind(MediaKind::Video, &[]).await?;

    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer).await?;
    assert_eq!(pc.signaling_state(), SignalingState::HaveLocalOffer);

    let desc = SessionDescription {
        sdp_type: SdpType::Rollback,
        sdp: String::new(),
        parsed: None,
    };
    pc.set_description(&desc, StateChangeOp::SetLocal).await?;
    assert_eq!(pc.signaling_state(), SignalingState::Stable);
    assert!(pc.pending_local_description().await.is_none());

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_add_ice_candidate_requires_remote_description() -> Result<()> {
    let pc = new_api().await?.new_peer_connection(Configuration::default()).await?;

    let err = pc
        .add_ice_candidate(IceCandidateInit {
            candidate: "candidate:1 1 udp 2130706431 127.0.0.1 4000 typ host".to_owned(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err, Error::ErrNoRemoteDescription);

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_add_ice_candidate_drops_unparsable() -> Result<()> {
    let (offerer, answerer) = new_pair().await?;
    offerer.create_data_channel("data", None).await?;

    let offer = offerer.create_offer(None).await?;
    offerer.set_local_description(offer.clone()).await?;
    answerer
        .set_remote_description(SessionDescription::offer(offer.sdp)?)
        .await?;

    // unknown typ is logged and dropped, not surfaced
    answerer
        .add_ice_candidate(IceCandidateInit {
            candidate: "candidate:1 1 udp 2130706431 127.0.0.1 4000 typ nonsense".to_owned(),
            ..Default::default()
        })
        .await?;

    offerer.close().await?;
    answerer.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_set_configuration_frozen_fields() -> Result<()> {
    let mut pc = new_api()
        .await?
        .new_peer_connection(Configuration {
            peer_identity: "apollo".to_owned(),
            ..Default::default()
        })
        .await?;

    // a matching identity is accepted, a different one is not
    pc.set_configuration(Configuration {
        peer_identity: "apollo".to_owned(),
        ..Default::default()
    })
    .await?;
    let err = pc
        .set_configuration(Configuration {
            peer_identity: "artemis".to_owned(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err, Error::ErrModifyingPeerIdentity);
    assert_eq!(err.kind(), ErrorKind::InvalidModification);

    // bundle policy and pool size may still move while no local
    // description exists
    pc.set_configuration(Configuration {
        bundle_policy: BundlePolicy::MaxBundle,
        ice_candidate_pool_size: 4,
        ..Default::default()
    })
    .await?;

    pc.add_transceiver_from_kind(MediaKind::Audio, &[]).await?;
    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer).await?;

    let err = pc
        .set_configuration(Configuration {
            bundle_policy: BundlePolicy::MaxCompat,
            ice_candidate_pool_size: 4,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err, Error::ErrModifyingBundlePolicy);
    assert_eq!(err.kind(), ErrorKind::InvalidModification);

    let err = pc
        .set_configuration(Configuration {
            ice_candidate_pool_size: 8,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err, Error::ErrModifyingIceCandidatePoolSize);
    assert_eq!(err.kind(), ErrorKind::InvalidModification);

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_create_data_channel_validation() -> Result<()> {
    let pc = new_api().await?.new_peer_connection(Configuration::default()).await?;

    let err = pc
        .create_data_channel(
            "data",
            Some(DataChannelInit {
                max_packet_life_time: Some(100),
                max_retransmits: Some(5),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err, Error::ErrRetransmitsOrPacketLifeTime);
    assert_eq!(err.kind(), ErrorKind::Type);

    let err = pc
        .create_data_channel(
            "data",
            Some(DataChannelInit {
                protocol: Some("p".repeat(65536)),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err, Error::ErrProtocolTooLarge);

    let err = pc
        .create_data_channel(
            "data",
            Some(DataChannelInit {
                negotiated: Some(true),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err, Error::ErrNegotiatedWithoutId);

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_data_channel_requests_application_section() -> Result<()> {
    let pc = new_api().await?.new_peer_connection(Configuration::default()).await?;
    pc.create_data_channel("data", None).await?;

    let offer = pc.create_offer(None).await?;
    assert!(
        offer.sdp.contains("m=application"),
        "offer must carry a data media section"
    );
    assert!(offer.sdp.contains("webrtc-datachannel"));

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_on_negotiation_needed_fires_for_data_channel() -> Result<()> {
    let pc = new_api().await?.new_peer_connection(Configuration::default()).await?;

    let (fired_tx, mut fired_rx) = mpsc::channel::<()>(1);
    let fired_tx = Arc::new(tokio::sync::Mutex::new(Some(fired_tx)));
    pc.on_negotiation_needed(Box::new(move || {
        let fired_tx = Arc::clone(&fired_tx);
        Box::pin(async move {
            let mut tx = fired_tx.lock().await;
            tx.take();
        })
    }))
    .await;

    pc.create_data_channel("data", None).await?;

    timeout(Duration::from_secs(5), fired_rx.recv())
        .await
        .expect("negotiation_needed should have fired");

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_offer_answer_exchange_returns_to_stable() -> Result<()> {
    let (offerer, answerer) = new_pair().await?;
    offerer.create_data_channel("data", None).await?;

    let offer = offerer.create_offer(None).await?;
    offerer.set_local_description(offer.clone()).await?;
    assert_eq!(offerer.signaling_state(), SignalingState::HaveLocalOffer);

    answerer
        .set_remote_description(SessionDescription::offer(offer.sdp)?)
        .await?;
    assert_eq!(answerer.signaling_state(), SignalingState::HaveRemoteOffer);

    let answer = answerer.create_answer(None).await?;
    assert!(answer.sdp.contains("m=application"));
    answerer.set_local_description(answer.clone()).await?;
    assert_eq!(answerer.signaling_state(), SignalingState::Stable);

    offerer
        .set_remote_description(SessionDescription::answer(answer.sdp)?)
        .await?;
    assert_eq!(offerer.signaling_state(), SignalingState::Stable);

    offerer.close().await?;
    answerer.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_signaling_state_callbacks_in_order() -> Result<()> {
    let pc = new_api().await?.new_peer_connection(Configuration::default()).await?;
    pc.add_transceiver_from_kind(MediaKind::Audio, &[]).await?;

    let states = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let states2 = Arc::clone(&states);
    pc.on_signaling_state_change(Box::new(move |s| {
        let states = Arc::clone(&states2);
        Box::pin(async move {
            let mut states = states.lock().await;
            states.push(s);
        })
    }))
    .await;

    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer).await?;

    let states = states.lock().await;
    assert_eq!(*states, vec![SignalingState::HaveLocalOffer]);

    pc.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_close_and_graceful_close() -> Result<()> {
    let pc = Arc::new(
        new_api().await?.new_peer_connection(Configuration::default()).await?,
    );

    let mut handles = vec![];
    for i in 0..4u32 {
        let pc = Arc::clone(&pc);
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                pc.close().await
            } else {
                pc.graceful_close().await
            }
        }));
    }

    for handle in handles {
        handle.await.expect("no panic")?;
    }

    assert_eq!(pc.signaling_state(), SignalingState::Closed);
    assert_eq!(pc.connection_state(), PeerConnectionState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent() -> Result<()> {
    let pc = new_api().await?.new_peer_connection(Configuration::default()).await?;
    pc.close().await?;
    pc.close().await?;

    assert_eq!(
        pc.create_offer(None).await.unwrap_err(),
        Error::ErrConnectionClosed
    );
    assert_eq!(
        pc.create_data_channel("late", None).await.unwrap_err(),
        Error::ErrConnectionClosed
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_data_channel_end_to_end() -> Result<()> {
    let (offerer, answerer) = new_pair().await?;

    let (open_tx, mut open_rx) = mpsc::channel::<()>(1);
    let open_tx = Arc::new(tokio::sync::Mutex::new(Some(open_tx)));

    let dc = offerer.create_data_channel("data", None).await?;
    dc.on_open(Box::new(move || {
        Box::pin(async move {})
    }))
    .await;

    let label_seen = Arc::new(AtomicU32::new(0));
    let label_seen2 = Arc::clone(&label_seen);
    answerer
        .on_data_channel(Box::new(move |d: Arc<DataChannel>| {
            let open_tx = Arc::clone(&open_tx);
            let label_seen = Arc::clone(&label_seen2);
            Box::pin(async move {
                if d.label() == "data" {
                    label_seen.fetch_add(1, Ordering::SeqCst);
                }
                let mut tx = open_tx.lock().await;
                tx.take();
            })
        }))
        .await;

    signal_pair(&offerer, &answerer).await?;

    timeout(Duration::from_secs(20), open_rx.recv())
        .await
        .expect("remote data channel should have been announced");
    assert_eq!(label_seen.load(Ordering::SeqCst), 1);

    offerer.close().await?;
    answerer.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_renegotiation_keeps_offer_stable() -> Result<()> {
    let (offerer, answerer) = new_pair().await?;
    offerer.create_data_channel("data", None).await?;

    let offer = offerer.create_offer(None).await?;
    offerer.set_local_description(offer.clone()).await?;
    answerer
        .set_remote_description(SessionDescription::offer(offer.sdp)?)
        .await?;
    let answer = answerer.create_answer(None).await?;
    answerer.set_local_description(answer.clone()).await?;
    offerer
        .set_remote_description(SessionDescription::answer(answer.sdp)?)
        .await?;

    // nothing changed: a fresh offer only differs in the origin version
    let renegotiated = offerer.create_offer(None).await?;
    let strip = |sdp: &str| -> Vec<String> {
        sdp.lines()
            .filter(|l| !l.starts_with("o=") && !l.starts_with("a=candidate"))
            .map(|l| l.to_owned())
            .collect()
    };
    let current = offerer
        .current_local_description()
        .await
        .ok_or(Error::ErrRemoteDescriptionNil)?;
    assert_eq!(strip(&renegotiated.sdp), strip(&current.sdp));

    offerer.set_local_description(renegotiated).await?;
    assert_eq!(offerer.signaling_state(), SignalingState::HaveLocalOffer);

    offerer.close().await?;
    answerer.close().await?;
    Ok(())
}
