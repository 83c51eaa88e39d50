use std::collections::HashMap;
use std::io::BufReader;
use std::sync::Arc;

use ice::candidate::candidate_base::unmarshal_candidate;
use ice::candidate::Candidate;
use regex::Regex;
use sdp::description::common::{Address, ConnectionInformation};
use sdp::description::media::{MediaDescription, MediaName, RangedPort};
use sdp::description::session::{
    SessionDescription as ParsedSdp, ATTR_KEY_CANDIDATE, ATTR_KEY_CONNECTION_SETUP,
    ATTR_KEY_END_OF_CANDIDATES, ATTR_KEY_EXT_MAP, ATTR_KEY_GROUP, ATTR_KEY_ICELITE, ATTR_KEY_MID,
    ATTR_KEY_MSID, ATTR_KEY_RTCPMUX, ATTR_KEY_RTCPRSIZE, ATTR_KEY_SSRC, ATTR_KEY_SSRCGROUP,
};
use sdp::extmap::ExtMap;
use sdp::util::ConnectionRole;
use url::Url;

use crate::api::media_engine::MediaEngine;
use crate::error::{Error, Result};
use crate::peer::description::SessionDescription;
use crate::transceiver::codecs::{RtcpFeedback, RtpCodecCapability, RtpCodecParameters};
use crate::transceiver::{MediaKind, PayloadType, RtpTransceiver, RtpTransceiverDirection, SSRC};
use crate::transport::candidate::IceCandidate;
use crate::transport::dtls::DtlsFingerprint;
use crate::transport::ice::{IceGatherer, IceGatheringState, IceParameters};
use crate::SDP_ATTRIBUTE_RID;

pub(crate) const MEDIA_SECTION_APPLICATION: &str = "application";

const SEMANTIC_TOKEN_FLOW_IDENTIFICATION: &str = "FID";
const SEMANTIC_TOKEN_FEC_REPAIR: &str = "FEC-FR";

/// TrackDetails is the per-track view extracted from one parse of a remote
/// description: who sends (ssrcs / rids), repaired by what, named how.
#[derive(Default, Debug, Clone)]
pub(crate) struct TrackDetails {
    pub(crate) mid: String,
    pub(crate) kind: MediaKind,
    pub(crate) stream_id: String,
    pub(crate) id: String,
    pub(crate) ssrcs: Vec<SSRC>,
    pub(crate) rtx_ssrc: Option<SSRC>,
    pub(crate) fec_ssrc: Option<SSRC>,
    pub(crate) rids: Vec<String>,
}

pub(crate) fn track_details_for_ssrc(
    track_details: &[TrackDetails],
    ssrc: SSRC,
) -> Option<&TrackDetails> {
    track_details.iter().find(|x| x.ssrcs.contains(&ssrc))
}

pub(crate) fn track_details_for_rid<'a>(
    track_details: &'a [TrackDetails],
    rid: &str,
) -> Option<&'a TrackDetails> {
    track_details.iter().find(|x| x.rids.iter().any(|r| r == rid))
}

pub(crate) fn filter_track_with_ssrc(incoming_tracks: &mut Vec<TrackDetails>, ssrc: SSRC) {
    incoming_tracks.retain(|x| !x.ssrcs.contains(&ssrc));
}

/// track_details_from_sdp walks every media section and derives the tracks
/// the remote announced in it.
pub(crate) fn track_details_from_sdp(s: &ParsedSdp, exclude_inactive: bool) -> Vec<TrackDetails> {
    let mut incoming_tracks = vec![];

    for media in &s.media_descriptions {
        // a repair flow shows up as its own ssrc attribute, track which
        // ssrcs repair which so they don't become tracks of their own
        let mut rtx_repair_flows: HashMap<SSRC, SSRC> = HashMap::new();
        let mut fec_repair_flows: HashMap<SSRC, SSRC> = HashMap::new();

        let mut tracks_in_media_section: Vec<TrackDetails> = vec![];

        let mid_value = match get_mid_value(media) {
            Some(mid) if !mid.is_empty() => mid,
            _ => continue,
        };

        if media.media_name.media == MEDIA_SECTION_APPLICATION {
            continue;
        }

        let kind = MediaKind::from(media.media_name.media.as_str());
        if kind == MediaKind::Unspecified {
            continue;
        }

        // a recvonly remote never sends; an inactive one may resume, so it
        // is only dropped on request
        let direction = get_peer_direction(media);
        if direction == RtpTransceiverDirection::Recvonly {
            continue;
        }
        if exclude_inactive && direction == RtpTransceiverDirection::Inactive {
            continue;
        }

        let mut stream_id = "";
        let mut track_id = "";
        let mut rids: Vec<String> = vec![];

        for attr in &media.attributes {
            match attr.key.as_str() {
                ATTR_KEY_SSRCGROUP => {
                    if let Some(value) = &attr.value {
                        let split: Vec<&str> = value.split(' ').collect();
                        if split.len() == 3 {
                            if let (Ok(base), Ok(repair)) =
                                (split[1].parse::<SSRC>(), split[2].parse::<SSRC>())
                            {
                                match split[0] {
                                    SEMANTIC_TOKEN_FLOW_IDENTIFICATION => {
                                        rtx_repair_flows.insert(repair, base);
                                    }
                                    SEMANTIC_TOKEN_FEC_REPAIR => {
                                        fec_repair_flows.insert(repair, base);
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                }
                ATTR_KEY_MSID => {
                    if let Some(value) = &attr.value {
                        let split: Vec<&str> = value.split(' ').collect();
                        if split.len() == 2 {
                            stream_id = split[0];
                            track_id = split[1];
                        }
                    }
                }
                SDP_ATTRIBUTE_RID => {
                    if let Some(value) = &attr.value {
                        if let Some(rid) = value.split(' ').next() {
                            rids.push(rid.to_owned());
                        }
                    }
                }
                _ => {}
            }
        }

        for attr in &media.attributes {
            if attr.key.as_str() != ATTR_KEY_SSRC {
                continue;
            }

            let value = match &attr.value {
                Some(value) => value,
                None => continue,
            };

            let split: Vec<&str> = value.split(' ').collect();
            let ssrc = match split[0].parse::<SSRC>() {
                Ok(ssrc) => ssrc,
                Err(_) => {
                    log::warn!("failed to parse ssrc attribute: {}", value);
                    continue;
                }
            };

            if rtx_repair_flows.contains_key(&ssrc) || fec_repair_flows.contains_key(&ssrc) {
                // a repair flow, not a track of its own
                continue;
            }

            if split.len() == 3 && split[1].starts_with("msid:") {
                stream_id = &split[1]["msid:".len()..];
                track_id = split[2];
            }

            let mut found = false;
            for details in &mut tracks_in_media_section {
                if details.ssrcs.contains(&ssrc) {
                    found = true;
                    details.stream_id = stream_id.to_owned();
                    details.id = track_id.to_owned();
                }
            }
            if found {
                continue;
            }

            let mut details = TrackDetails {
                mid: mid_value.to_owned(),
                kind,
                stream_id: stream_id.to_owned(),
                id: track_id.to_owned(),
                ssrcs: vec![ssrc],
                ..Default::default()
            };
            for (repair, base) in &rtx_repair_flows {
                if *base == ssrc {
                    details.rtx_ssrc = Some(*repair);
                }
            }
            for (repair, base) in &fec_repair_flows {
                if *base == ssrc {
                    details.fec_ssrc = Some(*repair);
                }
            }
            tracks_in_media_section.push(details);
        }

        // a simulcast section has rids but no (usable) ssrc lines yet
        if tracks_in_media_section.is_empty() && !rids.is_empty() {
            tracks_in_media_section.push(TrackDetails {
                mid: mid_value.to_owned(),
                kind,
                stream_id: stream_id.to_owned(),
                id: track_id.to_owned(),
                rids,
                ..Default::default()
            });
        }

        incoming_tracks.extend(tracks_in_media_section);
    }

    incoming_tracks
}

pub(crate) fn get_mid_value(media: &MediaDescription) -> Option<&String> {
    for attr in &media.attributes {
        if attr.key == ATTR_KEY_MID {
            return attr.value.as_ref();
        }
    }
    None
}

pub(crate) fn get_peer_direction(media: &MediaDescription) -> RtpTransceiverDirection {
    for a in &media.attributes {
        let direction = RtpTransceiverDirection::from(a.key.as_str());
        if direction != RtpTransceiverDirection::Unspecified {
            return direction;
        }
    }
    RtpTransceiverDirection::Unspecified
}

pub(crate) fn get_by_mid<'a>(
    search_mid: &str,
    desc: &'a SessionDescription,
) -> Option<&'a MediaDescription> {
    let parsed = desc.parsed.as_ref()?;
    parsed
        .media_descriptions
        .iter()
        .find(|m| m.attribute(ATTR_KEY_MID).flatten() == Some(search_mid))
}

/// have_data_channel returns the first application media section.
pub(crate) fn have_data_channel(desc: &SessionDescription) -> Option<&MediaDescription> {
    let parsed = desc.parsed.as_ref()?;
    parsed
        .media_descriptions
        .iter()
        .find(|m| m.media_name.media == MEDIA_SECTION_APPLICATION)
}

pub(crate) fn have_application_media_section(desc: &ParsedSdp) -> bool {
    desc.media_descriptions
        .iter()
        .any(|m| m.media_name.media == MEDIA_SECTION_APPLICATION)
}

/// find_media_section_by_payload_type locates the section that owns a
/// payload type. Payload types are assumed unique across sections; when
/// that is violated the first match wins and a warning is logged.
pub(crate) fn find_media_section_by_payload_type(
    parsed: &ParsedSdp,
    payload_type: PayloadType,
) -> Option<&MediaDescription> {
    let needle = payload_type.to_string();

    let mut matches = parsed
        .media_descriptions
        .iter()
        .filter(|m| m.media_name.formats.iter().any(|f| *f == needle));

    let first = matches.next();
    if first.is_some() && matches.next().is_some() {
        log::warn!(
            "payload type {} appears in multiple media sections, using the first",
            payload_type
        );
    }
    first
}

pub(crate) fn description_is_plan_b(desc: Option<&SessionDescription>) -> Result<bool> {
    if let Some(desc) = desc {
        if let Some(parsed) = &desc.parsed {
            lazy_static! {
                static ref DETECTION_REGEX: Regex =
                    Regex::new(r"(?i)^(audio|video|data)$").expect("static pattern");
            }
            for media in &parsed.media_descriptions {
                if let Some(Some(mid)) = media.attribute(ATTR_KEY_MID) {
                    if DETECTION_REGEX.is_match(mid) {
                        return Ok(true);
                    }
                }
            }
        }
    }
    Ok(false)
}

/// extract_fingerprint pulls the DTLS fingerprint out of the description,
/// session level or the first media section carrying one; all present
/// fingerprints must agree.
pub(crate) fn extract_fingerprint(desc: &ParsedSdp) -> Result<(String, String)> {
    let mut fingerprints = vec![];

    if let Some(fingerprint) = desc.attribute("fingerprint") {
        fingerprints.push(fingerprint.clone());
    }

    for m in &desc.media_descriptions {
        if let Some(Some(fingerprint)) = m.attribute("fingerprint") {
            fingerprints.push(fingerprint.to_owned());
        }
    }

    if fingerprints.is_empty() {
        return Err(Error::ErrSessionDescriptionNoFingerprint);
    }

    for fingerprint in &fingerprints {
        if fingerprint != &fingerprints[0] {
            return Err(Error::ErrSessionDescriptionConflictingFingerprints);
        }
    }

    let parts: Vec<&str> = fingerprints[0].split(' ').collect();
    if parts.len() != 2 {
        return Err(Error::ErrSessionDescriptionInvalidFingerprint);
    }

    Ok((parts[1].to_owned(), parts[0].to_owned()))
}

/// extract_ice_details pulls the remote ufrag, pwd and any embedded
/// candidates. Candidates that fail to parse are logged and dropped.
pub(crate) fn extract_ice_details(
    desc: &ParsedSdp,
) -> Result<(String, String, Vec<IceCandidate>)> {
    let mut candidates = vec![];
    let mut remote_ufrags = vec![];
    let mut remote_pwds = vec![];

    if let Some(ufrag) = desc.attribute("ice-ufrag") {
        remote_ufrags.push(ufrag.clone());
    }
    if let Some(pwd) = desc.attribute("ice-pwd") {
        remote_pwds.push(pwd.clone());
    }

    for m in &desc.media_descriptions {
        if let Some(Some(ufrag)) = m.attribute("ice-ufrag") {
            remote_ufrags.push(ufrag.to_owned());
        }
        if let Some(Some(pwd)) = m.attribute("ice-pwd") {
            remote_pwds.push(pwd.to_owned());
        }

        for a in &m.attributes {
            if a.key != ATTR_KEY_CANDIDATE {
                continue;
            }
            if let Some(value) = &a.value {
                match unmarshal_candidate(value) {
                    Ok(c) => {
                        let candidate: Arc<dyn Candidate + Send + Sync> = Arc::new(c);
                        candidates.push(IceCandidate::from(&candidate));
                    }
                    Err(err) => {
                        log::warn!("dropping unparsable candidate {}: {}", value, err);
                    }
                }
            }
        }
    }

    if remote_ufrags.is_empty() {
        return Err(Error::ErrSessionDescriptionMissingIceUfrag);
    }
    if remote_pwds.is_empty() {
        return Err(Error::ErrSessionDescriptionMissingIcePwd);
    }

    for ufrag in &remote_ufrags {
        if ufrag != &remote_ufrags[0] {
            return Err(Error::ErrSessionDescriptionConflictingIceUfrag);
        }
    }
    for pwd in &remote_pwds {
        if pwd != &remote_pwds[0] {
            return Err(Error::ErrSessionDescriptionConflictingIcePwd);
        }
    }

    Ok((remote_ufrags[0].clone(), remote_pwds[0].clone(), candidates))
}

pub(crate) fn get_rids(media: &MediaDescription) -> HashMap<String, String> {
    let mut rids = HashMap::new();
    for attr in &media.attributes {
        if attr.key == SDP_ATTRIBUTE_RID {
            if let Some(value) = &attr.value {
                if let Some(rid) = value.split(' ').next() {
                    rids.insert(rid.to_owned(), value.to_owned());
                }
            }
        }
    }
    rids
}

/// codecs_from_media_description lifts the rtpmap/fmtp/rtcp-fb lines of a
/// media section into codec parameters, keyed by the remote payload types.
pub(crate) fn codecs_from_media_description(
    m: &MediaDescription,
) -> Result<Vec<RtpCodecParameters>> {
    let s = ParsedSdp {
        media_descriptions: vec![m.clone()],
        ..Default::default()
    };

    let mut out = vec![];
    for payload_str in &m.media_name.formats {
        let payload_type = payload_str.parse::<PayloadType>()?;

        let codec = match s.get_codec_for_payload_type(payload_type) {
            Ok(codec) => codec,
            Err(err) => {
                if payload_type == 0 {
                    continue;
                }
                return Err(err.into());
            }
        };

        let channels = codec.encoding_parameters.parse::<u16>().unwrap_or(0);

        let mut feedback = vec![];
        for raw in &codec.rtcp_feedback {
            let split: Vec<&str> = raw.split(' ').collect();
            let entry = if split.len() == 2 {
                RtcpFeedback {
                    typ: split[0].to_owned(),
                    parameter: split[1].to_owned(),
                }
            } else {
                RtcpFeedback {
                    typ: split[0].to_owned(),
                    parameter: String::new(),
                }
            };
            feedback.push(entry);
        }

        out.push(RtpCodecParameters {
            capability: RtpCodecCapability {
                mime_type: m.media_name.media.clone() + "/" + codec.name.as_str(),
                clock_rate: codec.clock_rate,
                channels,
                sdp_fmtp_line: codec.fmtp.clone(),
                rtcp_feedback: feedback,
            },
            payload_type,
        })
    }

    Ok(out)
}

/// rtp_extensions_from_media_description maps extension URIs to the ids
/// the remote assigned them.
pub(crate) fn rtp_extensions_from_media_description(
    m: &MediaDescription,
) -> Result<HashMap<String, isize>> {
    let mut out = HashMap::new();

    for a in &m.attributes {
        if a.key == ATTR_KEY_EXT_MAP {
            let a_str = a.to_string();
            let mut reader = BufReader::new(a_str.as_bytes());
            let e = ExtMap::unmarshal(&mut reader)?;

            if let Some(uri) = e.uri {
                out.insert(uri.to_string(), e.value);
            }
        }
    }

    Ok(out)
}

/// update_sdp_origin keeps one origin across regenerated descriptions.
/// The session version only moves when the description body does, so
/// regenerating an unchanged description yields identical text.
pub(crate) fn update_sdp_origin(
    origin: &mut sdp::description::session::Origin,
    d: &mut ParsedSdp,
    previous_sdp: &str,
) {
    if origin.session_version == 0 {
        // first description: adopt the generated origin
        origin.session_version = d.origin.session_version;
        origin.session_id = d.origin.session_id;
        return;
    }

    d.origin.session_id = origin.session_id;
    d.origin.session_version = origin.session_version;

    if strip_origin(&d.marshal()) != strip_origin(previous_sdp) {
        origin.session_version += 1;
        d.origin.session_version = origin.session_version;
    }
}

fn strip_origin(sdp: &str) -> String {
    sdp.lines()
        .filter(|l| !l.starts_with("o="))
        .collect::<Vec<&str>>()
        .join("\r\n")
}

/// One m-section of a description under construction.
#[derive(Default)]
pub(crate) struct MediaSection {
    pub(crate) id: String,
    pub(crate) transceivers: Vec<Arc<RtpTransceiver>>,
    pub(crate) data: bool,
    pub(crate) rid_map: HashMap<String, String>,
    /// Direction the remote offered, when answering.
    pub(crate) offered_direction: Option<RtpTransceiverDirection>,
}

pub(crate) struct PopulateSdpParams {
    pub(crate) is_plan_b: bool,
    pub(crate) media_description_fingerprint: bool,
    pub(crate) is_icelite: bool,
    pub(crate) connection_role: ConnectionRole,
    pub(crate) ice_gathering_state: IceGatheringState,
}

struct AddTransceiverSdpParams {
    is_plan_b: bool,
    should_add_candidates: bool,
    mid_value: String,
    dtls_role: ConnectionRole,
    ice_gathering_state: IceGatheringState,
    offered_direction: Option<RtpTransceiverDirection>,
}

/// populate_sdp renders media sections into a session description,
/// bundling every accepted section.
pub(crate) async fn populate_sdp(
    mut d: ParsedSdp,
    dtls_fingerprints: &[DtlsFingerprint],
    media_engine: &Arc<MediaEngine>,
    candidates: &[IceCandidate],
    ice_params: &IceParameters,
    media_sections: &[MediaSection],
    params: PopulateSdpParams,
) -> Result<ParsedSdp> {
    let media_dtls_fingerprints = if params.media_description_fingerprint {
        dtls_fingerprints.to_vec()
    } else {
        vec![]
    };

    let mut bundle_value = "BUNDLE".to_owned();
    let mut bundle_count = 0;

    for (i, m) in media_sections.iter().enumerate() {
        if m.data && !m.transceivers.is_empty() {
            return Err(Error::ErrSdpMediaSectionMediaDataChanInvalid);
        } else if !params.is_plan_b && m.transceivers.len() > 1 {
            return Err(Error::ErrSdpMediaSectionMultipleTrackInvalid);
        }

        // candidates are written once, into the first section
        let should_add_candidates = i == 0;

        let should_add_id = if m.data {
            d = add_data_media_section(
                d,
                &media_dtls_fingerprints,
                m.id.clone(),
                ice_params,
                candidates,
                params.connection_role,
                should_add_candidates,
                params.ice_gathering_state,
            )
            .await?;
            true
        } else {
            let add_params = AddTransceiverSdpParams {
                is_plan_b: params.is_plan_b,
                should_add_candidates,
                mid_value: m.id.clone(),
                dtls_role: params.connection_role,
                ice_gathering_state: params.ice_gathering_state,
                offered_direction: m.offered_direction,
            };
            let (d2, added) = add_transceiver_sdp(
                d,
                &media_dtls_fingerprints,
                media_engine,
                ice_params,
                candidates,
                m,
                add_params,
            )
            .await?;
            d = d2;
            added
        };

        if should_add_id {
            bundle_value += " ";
            bundle_value += &m.id;
            bundle_count += 1;
        }
    }

    if !params.media_description_fingerprint {
        for fingerprint in dtls_fingerprints {
            d = d.with_fingerprint(fingerprint.algorithm.clone(), fingerprint.value.clone());
        }
    }

    if params.is_icelite {
        // RFC 5245 S4.2, the full agent must take the controlling role
        d = d.with_value_attribute(ATTR_KEY_ICELITE.to_owned(), ATTR_KEY_ICELITE.to_owned());
    }

    if bundle_count > 0 {
        d = d.with_value_attribute(ATTR_KEY_GROUP.to_owned(), bundle_value);
    }
    Ok(d)
}

fn add_candidates_to_media_descriptions(
    candidates: &[IceCandidate],
    mut m: MediaDescription,
    ice_gathering_state: IceGatheringState,
) -> Result<MediaDescription> {
    let append_candidate_if_new = |candidate_marshaled: String, m: MediaDescription| {
        for a in &m.attributes {
            if let Some(value) = &a.value {
                if value == &candidate_marshaled {
                    return m;
                }
            }
        }
        m.with_value_attribute(ATTR_KEY_CANDIDATE.to_owned(), candidate_marshaled)
    };

    for c in candidates {
        let candidate = c.to_ice()?;

        candidate.set_component(1);
        m = append_candidate_if_new(candidate.marshal(), m);

        candidate.set_component(2);
        m = append_candidate_if_new(candidate.marshal(), m);
    }

    if ice_gathering_state != IceGatheringState::Complete {
        return Ok(m);
    }
    for a in &m.attributes {
        if a.key == ATTR_KEY_END_OF_CANDIDATES {
            return Ok(m);
        }
    }

    Ok(m.with_property_attribute(ATTR_KEY_END_OF_CANDIDATES.to_owned()))
}

#[allow(clippy::too_many_arguments)]
async fn add_data_media_section(
    d: ParsedSdp,
    dtls_fingerprints: &[DtlsFingerprint],
    mid_value: String,
    ice_params: &IceParameters,
    candidates: &[IceCandidate],
    dtls_role: ConnectionRole,
    should_add_candidates: bool,
    ice_gathering_state: IceGatheringState,
) -> Result<ParsedSdp> {
    let mut media = MediaDescription {
        media_name: MediaName {
            media: MEDIA_SECTION_APPLICATION.to_owned(),
            port: RangedPort {
                value: 9,
                range: None,
            },
            protos: vec![
                "UDP".to_owned(),
                "DTLS".to_owned(),
                "SCTP".to_owned(),
            ],
            formats: vec!["webrtc-datachannel".to_owned()],
        },
        media_title: None,
        connection_information: Some(ConnectionInformation {
            network_type: "IN".to_owned(),
            address_type: "IP4".to_owned(),
            address: Some(Address {
                address: "0.0.0.0".to_owned(),
                ttl: None,
                range: None,
            }),
        }),
        bandwidth: vec![],
        encryption_key: None,
        attributes: vec![],
    }
    .with_value_attribute(
        ATTR_KEY_CONNECTION_SETUP.to_owned(),
        dtls_role.to_string(),
    )
    .with_value_attribute(ATTR_KEY_MID.to_owned(), mid_value)
    .with_property_attribute("sctp-port:5000".to_owned())
    .with_ice_credentials(
        ice_params.username_fragment.clone(),
        ice_params.password.clone(),
    );

    for f in dtls_fingerprints {
        media = media.with_fingerprint(f.algorithm.clone(), f.value.clone());
    }

    if should_add_candidates {
        media = add_candidates_to_media_descriptions(candidates, media, ice_gathering_state)?;
    }

    Ok(d.with_media(media))
}

async fn add_transceiver_sdp(
    d: ParsedSdp,
    dtls_fingerprints: &[DtlsFingerprint],
    media_engine: &Arc<MediaEngine>,
    ice_params: &IceParameters,
    candidates: &[IceCandidate],
    media_section: &MediaSection,
    params: AddTransceiverSdpParams,
) -> Result<(ParsedSdp, bool)> {
    if media_section.transceivers.is_empty() {
        return Err(Error::ErrSdpZeroTransceivers);
    }

    let t = &media_section.transceivers[0];
    let mut media = MediaDescription::new_jsep_media_description(t.kind.to_string(), vec![])
        .with_value_attribute(
            ATTR_KEY_CONNECTION_SETUP.to_owned(),
            params.dtls_role.to_string(),
        )
        .with_value_attribute(ATTR_KEY_MID.to_owned(), params.mid_value.clone())
        .with_ice_credentials(
            ice_params.username_fragment.clone(),
            ice_params.password.clone(),
        )
        .with_property_attribute(ATTR_KEY_RTCPMUX.to_owned())
        .with_property_attribute(ATTR_KEY_RTCPRSIZE.to_owned());

    let codecs = t.get_codecs().await;
    for codec in &codecs {
        let name = codec
            .capability
            .mime_type
            .trim_start_matches("audio/")
            .trim_start_matches("video/")
            .to_owned();
        media = media.with_codec(
            codec.payload_type,
            name,
            codec.capability.clock_rate,
            codec.capability.channels,
            codec.capability.sdp_fmtp_line.clone(),
        );

        for feedback in &codec.capability.rtcp_feedback {
            media = media.with_value_attribute(
                "rtcp-fb".to_owned(),
                format!(
                    "{} {} {}",
                    codec.payload_type, feedback.typ, feedback.parameter
                ),
            );
        }
    }

    if codecs.is_empty() {
        // the section carries nothing we can use; emit a rejected m-line
        // so the section count still lines up (RFC 3264 S6)
        let mut media = MediaDescription::new_jsep_media_description(t.kind.to_string(), vec![]);
        media.media_name.port = RangedPort {
            value: 0,
            range: None,
        };
        media.media_name.formats = vec!["0".to_owned()];
        return Ok((d.with_media(media), false));
    }

    let mut directions = vec![];
    if t.sender().await.is_some() {
        directions.push(RtpTransceiverDirection::Sendonly);
    }
    if t.receiver().await.is_some() {
        directions.push(RtpTransceiverDirection::Recvonly);
    }

    let parameters = media_engine
        .get_rtp_parameters_by_kind(t.kind, &directions)
        .await;
    for rtp_extension in &parameters.header_extensions {
        let ext_url = Url::parse(rtp_extension.uri.as_str())
            .map_err(|e| Error::new(e.to_string()))?;
        media = media.with_extmap(ExtMap {
            value: rtp_extension.id,
            uri: Some(ext_url),
            ..Default::default()
        });
    }

    if !media_section.rid_map.is_empty() {
        let mut recv_rids: Vec<String> = vec![];

        for rid in media_section.rid_map.keys() {
            media = media
                .with_value_attribute(SDP_ATTRIBUTE_RID.to_owned(), rid.to_owned() + " recv");
            recv_rids.push(rid.to_owned());
        }

        media = media.with_value_attribute(
            "simulcast".to_owned(),
            "recv ".to_owned() + recv_rids.join(";").as_str(),
        );
    }

    for mt in &media_section.transceivers {
        if let Some(sender) = mt.sender().await {
            if let Some(track) = sender.track().await {
                media = media.with_media_source(
                    sender.ssrc,
                    track.stream_id().to_owned(), /* cname */
                    track.stream_id().to_owned(), /* streamLabel */
                    track.id().to_owned(),
                );

                if !params.is_plan_b {
                    media = media.with_value_attribute(
                        ATTR_KEY_MSID.to_owned(),
                        track.stream_id().to_owned() + " " + track.id(),
                    );
                    break;
                }
            }
        }
    }

    let direction = match params.offered_direction {
        Some(offered_direction) => {
            use RtpTransceiverDirection::*;
            let transceiver_direction = t.direction();

            match offered_direction {
                Sendonly | Recvonly => {
                    // a sendonly offer must be answered recvonly or
                    // inactive, and vice versa (RFC 3264 S6.1)
                    if transceiver_direction == offered_direction.reverse()
                        || transceiver_direction == Sendrecv
                    {
                        offered_direction.reverse()
                    } else {
                        Inactive
                    }
                }
                _ => transceiver_direction,
            }
        }
        None => t.direction(),
    };
    media = media.with_property_attribute(direction.to_string());

    for fingerprint in dtls_fingerprints {
        media = media.with_fingerprint(fingerprint.algorithm.clone(), fingerprint.value.clone());
    }

    if params.should_add_candidates {
        media =
            add_candidates_to_media_descriptions(candidates, media, params.ice_gathering_state)?;
    }

    Ok((d.with_media(media), true))
}

/// populate_local_candidates folds the candidates gathered so far into a
/// stored description, the way local_description exposes them.
pub(crate) async fn populate_local_candidates(
    orig: Option<&SessionDescription>,
    ice_gatherer: Option<&Arc<IceGatherer>>,
    ice_gathering_state: IceGatheringState,
) -> Option<SessionDescription> {
    let (orig, ice_gatherer) = match (orig, ice_gatherer) {
        (Some(orig), Some(ice_gatherer)) => (orig, ice_gatherer),
        (orig, _) => return orig.cloned(),
    };

    let candidates = match ice_gatherer.get_local_candidates().await {
        Ok(candidates) => candidates,
        Err(_) => return Some(orig.clone()),
    };

    let mut parsed = match orig.unmarshal() {
        Ok(parsed) => parsed,
        Err(_) => return Some(orig.clone()),
    };

    if !parsed.media_descriptions.is_empty() {
        let m = parsed.media_descriptions.remove(0);
        match add_candidates_to_media_descriptions(&candidates, m, ice_gathering_state) {
            Ok(m) => parsed.media_descriptions.insert(0, m),
            Err(_) => return Some(orig.clone()),
        }
    }

    Some(SessionDescription {
        sdp_type: orig.sdp_type,
        sdp: parsed.marshal(),
        parsed: Some(parsed),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use sdp::description::common::Attribute;

    #[test]
    fn test_extract_fingerprint() -> Result<()> {
        // session level
        {
            let s = ParsedSdp {
                attributes: vec![Attribute {
                    key: "fingerprint".to_owned(),
                    value: Some("foo bar".to_owned()),
                }],
                ..Default::default()
            };

            let (fingerprint, hash) = extract_fingerprint(&s)?;
            assert_eq!(fingerprint, "bar");
            assert_eq!(hash, "foo");
        }

        // media level
        {
            let s = ParsedSdp {
                media_descriptions: vec![MediaDescription {
                    attributes: vec![Attribute {
                        key: "fingerprint".to_owned(),
                        value: Some("foo bar".to_owned()),
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            };

            let (fingerprint, hash) = extract_fingerprint(&s)?;
            assert_eq!(fingerprint, "bar");
            assert_eq!(hash, "foo");
        }

        // fingerprint in a later media section still works
        {
            let s = ParsedSdp {
                media_descriptions: vec![
                    MediaDescription::default(),
                    MediaDescription {
                        attributes: vec![Attribute {
                            key: "fingerprint".to_owned(),
                            value: Some("foo bar".to_owned()),
                        }],
                        ..Default::default()
                    },
                ],
                ..Default::default()
            };

            let (fingerprint, hash) = extract_fingerprint(&s)?;
            assert_eq!(fingerprint, "bar");
            assert_eq!(hash, "foo");
        }

        // none at all
        {
            let s = ParsedSdp::default();
            assert_eq!(
                extract_fingerprint(&s),
                Err(Error::ErrSessionDescriptionNoFingerprint)
            );
        }

        // malformed
        {
            let s = ParsedSdp {
                attributes: vec![Attribute {
                    key: "fingerprint".to_owned(),
                    value: Some("foo".to_owned()),
                }],
                ..Default::default()
            };
            assert_eq!(
                extract_fingerprint(&s),
                Err(Error::ErrSessionDescriptionInvalidFingerprint)
            );
        }

        // conflicting
        {
            let s = ParsedSdp {
                attributes: vec![Attribute {
                    key: "fingerprint".to_owned(),
                    value: Some("foo".to_owned()),
                }],
                media_descriptions: vec![MediaDescription {
                    attributes: vec![Attribute {
                        key: "fingerprint".to_owned(),
                        value: Some("foo bar".to_owned()),
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            };
            assert_eq!(
                extract_fingerprint(&s),
                Err(Error::ErrSessionDescriptionConflictingFingerprints)
            );
        }

        Ok(())
    }

    #[test]
    fn test_extract_ice_details() -> Result<()> {
        const UFRAG: &str = "UFRAG";
        const PWD: &str = "PWD";

        // missing ice-pwd
        {
            let s = ParsedSdp {
                media_descriptions: vec![MediaDescription {
                    attributes: vec![Attribute {
                        key: "ice-ufrag".to_owned(),
                        value: Some(UFRAG.to_owned()),
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            };
            assert_eq!(
                extract_ice_details(&s).err(),
                Some(Error::ErrSessionDescriptionMissingIcePwd)
            );
        }

        // missing ice-ufrag
        {
            let s = ParsedSdp {
                media_descriptions: vec![MediaDescription {
                    attributes: vec![Attribute {
                        key: "ice-pwd".to_owned(),
                        value: Some(PWD.to_owned()),
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            };
            assert_eq!(
                extract_ice_details(&s).err(),
                Some(Error::ErrSessionDescriptionMissingIceUfrag)
            );
        }

        // session level credentials
        {
            let s = ParsedSdp {
                attributes: vec![
                    Attribute {
                        key: "ice-ufrag".to_owned(),
                        value: Some(UFRAG.to_owned()),
                    },
                    Attribute {
                        key: "ice-pwd".to_owned(),
                        value: Some(PWD.to_owned()),
                    },
                ],
                ..Default::default()
            };

            let (ufrag, pwd, _) = extract_ice_details(&s)?;
            assert_eq!(ufrag, UFRAG);
            assert_eq!(pwd, PWD);
        }

        // conflicting ufrag between session and media level
        {
            let s = ParsedSdp {
                attributes: vec![Attribute {
                    key: "ice-ufrag".to_owned(),
                    value: Some("otherUfrag".to_owned()),
                }],
                media_descriptions: vec![MediaDescription {
                    attributes: vec![
                        Attribute {
                            key: "ice-ufrag".to_owned(),
                            value: Some(UFRAG.to_owned()),
                        },
                        Attribute {
                            key: "ice-pwd".to_owned(),
                            value: Some(PWD.to_owned()),
                        },
                    ],
                    ..Default::default()
                }],
                ..Default::default()
            };
            assert_eq!(
                extract_ice_details(&s).err(),
                Some(Error::ErrSessionDescriptionConflictingIceUfrag)
            );
        }

        Ok(())
    }

    fn media(kind: &str, attributes: Vec<Attribute>) -> MediaDescription {
        MediaDescription {
            media_name: MediaName {
                media: kind.to_owned(),
                ..Default::default()
            },
            attributes,
            ..Default::default()
        }
    }

    fn attr(key: &str, value: Option<&str>) -> Attribute {
        Attribute {
            key: key.to_owned(),
            value: value.map(|v| v.to_owned()),
        }
    }

    #[test]
    fn test_track_details_from_sdp() {
        let s = ParsedSdp {
            media_descriptions: vec![
                media(
                    "foobar",
                    vec![
                        attr("mid", Some("0")),
                        attr("sendrecv", None),
                        attr("ssrc", Some("1000 msid:unknown_trk_label unknown_trk_guid")),
                    ],
                ),
                media(
                    "audio",
                    vec![
                        attr("mid", Some("1")),
                        attr("sendrecv", None),
                        attr("ssrc", Some("2000 msid:audio_trk_label audio_trk_guid")),
                    ],
                ),
                media(
                    "video",
                    vec![
                        attr("mid", Some("2")),
                        attr("sendrecv", None),
                        attr("ssrc-group", Some("FID 3000 4000")),
                        attr("ssrc", Some("3000 msid:video_trk_label video_trk_guid")),
                        attr("ssrc", Some("4000 msid:rtx_trk_label rtx_trck_guid")),
                    ],
                ),
                media(
                    "video",
                    vec![
                        attr("mid", Some("3")),
                        attr("sendonly", None),
                        attr("msid", Some("video_stream_id video_trk_id")),
                        attr("ssrc", Some("5000")),
                    ],
                ),
                media(
                    "video",
                    vec![
                        attr("sendonly", None),
                        attr(
                            SDP_ATTRIBUTE_RID,
                            Some("f send pt=97;max-width=1280;max-height=720"),
                        ),
                    ],
                ),
            ],
            ..Default::default()
        };

        let tracks = track_details_from_sdp(&s, true);
        assert_eq!(tracks.len(), 3);

        assert!(
            track_details_for_ssrc(&tracks, 1000).is_none(),
            "unknown kind should be skipped"
        );

        let track = track_details_for_ssrc(&tracks, 2000).expect("audio track");
        assert_eq!(track.kind, MediaKind::Audio);
        assert_eq!(track.ssrcs, vec![2000]);
        assert_eq!(track.stream_id, "audio_trk_label");

        let track = track_details_for_ssrc(&tracks, 3000).expect("video track");
        assert_eq!(track.kind, MediaKind::Video);
        assert_eq!(track.ssrcs, vec![3000]);
        assert_eq!(track.stream_id, "video_trk_label");
        assert_eq!(track.rtx_ssrc, Some(4000), "FID group names the rtx ssrc");

        assert!(
            track_details_for_ssrc(&tracks, 4000).is_none(),
            "repair flow must not become its own track"
        );

        let track = track_details_for_ssrc(&tracks, 5000).expect("video track");
        assert_eq!(track.kind, MediaKind::Video);
        assert_eq!(track.id, "video_trk_id");
        assert_eq!(track.stream_id, "video_stream_id");
    }

    #[test]
    fn test_track_details_direction_filtering() {
        let s = ParsedSdp {
            media_descriptions: vec![
                media(
                    "video",
                    vec![
                        attr("mid", Some("1")),
                        attr("inactive", None),
                        attr("ssrc", Some("6000")),
                    ],
                ),
                media(
                    "video",
                    vec![
                        attr("mid", Some("1")),
                        attr("recvonly", None),
                        attr("ssrc", Some("7000")),
                    ],
                ),
            ],
            ..Default::default()
        };

        assert_eq!(
            track_details_from_sdp(&s, true).len(),
            0,
            "inactive and recvonly should be dropped with exclude_inactive"
        );
        assert_eq!(
            track_details_from_sdp(&s, false).len(),
            1,
            "inactive should survive without exclude_inactive"
        );
    }

    #[test]
    fn test_have_application_media_section() {
        let s = ParsedSdp {
            media_descriptions: vec![media(
                "audio",
                vec![attr("sendrecv", None), attr("ssrc", Some("2000"))],
            )],
            ..Default::default()
        };
        assert!(!have_application_media_section(&s));

        let s = ParsedSdp {
            media_descriptions: vec![media(MEDIA_SECTION_APPLICATION, vec![])],
            ..Default::default()
        };
        assert!(have_application_media_section(&s));
    }

    #[test]
    fn test_get_rids() {
        let m = media(
            "video",
            vec![
                attr("sendonly", None),
                attr(
                    SDP_ATTRIBUTE_RID,
                    Some("f send pt=97;max-width=1280;max-height=720"),
                ),
            ],
        );

        let rids = get_rids(&m);
        assert!(!rids.is_empty(), "rid map should be present");
        assert!(rids.contains_key("f"), "rid values should contain 'f'");
    }

    #[test]
    fn test_find_media_section_by_payload_type() {
        let mut audio = media("audio", vec![]);
        audio.media_name.formats = vec!["111".to_owned()];
        let mut video = media("video", vec![]);
        video.media_name.formats = vec!["96".to_owned(), "97".to_owned()];

        let s = ParsedSdp {
            media_descriptions: vec![audio, video],
            ..Default::default()
        };

        let m = find_media_section_by_payload_type(&s, 96).expect("payload type 96");
        assert_eq!(m.media_name.media, "video");
        let m = find_media_section_by_payload_type(&s, 111).expect("payload type 111");
        assert_eq!(m.media_name.media, "audio");
        assert!(find_media_section_by_payload_type(&s, 18).is_none());
    }

    #[test]
    fn test_codecs_from_media_description() -> Result<()> {
        let mut m = media(
            "audio",
            vec![
                attr("rtpmap", Some("111 opus/48000/2")),
                attr("fmtp", Some("111 minptime=10;useinbandfec=1")),
                attr("rtcp-fb", Some("111 goog-remb")),
                attr("rtcp-fb", Some("111 ccm fir")),
            ],
        );
        m.media_name.formats = vec!["111".to_owned()];

        let codecs = codecs_from_media_description(&m)?;

        assert_eq!(
            codecs,
            vec![RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: "audio/opus".to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                    rtcp_feedback: vec![
                        RtcpFeedback {
                            typ: "goog-remb".to_owned(),
                            parameter: String::new(),
                        },
                        RtcpFeedback {
                            typ: "ccm".to_owned(),
                            parameter: "fir".to_owned(),
                        },
                    ],
                },
                payload_type: 111,
            }],
        );

        Ok(())
    }

    #[test]
    fn test_rtp_extensions_from_media_description() -> Result<()> {
        let mut m = media(
            "audio",
            vec![
                attr(
                    "extmap",
                    Some(&("1 ".to_owned() + sdp::extmap::ABS_SEND_TIME_URI)),
                ),
                attr(
                    "extmap",
                    Some(&("3 ".to_owned() + sdp::extmap::SDES_MID_URI)),
                ),
            ],
        );
        m.media_name.formats = vec!["111".to_owned()];

        let extensions = rtp_extensions_from_media_description(&m)?;

        assert_eq!(extensions[sdp::extmap::ABS_SEND_TIME_URI], 1);
        assert_eq!(extensions[sdp::extmap::SDES_MID_URI], 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_populate_sdp_carries_rids() -> Result<()> {
        let mut me = MediaEngine::default();
        me.register_default_codecs()?;
        let me = Arc::new(me);

        let tr = RtpTransceiver::new(
            None,
            None,
            RtpTransceiverDirection::Recvonly,
            MediaKind::Video,
            me.video_codecs.clone(),
            Arc::clone(&me),
        )
        .await;

        let mut rid_map = HashMap::new();
        rid_map.insert("ridkey".to_owned(), "ridkey recv".to_owned());
        let media_sections = vec![MediaSection {
            id: "video".to_owned(),
            transceivers: vec![tr],
            rid_map,
            ..Default::default()
        }];

        let params = PopulateSdpParams {
            is_plan_b: false,
            media_description_fingerprint: false,
            is_icelite: false,
            connection_role: ConnectionRole::Actpass,
            ice_gathering_state: IceGatheringState::Complete,
        };
        let offer = populate_sdp(
            ParsedSdp::default(),
            &[],
            &me,
            &[],
            &IceParameters::default(),
            &media_sections,
            params,
        )
        .await?;

        let mut found = false;
        for desc in &offer.media_descriptions {
            if desc.media_name.media != "video" {
                continue;
            }
            for a in &desc.attributes {
                if a.key == SDP_ATTRIBUTE_RID {
                    if let Some(value) = &a.value {
                        if value.contains("ridkey") {
                            found = true;
                        }
                    }
                }
            }
        }
        assert!(found, "rid key should be present");

        Ok(())
    }

    #[tokio::test]
    async fn test_populate_sdp_rejects_section_without_codecs() -> Result<()> {
        let mut me = MediaEngine::default();
        me.register_codec(
            RtpCodecParameters {
                capability: RtpCodecCapability {
                    mime_type: crate::api::media_engine::MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                payload_type: 2,
            },
            MediaKind::Video,
        )?;
        let me = Arc::new(me);

        let trv = RtpTransceiver::new(
            None,
            None,
            RtpTransceiverDirection::Recvonly,
            MediaKind::Video,
            me.video_codecs.clone(),
            Arc::clone(&me),
        )
        .await;

        // no audio codecs are registered: the audio section gets rejected
        let tra = RtpTransceiver::new(
            None,
            None,
            RtpTransceiverDirection::Recvonly,
            MediaKind::Audio,
            vec![],
            Arc::clone(&me),
        )
        .await;

        let media_sections = vec![
            MediaSection {
                id: "video".to_owned(),
                transceivers: vec![trv],
                ..Default::default()
            },
            MediaSection {
                id: "audio".to_owned(),
                transceivers: vec![tra],
                ..Default::default()
            },
        ];

        let params = PopulateSdpParams {
            is_plan_b: false,
            media_description_fingerprint: false,
            is_icelite: false,
            connection_role: ConnectionRole::Actpass,
            ice_gathering_state: IceGatheringState::Complete,
        };
        let offer = populate_sdp(
            ParsedSdp::default(),
            &[],
            &me,
            &[],
            &IceParameters::default(),
            &media_sections,
            params,
        )
        .await?;

        let mut found_rejected = false;
        for desc in &offer.media_descriptions {
            if desc.media_name.media != "audio" {
                continue;
            }
            found_rejected = true;
            assert_eq!(desc.media_name.formats, vec!["0"]);
            assert_eq!(desc.media_name.port.value, 0);
        }
        assert!(found_rejected, "audio section should have been rejected");

        // and the rejected section must not join the bundle group
        let group = offer.attribute(ATTR_KEY_GROUP).expect("bundle group");
        assert!(group.contains("video"));
        assert!(!group.contains("audio"));

        Ok(())
    }
}
