pub mod local;
pub mod remote;

use std::sync::Arc;

use interceptor::stream_info::StreamInfo;
use interceptor::{RTCPReader, RTPReader};

use crate::track::remote::TrackRemote;

pub(crate) const RTP_PAYLOAD_TYPE_BITMASK: u8 = 0x7f;

/// The SRTP streams and interceptor taps behind one inbound RTP flow.
#[derive(Default, Clone)]
pub(crate) struct TrackStream {
    pub(crate) stream_info: Option<StreamInfo>,
    pub(crate) rtp_read_stream: Option<Arc<srtp::stream::Stream>>,
    pub(crate) rtp_interceptor: Option<Arc<dyn RTPReader + Send + Sync>>,
    pub(crate) rtcp_read_stream: Option<Arc<srtp::stream::Stream>>,
    pub(crate) rtcp_interceptor: Option<Arc<dyn RTCPReader + Send + Sync>>,
}

/// One remote track together with its primary stream and, for simulcast,
/// the RTX repair stream.
pub(crate) struct TrackStreams {
    pub(crate) track: Arc<TrackRemote>,
    pub(crate) stream: TrackStream,
    pub(crate) repair_stream: TrackStream,
}
