use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use data::message::message_channel_open::ChannelType;
use sctp::stream::OnBufferedAmountLowFn;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use waitgroup::WaitGroup;

use crate::api::setting_engine::SettingEngine;
use crate::error::{Error, Result};
use crate::transport::sctp::SctpTransport;
use crate::EventFuture;

pub type OnErrorFn = Box<dyn (FnMut(Error) -> EventFuture) + Send + Sync>;

/// The read buffer each channel drains inbound messages into.
const DATA_CHANNEL_BUFFER_SIZE: u16 = u16::MAX;

/// DataChannelState tracks a channel's lifecycle.
///
/// <https://w3c.github.io/webrtc-pc/#dom-rtcdatachannelstate>
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataChannelState {
    #[serde(rename = "unspecified")]
    #[default]
    Unspecified = 0,

    /// The channel is being established, either by create_data_channel or
    /// while being dispatched from a remote open message.
    #[serde(rename = "connecting")]
    Connecting,

    /// The underlying transport is established; messages flow.
    #[serde(rename = "open")]
    Open,

    /// The shutdown procedure has started.
    #[serde(rename = "closing")]
    Closing,

    /// The underlying transport is closed or could not be established.
    #[serde(rename = "closed")]
    Closed,
}

impl From<u8> for DataChannelState {
    fn from(v: u8) -> Self {
        match v {
            1 => DataChannelState::Connecting,
            2 => DataChannelState::Open,
            3 => DataChannelState::Closing,
            4 => DataChannelState::Closed,
            _ => DataChannelState::Unspecified,
        }
    }
}

impl From<&str> for DataChannelState {
    fn from(raw: &str) -> Self {
        match raw {
            "connecting" => DataChannelState::Connecting,
            "open" => DataChannelState::Open,
            "closing" => DataChannelState::Closing,
            "closed" => DataChannelState::Closed,
            _ => DataChannelState::Unspecified,
        }
    }
}

impl fmt::Display for DataChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            DataChannelState::Connecting => "connecting",
            DataChannelState::Open => "open",
            DataChannelState::Closing => "closing",
            DataChannelState::Closed => "closed",
            _ => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

/// DataChannelInit configures a channel created with create_data_channel.
///
/// <https://w3c.github.io/webrtc-pc/#dom-rtcdatachannelinit>
#[derive(Default, Debug, Clone)]
pub struct DataChannelInit {
    /// Whether messages must arrive in order; defaults to true.
    pub ordered: Option<bool>,

    /// Bound, in milliseconds, on how long the channel retransmits
    /// unacknowledged data. Mutually exclusive with max_retransmits.
    pub max_packet_life_time: Option<u16>,

    /// Bound on how often unacknowledged data is retransmitted. Mutually
    /// exclusive with max_packet_life_time.
    pub max_retransmits: Option<u16>,

    /// Subprotocol name carried in the open message.
    pub protocol: Option<String>,

    /// When true the channel is negotiated out of band and never announced
    /// in-band; both sides create it with the same id.
    pub negotiated: Option<bool>,

    /// Explicit stream id, required for negotiated channels.
    pub id: Option<u16>,
}

/// DataChannelParameters is the resolved configuration of a channel.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChannelParameters {
    pub label: String,
    pub protocol: String,
    pub ordered: bool,
    pub max_packet_life_time: u16,
    pub max_retransmits: u16,
    pub negotiated: bool,
    pub id: u16,
}

/// DataChannelMessage is one inbound message, text or binary.
#[derive(Default, Debug, Clone)]
pub struct DataChannelMessage {
    pub is_string: bool,
    pub data: Bytes,
}

pub type OnMessageFn = Box<dyn (FnMut(DataChannelMessage) -> EventFuture) + Send + Sync>;
pub type OnOpenFn = Box<dyn (FnOnce() -> EventFuture) + Send + Sync>;
pub type OnCloseFn = Box<dyn (FnMut() -> EventFuture) + Send + Sync>;

/// DataChannel is a bidirectional, optionally partially-reliable message
/// channel riding the SCTP association.
#[derive(Default)]
pub struct DataChannel {
    pub(crate) stats_id: String,
    label: String,
    ordered: bool,
    max_packet_lifetime: u16,
    max_retransmits: u16,
    protocol: String,
    negotiated: bool,
    pub(crate) id: AtomicU16,

    ready_state: Arc<AtomicU8>,
    buffered_amount_low_threshold: AtomicUsize,
    detach_called: Arc<AtomicBool>,

    data_channel: Mutex<Option<Arc<data::data_channel::DataChannel>>>,

    on_open_handler: Arc<Mutex<Option<OnOpenFn>>>,
    on_close_handler: Arc<Mutex<Option<OnCloseFn>>>,
    on_error_handler: Arc<Mutex<Option<OnErrorFn>>>,
    on_message_handler: Arc<Mutex<Option<OnMessageFn>>>,
    on_buffered_amount_low: Mutex<Option<OnBufferedAmountLowFn>>,

    /// Present while the read loop runs; graceful_close waits on it.
    read_loop_wait: Arc<Mutex<Option<WaitGroup>>>,

    setting_engine: Arc<SettingEngine>,
}

impl DataChannel {
    pub(crate) fn new(params: DataChannelParameters, setting_engine: Arc<SettingEngine>) -> Self {
        DataChannel {
            stats_id: format!("DataChannel-{}", crate::rand_alpha(16)),
            label: params.label,
            protocol: params.protocol,
            negotiated: params.negotiated,
            id: AtomicU16::new(params.id),
            ordered: params.ordered,
            max_packet_lifetime: params.max_packet_life_time,
            max_retransmits: params.max_retransmits,
            ready_state: Arc::new(AtomicU8::new(DataChannelState::Connecting as u8)),
            detach_called: Arc::new(AtomicBool::new(false)),
            setting_engine,
            ..Default::default()
        }
    }

    /// open dials the channel over an established SCTP transport.
    pub(crate) async fn open(&self, sctp_transport: Arc<SctpTransport>) -> Result<()> {
        if let Some(association) = sctp_transport.association().await {
            {
                let data_channel = self.data_channel.lock().await;
                if data_channel.is_some() {
                    return Ok(());
                }
            }

            let channel_type;
            let reliability_parameter;

            if self.max_packet_lifetime == 0 && self.max_retransmits == 0 {
                reliability_parameter = 0u32;
                if self.ordered {
                    channel_type = ChannelType::Reliable;
                } else {
                    channel_type = ChannelType::ReliableUnordered;
                }
            } else if self.max_retransmits != 0 {
                reliability_parameter = self.max_retransmits as u32;
                if self.ordered {
                    channel_type = ChannelType::PartialReliableRexmit;
                } else {
                    channel_type = ChannelType::PartialReliableRexmitUnordered;
                }
            } else {
                reliability_parameter = self.max_packet_lifetime as u32;
                if self.ordered {
                    channel_type = ChannelType::PartialReliableTimed;
                } else {
                    channel_type = ChannelType::PartialReliableTimedUnordered;
                }
            }

            let cfg = data::data_channel::Config {
                channel_type,
                priority: data::message::message_channel_open::CHANNEL_PRIORITY_NORMAL,
                reliability_parameter,
                label: self.label.clone(),
                protocol: self.protocol.clone(),
                negotiated: self.negotiated,
            };

            if !self.negotiated {
                sctp_transport
                    .generate_and_set_data_channel_id(
                        sctp_transport.dtls_transport().role().await,
                        &self.id,
                    )
                    .await?;
            }

            let dc = data::data_channel::DataChannel::dial(
                &association,
                self.id.load(Ordering::SeqCst),
                cfg,
            )
            .await?;

            // buffered_amount_low state installed before open can race
            dc.set_buffered_amount_low_threshold(
                self.buffered_amount_low_threshold.load(Ordering::SeqCst),
            );
            {
                let mut on_buffered_amount_low = self.on_buffered_amount_low.lock().await;
                if let Some(f) = on_buffered_amount_low.take() {
                    dc.on_buffered_amount_low(f);
                }
            }

            self.handle_open(Arc::new(dc)).await;

            Ok(())
        } else {
            Err(Error::ErrSctpTransportDtls)
        }
    }

    /// transport-side entry: the channel is live, start dispatching.
    pub(crate) async fn handle_open(&self, dc: Arc<data::data_channel::DataChannel>) {
        {
            let mut data_channel = self.data_channel.lock().await;
            *data_channel = Some(Arc::clone(&dc));
        }
        self.set_ready_state(DataChannelState::Open);

        {
            let mut handler = self.on_open_handler.lock().await;
            if let Some(f) = handler.take() {
                tokio::spawn(async move {
                    f().await;
                });
            }
        }

        if !self.setting_engine.detach.data_channels {
            let ready_state = Arc::clone(&self.ready_state);
            let on_message_handler = Arc::clone(&self.on_message_handler);
            let on_close_handler = Arc::clone(&self.on_close_handler);
            let on_error_handler = Arc::clone(&self.on_error_handler);

            let wg = WaitGroup::new();
            let worker = wg.worker();
            {
                let mut read_loop_wait = self.read_loop_wait.lock().await;
                *read_loop_wait = Some(wg);
            }

            tokio::spawn(async move {
                let _worker = worker;
                DataChannel::read_loop(
                    dc,
                    ready_state,
                    on_message_handler,
                    on_close_handler,
                    on_error_handler,
                )
                .await;
            });
        }
    }

    async fn read_loop(
        dc: Arc<data::data_channel::DataChannel>,
        ready_state: Arc<AtomicU8>,
        on_message_handler: Arc<Mutex<Option<OnMessageFn>>>,
        on_close_handler: Arc<Mutex<Option<OnCloseFn>>>,
        on_error_handler: Arc<Mutex<Option<OnErrorFn>>>,
    ) {
        let mut buffer = vec![0u8; DATA_CHANNEL_BUFFER_SIZE as usize];
        loop {
            let (n, is_string) = match dc.read_data_channel(&mut buffer).await {
                Ok((0, _)) | Err(data::Error::ErrStreamClosed) => {
                    ready_state.store(DataChannelState::Closed as u8, Ordering::SeqCst);
                    let mut handler = on_close_handler.lock().await;
                    if let Some(f) = &mut *handler {
                        f().await;
                    }
                    break;
                }
                Err(err) => {
                    ready_state.store(DataChannelState::Closed as u8, Ordering::SeqCst);
                    {
                        let mut handler = on_error_handler.lock().await;
                        if let Some(f) = &mut *handler {
                            f(err.into()).await;
                        }
                    }
                    let mut handler = on_close_handler.lock().await;
                    if let Some(f) = &mut *handler {
                        f().await;
                    }
                    break;
                }
                Ok((n, is_string)) => (n, is_string),
            };

            let message = DataChannelMessage {
                is_string,
                data: Bytes::from(buffer[..n].to_vec()),
            };

            let mut handler = on_message_handler.lock().await;
            if let Some(f) = &mut *handler {
                f(message).await;
            }
        }
    }

    /// on_open installs the handler fired once when the channel opens.
    pub async fn on_open(&self, f: OnOpenFn) {
        let mut handler = self.on_open_handler.lock().await;

        if self.ready_state() == DataChannelState::Open {
            tokio::spawn(async move {
                f().await;
            });
        } else {
            *handler = Some(f);
        }
    }

    /// on_close installs the handler fired when the transport under the
    /// channel goes away.
    pub async fn on_close(&self, f: OnCloseFn) {
        let mut handler = self.on_close_handler.lock().await;
        *handler = Some(f);
    }

    /// on_error installs the handler fired for read-path failures.
    pub async fn on_error(&self, f: OnErrorFn) {
        let mut handler = self.on_error_handler.lock().await;
        *handler = Some(f);
    }

    /// on_message installs the inbound message handler.
    pub async fn on_message(&self, f: OnMessageFn) {
        let mut handler = self.on_message_handler.lock().await;
        *handler = Some(f);
    }

    /// send queues binary data; sends on a channel that is already closing
    /// are dropped silently.
    pub async fn send(&self, data: &Bytes) -> Result<usize> {
        match self.ensure_open() {
            Ok(()) => {}
            Err(Error::ErrClosedPipe) => return Ok(0),
            Err(err) => return Err(err),
        }

        let data_channel = self.data_channel.lock().await;
        if let Some(dc) = &*data_channel {
            Ok(dc.write_data_channel(data, false).await?)
        } else {
            Err(Error::ErrDataChannelNotOpen)
        }
    }

    /// send_text queues a UTF-8 string message.
    pub async fn send_text(&self, s: impl Into<String>) -> Result<usize> {
        match self.ensure_open() {
            Ok(()) => {}
            Err(Error::ErrClosedPipe) => return Ok(0),
            Err(err) => return Err(err),
        }

        let data_channel = self.data_channel.lock().await;
        if let Some(dc) = &*data_channel {
            Ok(dc
                .write_data_channel(&Bytes::from(s.into()), true)
                .await?)
        } else {
            Err(Error::ErrDataChannelNotOpen)
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.ready_state() {
            DataChannelState::Open => Ok(()),
            DataChannelState::Closing | DataChannelState::Closed => Err(Error::ErrClosedPipe),
            _ => Err(Error::ErrDataChannelNotOpen),
        }
    }

    /// raw_channel exposes the underlying channel to the SCTP transport's
    /// accept loop.
    pub(crate) async fn raw_channel(&self) -> Result<Arc<data::data_channel::DataChannel>> {
        let data_channel = self.data_channel.lock().await;
        data_channel.clone().ok_or(Error::ErrDataChannelNotOpen)
    }

    /// detach hands the raw channel to the caller. Requires
    /// detach_data_channels on the setting engine, and an open channel.
    pub async fn detach(&self) -> Result<Arc<data::data_channel::DataChannel>> {
        if !self.setting_engine.detach.data_channels {
            return Err(Error::ErrDetachNotEnabled);
        }

        let data_channel = self.data_channel.lock().await;
        if let Some(dc) = &*data_channel {
            self.detach_called.store(true, Ordering::SeqCst);
            Ok(Arc::clone(dc))
        } else {
            Err(Error::ErrDetachBeforeOpened)
        }
    }

    /// close tears the channel down without waiting for its read loop.
    pub async fn close(&self) -> Result<()> {
        if self.ready_state() == DataChannelState::Closed {
            return Ok(());
        }

        self.set_ready_state(DataChannelState::Closing);

        let data_channel = self.data_channel.lock().await;
        if let Some(dc) = &*data_channel {
            Ok(dc.close().await?)
        } else {
            Ok(())
        }
    }

    /// graceful_close additionally waits for the read loop to drain.
    pub async fn graceful_close(&self) -> Result<()> {
        self.close().await?;

        let wait = {
            let mut read_loop_wait = self.read_loop_wait.lock().await;
            read_loop_wait.take()
        };
        if let Some(wg) = wait {
            wg.wait().await;
        }

        Ok(())
    }

    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    pub fn ordered(&self) -> bool {
        self.ordered
    }

    pub fn max_packet_lifetime(&self) -> u16 {
        self.max_packet_lifetime
    }

    pub fn max_retransmits(&self) -> u16 {
        self.max_retransmits
    }

    pub fn protocol(&self) -> &str {
        self.protocol.as_str()
    }

    pub fn negotiated(&self) -> bool {
        self.negotiated
    }

    /// id is the stream id; for in-band channels it is assigned when the
    /// channel opens.
    pub fn id(&self) -> u16 {
        self.id.load(Ordering::SeqCst)
    }

    pub fn ready_state(&self) -> DataChannelState {
        self.ready_state.load(Ordering::SeqCst).into()
    }

    pub(crate) fn set_ready_state(&self, s: DataChannelState) {
        self.ready_state.store(s as u8, Ordering::SeqCst);
    }

    /// buffered_amount is the number of queued-but-unsent bytes.
    pub async fn buffered_amount(&self) -> usize {
        let data_channel = self.data_channel.lock().await;
        if let Some(dc) = &*data_channel {
            dc.buffered_amount()
        } else {
            0
        }
    }

    pub async fn set_buffered_amount_low_threshold(&self, threshold: usize) {
        self.buffered_amount_low_threshold
            .store(threshold, Ordering::SeqCst);
        let data_channel = self.data_channel.lock().await;
        if let Some(dc) = &*data_channel {
            dc.set_buffered_amount_low_threshold(threshold);
        }
    }

    pub async fn on_buffered_amount_low(&self, f: OnBufferedAmountLowFn) {
        let data_channel = self.data_channel.lock().await;
        if let Some(dc) = &*data_channel {
            dc.on_buffered_amount_low(f);
        } else {
            let mut on_buffered_amount_low = self.on_buffered_amount_low.lock().await;
            *on_buffered_amount_low = Some(f);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_data_channel_state_round_trip() {
        for (s, state) in [
            ("connecting", DataChannelState::Connecting),
            ("open", DataChannelState::Open),
            ("closing", DataChannelState::Closing),
            ("closed", DataChannelState::Closed),
        ] {
            assert_eq!(DataChannelState::from(s), state);
            assert_eq!(state.to_string(), s);
            assert_eq!(DataChannelState::from(state as u8), state);
        }
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let dc = DataChannel::new(
            DataChannelParameters {
                label: "data".to_owned(),
                ordered: true,
                ..Default::default()
            },
            Arc::new(SettingEngine::default()),
        );

        assert_eq!(
            dc.send(&Bytes::from_static(b"hi")).await,
            Err(Error::ErrDataChannelNotOpen)
        );
    }

    #[tokio::test]
    async fn test_send_after_close_is_dropped() {
        let dc = DataChannel::new(
            DataChannelParameters {
                label: "data".to_owned(),
                ordered: true,
                ..Default::default()
            },
            Arc::new(SettingEngine::default()),
        );

        dc.set_ready_state(DataChannelState::Closed);
        assert_eq!(dc.send(&Bytes::from_static(b"hi")).await, Ok(0));
        assert_eq!(dc.send_text("hi").await, Ok(0));
    }
}
