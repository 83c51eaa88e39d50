use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use sctp::association::Association;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use util::Conn;

use crate::api::setting_engine::SettingEngine;
use crate::data_channel::{DataChannel, DataChannelParameters, DataChannelState};
use crate::error::{Error, Result};
use crate::transport::dtls::{DtlsRole, DtlsTransport};
use crate::EventFuture;

/// Streams are identified by a u16, so this is the ceiling.
const SCTP_MAX_CHANNELS: u16 = u16::MAX;

/// SctpTransportCapabilities describes the association's limits.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub struct SctpTransportCapabilities {
    pub max_message_size: u32,
}

/// SctpTransportState tracks the association lifecycle.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum SctpTransportState {
    #[default]
    Unspecified = 0,

    /// The transport is negotiating the association.
    Connecting,

    /// The association is established; channels flow.
    Connected,

    /// The transport is closed.
    Closed,
}

impl From<u8> for SctpTransportState {
    fn from(v: u8) -> Self {
        match v {
            1 => SctpTransportState::Connecting,
            2 => SctpTransportState::Connected,
            3 => SctpTransportState::Closed,
            _ => SctpTransportState::Unspecified,
        }
    }
}

impl fmt::Display for SctpTransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            SctpTransportState::Connecting => "connecting",
            SctpTransportState::Connected => "connected",
            SctpTransportState::Closed => "closed",
            _ => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

pub type OnDataChannelFn = Box<dyn (FnMut(Arc<DataChannel>) -> EventFuture) + Send + Sync>;
pub type OnDataChannelOpenedFn = OnDataChannelFn;

/// SctpTransport runs the SCTP association over DTLS and owns the set of
/// data channels.
#[derive(Default)]
pub struct SctpTransport {
    dtls_transport: Arc<DtlsTransport>,

    state: AtomicU8,
    is_started: AtomicBool,
    max_message_size: usize,
    max_channels: u16,

    association: Mutex<Option<Arc<Association>>>,

    on_data_channel_handler: Arc<Mutex<Option<OnDataChannelFn>>>,
    on_data_channel_opened_handler: Arc<Mutex<Option<OnDataChannelOpenedFn>>>,

    /// All channels this transport knows: locally created and inbound.
    pub(crate) data_channels: Arc<Mutex<Vec<Arc<DataChannel>>>>,
    pub(crate) data_channels_opened: Arc<AtomicU32>,
    pub(crate) data_channels_requested: Arc<AtomicU32>,
    data_channels_accepted: Arc<AtomicU32>,

    notify_tx: Arc<Notify>,

    setting_engine: Arc<SettingEngine>,
}

impl SctpTransport {
    pub(crate) fn new(
        dtls_transport: Arc<DtlsTransport>,
        setting_engine: Arc<SettingEngine>,
    ) -> Self {
        SctpTransport {
            dtls_transport,
            state: AtomicU8::new(SctpTransportState::Connecting as u8),
            max_message_size: SctpTransport::calc_message_size(65536, 65536),
            max_channels: SCTP_MAX_CHANNELS,
            setting_engine,
            ..Default::default()
        }
    }

    /// transport returns the DTLS transport the association rides on.
    pub fn dtls_transport(&self) -> Arc<DtlsTransport> {
        Arc::clone(&self.dtls_transport)
    }

    fn calc_message_size(remote_max_message_size: usize, can_send_size: usize) -> usize {
        match (remote_max_message_size, can_send_size) {
            (0, 0) => usize::MAX,
            (0, s) => s,
            (r, 0) => r,
            (r, s) => std::cmp::min(r, s),
        }
    }

    /// start opens the association once DTLS is up, then begins accepting
    /// inbound channels.
    pub async fn start(self: &Arc<Self>, _capabilities: SctpTransportCapabilities) -> Result<()> {
        if self.is_started.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.is_started.store(true, Ordering::SeqCst);

        let dtls_conn = if let Some(conn) = self.dtls_transport.conn().await {
            conn
        } else {
            return Err(Error::ErrSctpTransportDtls);
        };

        let association = Arc::new(
            Association::client(sctp::association::Config {
                net_conn: dtls_conn as Arc<dyn Conn + Send + Sync>,
                max_receive_buffer_size: 0,
                max_message_size: 0,
                name: String::new(),
            })
            .await?,
        );

        {
            let mut a = self.association.lock().await;
            *a = Some(Arc::clone(&association));
        }

        self.state
            .store(SctpTransportState::Connected as u8, Ordering::SeqCst);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.accept_data_channels(association).await;
        });

        Ok(())
    }

    async fn accept_data_channels(self: Arc<Self>, association: Arc<Association>) {
        let dcs = {
            let data_channels = self.data_channels.lock().await;
            data_channels.clone()
        };

        loop {
            let existing: Vec<Arc<data::data_channel::DataChannel>> = {
                let mut raw = vec![];
                for dc in &dcs {
                    if let Ok(detached) = dc.raw_channel().await {
                        raw.push(detached);
                    }
                }
                raw
            };

            let dc = tokio::select! {
                _ = self.notify_tx.notified() => break,
                result = data::data_channel::DataChannel::accept(
                    &association,
                    data::data_channel::Config::default(),
                    &existing,
                ) => match result {
                    Ok(dc) => dc,
                    Err(data::Error::ErrStreamClosed) => break,
                    Err(err) => {
                        log::error!("Failed to accept data channel: {}", err);
                        break;
                    }
                }
            };

            let mut max_retransmits = 0;
            let mut max_packet_lifetime = 0;
            let val = dc.config.reliability_parameter as u16;
            let ordered;

            use data::message::message_channel_open::ChannelType::*;
            match dc.config.channel_type {
                Reliable => ordered = true,
                ReliableUnordered => ordered = false,
                PartialReliableRexmit => {
                    ordered = true;
                    max_retransmits = val;
                }
                PartialReliableRexmitUnordered => {
                    ordered = false;
                    max_retransmits = val;
                }
                PartialReliableTimed => {
                    ordered = true;
                    max_packet_lifetime = val;
                }
                PartialReliableTimedUnordered => {
                    ordered = false;
                    max_packet_lifetime = val;
                }
            }

            let channel = Arc::new(DataChannel::new(
                DataChannelParameters {
                    id: dc.stream_identifier(),
                    label: dc.config.label.clone(),
                    protocol: dc.config.protocol.clone(),
                    negotiated: dc.config.negotiated,
                    ordered,
                    max_packet_life_time: max_packet_lifetime,
                    max_retransmits,
                },
                Arc::clone(&self.setting_engine),
            ));

            self.data_channels_accepted.fetch_add(1, Ordering::SeqCst);
            {
                let mut data_channels = self.data_channels.lock().await;
                data_channels.push(Arc::clone(&channel));
            }

            {
                let mut handler = self.on_data_channel_handler.lock().await;
                if let Some(f) = &mut *handler {
                    f(Arc::clone(&channel)).await;
                    self.data_channels_opened.fetch_add(1, Ordering::SeqCst);
                }
            }

            channel.handle_open(Arc::new(dc)).await;

            {
                let mut handler = self.on_data_channel_opened_handler.lock().await;
                if let Some(f) = &mut *handler {
                    f(channel).await;
                }
            }
        }
    }

    /// stop closes the association.
    pub async fn stop(&self) -> Result<()> {
        {
            let association = {
                let mut association = self.association.lock().await;
                association.take()
            };
            if let Some(a) = association {
                a.close().await?;
            }
        }

        self.state
            .store(SctpTransportState::Closed as u8, Ordering::SeqCst);
        self.notify_tx.notify_waiters();

        Ok(())
    }

    /// on_data_channel fires for every channel announced by the remote.
    pub async fn on_data_channel(&self, f: OnDataChannelFn) {
        let mut handler = self.on_data_channel_handler.lock().await;
        *handler = Some(f);
    }

    /// on_data_channel_opened fires once an inbound channel is live.
    pub async fn on_data_channel_opened(&self, f: OnDataChannelOpenedFn) {
        let mut handler = self.on_data_channel_opened_handler.lock().await;
        *handler = Some(f);
    }

    /// max_channels is the most concurrent streams the association allows.
    pub fn max_channels(&self) -> u16 {
        if self.max_channels == 0 {
            SCTP_MAX_CHANNELS
        } else {
            self.max_channels
        }
    }

    pub fn state(&self) -> SctpTransportState {
        self.state.load(Ordering::SeqCst).into()
    }

    pub(crate) async fn association(&self) -> Option<Arc<Association>> {
        let association = self.association.lock().await;
        association.clone()
    }

    /// generate_and_set_data_channel_id picks the lowest unused stream id
    /// on our side of the id space: even for the DTLS client, odd for the
    /// server (RFC 8832 §6).
    pub(crate) async fn generate_and_set_data_channel_id(
        &self,
        dtls_role: DtlsRole,
        channel_id: &AtomicU16,
    ) -> Result<()> {
        let mut id = 0u16;
        if dtls_role != DtlsRole::Client {
            id += 1;
        }

        let max = self.max_channels();
        let data_channels = self.data_channels.lock().await;
        while id < max - 1 {
            let in_use = data_channels
                .iter()
                .any(|dc| dc.ready_state() != DataChannelState::Closed && dc.id() == id);
            if !in_use {
                channel_id.store(id, Ordering::SeqCst);
                return Ok(());
            }
            id += 2;
        }

        Err(Error::ErrMaxDataChannelId)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sctp_transport_state_round_trip() {
        for (s, state) in [
            ("connecting", SctpTransportState::Connecting),
            ("connected", SctpTransportState::Connected),
            ("closed", SctpTransportState::Closed),
        ] {
            assert_eq!(state.to_string(), s);
            assert_eq!(SctpTransportState::from(state as u8), state);
        }
    }

    #[test]
    fn test_calc_message_size() {
        assert_eq!(SctpTransport::calc_message_size(0, 0), usize::MAX);
        assert_eq!(SctpTransport::calc_message_size(0, 1024), 1024);
        assert_eq!(SctpTransport::calc_message_size(2048, 0), 2048);
        assert_eq!(SctpTransport::calc_message_size(2048, 1024), 1024);
    }
}
