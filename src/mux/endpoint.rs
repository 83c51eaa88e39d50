use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use util::{Buffer, Conn};

use crate::error::Error;
use crate::mux::mux_func::MatchFunc;

/// Endpoint is one demultiplexed view of the muxed conn; it reads only the
/// packets its match function claimed.
pub(crate) struct Endpoint {
    pub(crate) id: usize,
    pub(crate) buffer: Buffer,
    pub(crate) match_fn: MatchFunc,
    pub(crate) next_conn: Arc<dyn Conn + Send + Sync>,
    pub(crate) endpoints: Arc<Mutex<HashMap<usize, Arc<Endpoint>>>>,
}

impl Endpoint {
    /// close unregisters the endpoint from its mux.
    pub(crate) async fn close(&self) -> Result<(), Error> {
        self.buffer.close().await;

        let mut endpoints = self.endpoints.lock().await;
        endpoints.remove(&self.id);

        Ok(())
    }
}

#[async_trait]
impl Conn for Endpoint {
    async fn connect(&self, _addr: SocketAddr) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "not applicable"))
    }

    /// recv returns the next muxed packet claimed by this endpoint.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.buffer.read(buf, None).await {
            Ok(n) => Ok(n),
            Err(err) => Err(io::Error::new(io::ErrorKind::Other, err.to_string())),
        }
    }

    async fn recv_from(&self, _buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        Err(io::Error::new(io::ErrorKind::Other, "not applicable"))
    }

    /// send writes straight through to the underlying conn.
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.next_conn.send(buf).await
    }

    async fn send_to(&self, _buf: &[u8], _target: SocketAddr) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Other, "not applicable"))
    }

    async fn local_addr(&self) -> io::Result<SocketAddr> {
        self.next_conn.local_addr().await
    }
}
