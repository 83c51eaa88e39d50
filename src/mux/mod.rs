pub(crate) mod endpoint;
pub(crate) mod mux_func;

#[cfg(test)]
mod mux_test;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use util::{Buffer, Conn};

use crate::error::Result;
use crate::mux::endpoint::Endpoint;
use crate::mux::mux_func::MatchFunc;

/// The single ICE conn is demultiplexed into endpoints by match functions:
/// DTLS packets feed the handshake, SRTP/SRTCP feed the sessions.
pub(crate) struct Config {
    pub(crate) conn: Arc<dyn Conn + Send + Sync>,
    pub(crate) buffer_size: usize,
}

/// Mux fans packets from one conn out to registered [`Endpoint`]s.
pub(crate) struct Mux {
    next_id: Arc<AtomicUsize>,
    next_conn: Arc<dyn Conn + Send + Sync>,
    pub(crate) endpoints: Arc<Mutex<HashMap<usize, Arc<Endpoint>>>>,
    buffer_size: usize,
    closed_tx: Option<mpsc::Sender<()>>,
}

impl Mux {
    pub(crate) fn new(config: Config) -> Self {
        let (closed_tx, closed_rx) = mpsc::channel(1);

        let m = Mux {
            next_id: Arc::new(AtomicUsize::new(0)),
            next_conn: Arc::clone(&config.conn),
            endpoints: Arc::new(Mutex::new(HashMap::new())),
            buffer_size: config.buffer_size,
            closed_tx: Some(closed_tx),
        };

        let buffer_size = m.buffer_size;
        let next_conn = Arc::clone(&m.next_conn);
        let endpoints = Arc::clone(&m.endpoints);
        tokio::spawn(async move {
            Mux::read_loop(buffer_size, next_conn, closed_rx, endpoints).await;
        });

        m
    }

    /// new_endpoint registers a new endpoint claiming every packet its
    /// match function accepts.
    pub(crate) async fn new_endpoint(&self, match_fn: MatchFunc) -> Arc<Endpoint> {
        let mut endpoints = self.endpoints.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let e = Arc::new(Endpoint {
            id,
            buffer: Buffer::new(0, 0),
            match_fn,
            next_conn: Arc::clone(&self.next_conn),
            endpoints: Arc::clone(&self.endpoints),
        });

        endpoints.insert(e.id, Arc::clone(&e));

        e
    }

    /// remove_endpoint unregisters an endpoint from the mux.
    pub(crate) async fn remove_endpoint(&mut self, e: &Endpoint) {
        let mut endpoints = self.endpoints.lock().await;
        endpoints.remove(&e.id);
    }

    /// close stops the read loop and unblocks every endpoint.
    pub(crate) async fn close(&mut self) {
        self.closed_tx.take();

        let mut endpoints = self.endpoints.lock().await;
        for (_, endpoint) in endpoints.iter() {
            endpoint.buffer.close().await;
        }
        endpoints.clear();
    }

    async fn read_loop(
        buffer_size: usize,
        next_conn: Arc<dyn Conn + Send + Sync>,
        mut closed_rx: mpsc::Receiver<()>,
        endpoints: Arc<Mutex<HashMap<usize, Arc<Endpoint>>>>,
    ) {
        let mut buf = vec![0u8; buffer_size];
        loop {
            let n = tokio::select! {
                _ = closed_rx.recv() => break,
                result = next_conn.recv(&mut buf) => match result {
                    Ok(n) => n,
                    Err(_) => break,
                },
            };

            if let Err(err) = Mux::dispatch(&buf[..n], &endpoints).await {
                log::error!("mux: failed to dispatch: {}", err);
            }
        }
    }

    pub(crate) async fn dispatch(
        buf: &[u8],
        endpoints: &Arc<Mutex<HashMap<usize, Arc<Endpoint>>>>,
    ) -> Result<()> {
        let endpoint = {
            let eps = endpoints.lock().await;
            let mut endpoint = None;
            for ep in eps.values() {
                if (ep.match_fn)(buf) {
                    endpoint = Some(Arc::clone(ep));
                    break;
                }
            }
            endpoint
        };

        if let Some(ep) = endpoint {
            match ep.buffer.write(buf).await {
                // Expected when the endpoint reader lags, the packet is
                // dropped like any congested link would.
                Err(util::Error::ErrBufferFull) => {}
                Err(err) => return Err(err.into()),
                Ok(_) => {}
            }
        } else if !buf.is_empty() {
            log::warn!(
                "mux: no endpoint for packet starting with {}",
                buf[0]
            );
        } else {
            log::warn!("mux: no endpoint for zero length packet");
        }

        Ok(())
    }
}
