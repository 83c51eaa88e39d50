use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::EventFuture;

/// A single queued unit of work. The label only feeds log lines.
pub(crate) struct Operation {
    run: Box<dyn FnOnce() -> EventFuture + Send + Sync>,
    label: &'static str,
}

impl Operation {
    pub(crate) fn new(
        run: impl FnOnce() -> EventFuture + Send + Sync + 'static,
        label: &'static str,
    ) -> Self {
        Operation {
            run: Box::new(run),
            label,
        }
    }
}

pub(crate) type EmptyChainHook = Box<dyn Fn() -> EventFuture + Send + Sync>;

struct ChainInner {
    queue: VecDeque<Operation>,
    closed: bool,
    /// Present while a worker is draining. The receiver completes when the
    /// worker exits, which is what graceful_close waits on.
    worker_done: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
}

/// OperationsChain serializes every description-changing or
/// transport-affecting operation of a connection.
///
/// Operations run one at a time, in enqueue order, on a worker task that is
/// spawned on demand and exits once the queue drains. Failures never leave
/// the chain; an operation reports through its own side effects.
pub(crate) struct OperationsChain {
    inner: Arc<Mutex<ChainInner>>,
    /// When set, the worker fires the empty-chain hook (and clears the
    /// latch) the next time the queue drains.
    update_negotiation_needed_on_empty_chain: Arc<AtomicBool>,
    on_empty_chain: Arc<Mutex<Option<EmptyChainHook>>>,
}

impl OperationsChain {
    pub(crate) fn new() -> Self {
        OperationsChain {
            inner: Arc::new(Mutex::new(ChainInner {
                queue: VecDeque::new(),
                closed: false,
                worker_done: None,
            })),
            update_negotiation_needed_on_empty_chain: Arc::new(AtomicBool::new(false)),
            on_empty_chain: Arc::new(Mutex::new(None)),
        }
    }

    /// set_empty_chain_hook installs the callback the worker invokes when
    /// the chain drains with the latch set. Installed once, at wiring time.
    pub(crate) async fn set_empty_chain_hook(&self, hook: EmptyChainHook) {
        let mut on_empty_chain = self.on_empty_chain.lock().await;
        *on_empty_chain = Some(hook);
    }

    /// request_negotiation_on_empty arms the latch checked by the worker
    /// when it drains the queue.
    pub(crate) fn request_negotiation_on_empty(&self) {
        self.update_negotiation_needed_on_empty_chain
            .store(true, Ordering::SeqCst);
    }

    /// enqueue appends an operation and spawns a worker if none is
    /// draining. Enqueues after close are silently dropped.
    pub(crate) async fn enqueue(&self, op: Operation) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            log::trace!("dropping op {} on closed chain", op.label);
            return;
        }
        inner.queue.push_back(op);
        if inner.worker_done.is_none() {
            self.spawn_worker(&mut inner);
        }
    }

    fn spawn_worker(&self, inner: &mut ChainInner) {
        let (done_tx, done_rx) = mpsc::channel::<()>(1);
        inner.worker_done = Some(Arc::new(Mutex::new(done_rx)));

        let chain = Arc::clone(&self.inner);
        let latch = Arc::clone(&self.update_negotiation_needed_on_empty_chain);
        let hook = Arc::clone(&self.on_empty_chain);

        tokio::spawn(async move {
            // Dropped when this task finishes, releasing graceful_close.
            let _done_tx = done_tx;

            loop {
                let op = {
                    let mut chain = chain.lock().await;
                    match chain.queue.pop_front() {
                        Some(op) => op,
                        None => {
                            chain.worker_done = None;
                            break;
                        }
                    }
                };

                log::trace!("running op: {}", op.label);
                // Each operation runs on its own task so a panic inside one
                // cannot take the whole chain down.
                if tokio::spawn((op.run)()).await.is_err() {
                    log::warn!("op {} panicked", op.label);
                }
            }

            if latch.swap(false, Ordering::SeqCst) {
                let hook = hook.lock().await;
                if let Some(f) = &*hook {
                    f().await;
                }
            }
        });
    }

    pub(crate) async fn is_empty(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.queue.is_empty()
    }

    /// done enqueues a marker operation and waits until it has run, which
    /// means everything enqueued before it has run too.
    pub(crate) async fn done(&self) {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        self.enqueue(Operation::new(
            move || {
                Box::pin(async move {
                    let _ = tx.send(()).await;
                })
            },
            "done marker",
        ))
        .await;
        // If the chain was already closed the marker was dropped and the
        // sender with it; recv returns immediately in that case.
        let _ = rx.recv().await;
    }

    /// close forbids further enqueues without waiting for the worker.
    pub(crate) async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
    }

    /// graceful_close forbids further enqueues and waits for the draining
    /// worker, if any, to finish the operations already queued.
    pub(crate) async fn graceful_close(&self) {
        let worker_done = {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
            inner.worker_done.clone()
        };

        if let Some(done) = worker_done {
            let mut done = done.lock().await;
            let _ = done.recv().await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_operations_enqueue_order() {
        let chain = OperationsChain::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100u32 {
            let seen = Arc::clone(&seen);
            chain
                .enqueue(Operation::new(
                    move || {
                        Box::pin(async move {
                            let mut seen = seen.lock().await;
                            seen.push(i);
                        })
                    },
                    "test op",
                ))
                .await;
        }

        chain.done().await;

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 100);
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "ops ran out of order");
    }

    #[tokio::test]
    async fn test_operations_is_empty() {
        let chain = OperationsChain::new();
        assert!(chain.is_empty().await);

        chain
            .enqueue(Operation::new(|| Box::pin(async {}), "noop"))
            .await;
        chain.done().await;
        assert!(chain.is_empty().await);
    }

    #[tokio::test]
    async fn test_operations_enqueue_after_close_is_dropped() {
        let chain = OperationsChain::new();
        chain.graceful_close().await;

        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        chain
            .enqueue(Operation::new(
                move || {
                    Box::pin(async move {
                        ran2.store(true, Ordering::SeqCst);
                    })
                },
                "after close",
            ))
            .await;

        // done must not hang on a closed chain
        chain.done().await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_operations_graceful_close_waits_for_queued_work() {
        let chain = OperationsChain::new();
        let count = Arc::new(Mutex::new(0u32));

        for _ in 0..10 {
            let count = Arc::clone(&count);
            chain
                .enqueue(Operation::new(
                    move || {
                        Box::pin(async move {
                            tokio::time::sleep(tokio::time::Duration::from_millis(1)).await;
                            let mut count = count.lock().await;
                            *count += 1;
                        })
                    },
                    "slow op",
                ))
                .await;
        }

        chain.graceful_close().await;
        assert_eq!(*count.lock().await, 10);
    }

    #[tokio::test]
    async fn test_operations_panicked_op_does_not_stop_the_chain() {
        let chain = OperationsChain::new();
        let ran = Arc::new(AtomicBool::new(false));

        chain
            .enqueue(Operation::new(
                || {
                    Box::pin(async {
                        panic!("boom");
                    })
                },
                "panicking op",
            ))
            .await;

        let ran2 = Arc::clone(&ran);
        chain
            .enqueue(Operation::new(
                move || {
                    Box::pin(async move {
                        ran2.store(true, Ordering::SeqCst);
                    })
                },
                "survivor",
            ))
            .await;

        chain.done().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_operations_empty_chain_hook_fires_once() {
        let chain = OperationsChain::new();
        let fired = Arc::new(Mutex::new(0u32));

        let fired2 = Arc::clone(&fired);
        chain
            .set_empty_chain_hook(Box::new(move || {
                let fired = Arc::clone(&fired2);
                Box::pin(async move {
                    let mut fired = fired.lock().await;
                    *fired += 1;
                })
            }))
            .await;

        chain.request_negotiation_on_empty();
        // several ops, one latch arm: the hook fires once when the queue drains
        for _ in 0..5 {
            chain
                .enqueue(Operation::new(|| Box::pin(async {}), "noop"))
                .await;
        }
        chain.done().await;
        // give the worker a beat to run the hook after the marker
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;

        assert_eq!(*fired.lock().await, 1);
    }
}
