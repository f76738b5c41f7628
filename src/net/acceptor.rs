//! Acceptor loops.
//!
//! Each running endpoint owns one [`AcceptorGroup`]: `acceptor_count` tasks
//! that reserve a connection slot, wait in `accept`, and hand the connection
//! to the dispatcher. A group is halted by raising its halt flag and then
//! waking the tasks, either by closing the listen handle (`stop`) or by
//! dialing the socket (`pause`). Backends with a cancel-safe `accept` are
//! woken by the halt flag alone. Whatever an acceptor has already taken off
//! the backlog is dispatched, so halting never drops a client.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::net::backend::{Accepted, ListenHandle, SocketBackend};
use crate::net::worker::Dispatcher;
use crate::observability::metrics;

const INITIAL_ERROR_DELAY: Duration = Duration::from_millis(50);
const MAX_ERROR_DELAY: Duration = Duration::from_millis(1600);

/// Running acceptor tasks of one endpoint.
pub(crate) struct AcceptorGroup {
    halt: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl AcceptorGroup {
    pub(crate) fn spawn<B: SocketBackend>(
        endpoint: &Arc<str>,
        count: usize,
        backend: &Arc<B>,
        handle: &Arc<B::Handle>,
        dispatcher: &Dispatcher,
    ) -> Self {
        let (halt, _) = watch::channel(false);
        let tasks = (0..count)
            .map(|index| {
                let acceptor = Acceptor {
                    endpoint: Arc::clone(endpoint),
                    index,
                    backend: Arc::clone(backend),
                    handle: Arc::clone(handle),
                    dispatcher: dispatcher.clone(),
                    halt: halt.subscribe(),
                };
                tokio::spawn(acceptor.run())
            })
            .collect();
        Self { halt, tasks }
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Ask every acceptor to exit after its current `accept` returns.
    pub(crate) fn halt(&self) {
        self.halt.send_replace(true);
    }

    /// Wait for every acceptor task to finish.
    pub(crate) async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "acceptor task failed");
            }
        }
    }
}

struct Acceptor<B: SocketBackend> {
    endpoint: Arc<str>,
    index: usize,
    backend: Arc<B>,
    handle: Arc<B::Handle>,
    dispatcher: Dispatcher,
    halt: watch::Receiver<bool>,
}

impl<B: SocketBackend> Acceptor<B> {
    fn halted(&self) -> bool {
        *self.halt.borrow()
    }

    async fn run(mut self) {
        debug!(endpoint = %self.endpoint, acceptor = self.index, "acceptor started");
        let mut error_delay = Duration::ZERO;

        loop {
            if self.halted() {
                break;
            }

            // Hold a slot before taking a connection off the backlog.
            let permit = tokio::select! {
                biased;
                _ = halt_requested(&mut self.halt) => break,
                permit = self.dispatcher.reserve() => permit,
            };
            let Some(permit) = permit else {
                break;
            };

            let accepted = if B::CANCEL_SAFE_ACCEPT {
                tokio::select! {
                    biased;
                    _ = halt_requested(&mut self.halt) => break,
                    accepted = self.backend.accept(&self.handle) => accepted,
                }
            } else {
                self.backend.accept(&self.handle).await
            };

            match accepted {
                Ok(Accepted::Connection(connection)) => {
                    // Served even while halting: a client can beat the
                    // wake-up dial, and a wake-up dial is just an empty stream.
                    error_delay = Duration::ZERO;
                    self.dispatcher.dispatch(connection, permit);
                }
                Ok(Accepted::Closed) => break,
                Err(e) => {
                    if self.halted() {
                        break;
                    }
                    metrics::accept_error(&self.endpoint);
                    error_delay = next_error_delay(error_delay);
                    error!(
                        endpoint = %self.endpoint,
                        acceptor = self.index,
                        error = %e,
                        retry_in_ms = error_delay.as_millis() as u64,
                        "accept error"
                    );
                    drop(permit);
                    tokio::select! {
                        biased;
                        _ = halt_requested(&mut self.halt) => break,
                        _ = tokio::time::sleep(error_delay) => {}
                    }
                }
            }
        }

        if self.handle_closed() {
            debug!(endpoint = %self.endpoint, acceptor = self.index, "acceptor exited: listen socket closed");
        } else {
            info!(endpoint = %self.endpoint, acceptor = self.index, "acceptor halted");
        }
    }

    fn handle_closed(&self) -> bool {
        let closed = self.handle.is_closed();
        if !closed && !self.halted() {
            warn!(endpoint = %self.endpoint, acceptor = self.index, "acceptor exited without a halt request");
        }
        closed
    }
}

/// Resolves once the halt flag is raised or the group is gone.
async fn halt_requested(halt: &mut watch::Receiver<bool>) {
    let _ = halt.wait_for(|halted| *halted).await;
}

/// Back-off after a failed `accept`: 50ms doubling up to 1.6s.
fn next_error_delay(current: Duration) -> Duration {
    if current.is_zero() {
        INITIAL_ERROR_DELAY
    } else {
        (current * 2).min(MAX_ERROR_DELAY)
    }
}
