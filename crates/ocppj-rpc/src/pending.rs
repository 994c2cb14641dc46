//! The correlation table: outbound calls waiting for their reply.

use std::collections::HashMap;
use std::sync::Arc;

use ocppj_protocol::{CorrelationId, Envelope};
use tokio::sync::{Mutex, oneshot};

use crate::RequestError;

#[derive(Default)]
struct State {
    calls: HashMap<CorrelationId, oneshot::Sender<Envelope>>,
    closed: bool,
}

/// Single-resolution slots keyed by correlation id.
///
/// Dropping a sender is how a call fails with "connection closed": the
/// waiting side sees its receiver error out.
#[derive(Default)]
pub(crate) struct PendingCalls {
    state: Arc<Mutex<State>>,
}

impl PendingCalls {
    /// Reserves a slot for `id`. Fails once the table has been closed.
    ///
    /// The slot lives as long as the returned [`PendingCall`]: dropping it
    /// before the reply arrives frees the entry.
    pub(crate) async fn register(&self, id: CorrelationId) -> Result<PendingCall, RequestError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(RequestError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        state.calls.insert(id.clone(), tx);
        Ok(PendingCall {
            id,
            reply: rx,
            settled: false,
            state: Arc::clone(&self.state),
        })
    }

    /// Hands `reply` to whoever is waiting on its id.
    ///
    /// Returns `false` for an id nobody is waiting on (already resolved,
    /// abandoned, or never ours).
    pub(crate) async fn resolve(&self, reply: Envelope) -> bool {
        let Some(tx) = self.state.lock().await.calls.remove(reply.id()) else {
            return false;
        };
        // The caller may have given up in the meantime.
        let _ = tx.send(reply);
        true
    }

    /// Fails every waiting call and refuses new ones. Returns how many
    /// calls were failed.
    pub(crate) async fn close(&self) -> usize {
        let mut state = self.state.lock().await;
        state.closed = true;
        let failed = state.calls.len();
        state.calls.clear();
        failed
    }

    pub(crate) async fn len(&self) -> usize {
        self.state.lock().await.calls.len()
    }
}

/// One reserved slot in [`PendingCalls`].
///
/// Dropped unsettled (caller timed out, or its future was cancelled) it
/// removes its own entry.
pub(crate) struct PendingCall {
    id: CorrelationId,
    reply: oneshot::Receiver<Envelope>,
    settled: bool,
    state: Arc<Mutex<State>>,
}

impl PendingCall {
    /// Waits for the reply. `None` means the table was closed.
    pub(crate) async fn wait(&mut self) -> Option<Envelope> {
        let reply = (&mut self.reply).await.ok();
        // Resolved or failed, the entry is gone either way.
        self.settled = true;
        reply
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Ok(mut state) = self.state.try_lock() {
            state.calls.remove(&self.id);
            return;
        }
        // Drop is synchronous; finish on the runtime when the lock is busy.
        let state = Arc::clone(&self.state);
        let id = self.id.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                state.lock().await.calls.remove(&id);
            });
        }
    }
}
