//! In-flight request bookkeeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

struct PendingRequest {
    conversation_id: String,
    cancel: CancellationToken,
}

type Requests = Mutex<HashMap<String, PendingRequest>>;

fn lock(requests: &Requests) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
    requests.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pending requests keyed by request id.
#[derive(Default)]
pub(crate) struct PendingTable {
    requests: Arc<Requests>,
}

impl PendingTable {
    fn requests(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        lock(&self.requests)
    }

    /// Register a request. Returns `None` if the id is already in flight.
    ///
    /// The entry is removed when the returned guard drops. The guard owns a
    /// handle on the table, so it can move into the task running the request.
    pub(crate) fn register(&self, request_id: &str, conversation_id: &str) -> Option<PendingGuard> {
        let mut requests = self.requests();
        if requests.contains_key(request_id) {
            return None;
        }
        let cancel = CancellationToken::new();
        requests.insert(
            request_id.to_string(),
            PendingRequest {
                conversation_id: conversation_id.to_string(),
                cancel: cancel.clone(),
            },
        );
        drop(requests);
        Some(PendingGuard {
            requests: Arc::clone(&self.requests),
            request_id: request_id.to_string(),
            cancel,
        })
    }

    /// Signal cancellation. The entry stays until its handler settles.
    pub(crate) fn cancel(&self, request_id: &str) -> bool {
        let requests = self.requests();
        let Some(pending) = requests.get(request_id) else {
            return false;
        };
        debug!(request_id, conversation_id = %pending.conversation_id, "Cancelling request");
        pending.cancel.cancel();
        true
    }

    /// Cancel every pending request and forget them. Returns how many there were.
    pub(crate) fn cancel_all(&self) -> usize {
        let drained: Vec<PendingRequest> = self.requests().drain().map(|(_, p)| p).collect();
        for pending in &drained {
            pending.cancel.cancel();
        }
        drained.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.requests().len()
    }
}

/// Removes its request from the table on drop, whichever way the handler settled.
pub(crate) struct PendingGuard {
    requests: Arc<Requests>,
    request_id: String,
    cancel: CancellationToken,
}

impl PendingGuard {
    pub(crate) const fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.requests).remove(&self.request_id);
    }
}
