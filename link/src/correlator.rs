//! Request/response correlation by acknowledgement id.
//!
//! A listener is registered under its ack id *before* the request frame is
//! written. Exactly one of three things settles it: the matching response,
//! the per-call timeout, or connection teardown. Whoever removes the entry
//! from the pending map wins; the others find nothing and back off.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{LinkError, Result};
use crate::models::ResponseEnvelope;

type Settlement = std::result::Result<JsonValue, LinkError>;

/// Handle held by the caller while its request is in flight.
#[derive(Debug)]
pub struct PendingRequest {
    ack_id: u64,
    rx: oneshot::Receiver<Settlement>,
}

impl PendingRequest {
    pub fn ack_id(&self) -> u64 {
        self.ack_id
    }
}

#[derive(Debug)]
pub struct RequestCorrelator {
    next_ack: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Settlement>>>,
    timeout: Duration,
}

impl RequestCorrelator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_ack: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allocate an ack id unique for the lifetime of this correlator.
    pub fn next_ack_id(&self) -> u64 {
        self.next_ack.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a one-shot listener for `ack_id`. A stale listener under the
    /// same id is rejected first.
    pub fn register(&self, ack_id: u64) -> Result<PendingRequest> {
        let (tx, rx) = oneshot::channel();
        let previous = self.lock()?.insert(ack_id, tx);
        if let Some(stale) = previous {
            let _ = stale.send(Err(LinkError::InternalError(format!(
                "ack id {} re-registered",
                ack_id
            ))));
        }
        Ok(PendingRequest { ack_id, rx })
    }

    /// Deliver a response. Returns `false` when no listener is waiting, in
    /// which case the caller should treat the packet as an ordinary message.
    pub fn settle(&self, ack_id: u64, payload: JsonValue) -> bool {
        let sender = match self.lock() {
            Ok(mut pending) => pending.remove(&ack_id),
            Err(e) => {
                log::error!("[courier-link] {}", e);
                None
            },
        };
        match sender {
            Some(tx) => {
                // The receiver may already be gone if the caller was dropped.
                let _ = tx.send(Ok(payload));
                true
            },
            None => false,
        }
    }

    /// Remove a listener without resolving it (send failed, or timed out).
    /// Returns `true` if this call removed it.
    pub fn cancel(&self, ack_id: u64) -> bool {
        self.lock()
            .map(|mut pending| pending.remove(&ack_id).is_some())
            .unwrap_or(false)
    }

    /// Reject every pending request, e.g. when the connection closes.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = match self.lock() {
            Ok(mut pending) => pending.drain().collect(),
            Err(e) => {
                log::error!("[courier-link] {}", e);
                return 0;
            },
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(LinkError::ConnectionClosed(reason.to_string())));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Wait for the raw response payload, bounded by the correlator timeout.
    pub async fn wait(&self, request: PendingRequest) -> Result<JsonValue> {
        let PendingRequest { ack_id, mut rx } = request;
        match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(settlement)) => settlement,
            Ok(Err(_)) => Err(LinkError::ConnectionClosed(format!(
                "listener for ack {} dropped",
                ack_id
            ))),
            Err(_) if self.cancel(ack_id) => Err(LinkError::TimeoutError(format!(
                "no response for ack {} within {:?}",
                ack_id, self.timeout
            ))),
            // The response removed the listener between the deadline firing
            // and the cancel, so it owns the settlement.
            Err(_) => rx.await.unwrap_or_else(|_| {
                Err(LinkError::ConnectionClosed(format!(
                    "listener for ack {} dropped",
                    ack_id
                )))
            }),
        }
    }

    /// Wait for the response and unwrap its envelope: the OK code resolves
    /// with the embedded data, any other code rejects with that code.
    pub async fn wait_envelope(&self, request: PendingRequest) -> Result<JsonValue> {
        let payload = self.wait(request).await?;
        ResponseEnvelope::from_payload(payload)?.into_result()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Settlement>>>> {
        self.pending
            .lock()
            .map_err(|e| LinkError::InternalError(format!("pending map poisoned: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_settle_resolves_envelope_data() {
        let correlator = RequestCorrelator::new(Duration::from_secs(1));
        let ack = correlator.next_ack_id();
        let pending = correlator.register(ack).unwrap();
        assert!(correlator.settle(ack, json!({"code": 1000, "message": "ok", "data": {"n": 1}})));
        let data = correlator.wait_envelope(pending).await.unwrap();
        assert_eq!(data, json!({"n": 1}));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_non_ok_code_rejects() {
        let correlator = RequestCorrelator::new(Duration::from_secs(1));
        let pending = correlator.register(7).unwrap();
        correlator.settle(7, json!({"code": 3103, "message": "unauthorized"}));
        let err = correlator.wait_envelope(pending).await.unwrap_err();
        assert_eq!(err.rejection_code(), Some(3103));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rejects_and_late_response_is_ignored() {
        let correlator = RequestCorrelator::new(Duration::from_secs(3));
        let pending = correlator.register(1).unwrap();
        let err = correlator.wait(pending).await.unwrap_err();
        assert!(matches!(err, LinkError::TimeoutError(_)));
        // A response after the timeout finds no listener.
        assert!(!correlator.settle(1, json!({"code": 1000})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_and_timeout_settle_exactly_once() {
        let correlator = Arc::new(RequestCorrelator::new(Duration::from_millis(100)));
        let pending = correlator.register(9).unwrap();

        let settler = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                correlator.settle(9, json!("late"))
            })
        };

        let outcome = correlator.wait(pending).await;
        let settled = settler.await.unwrap();
        // Exactly one side won the race.
        assert_eq!(outcome.is_ok(), settled);
        assert_eq!(correlator.pending_count(), 0);
        assert!(!correlator.cancel(9));
    }

    #[tokio::test]
    async fn test_unknown_ack_is_not_settled() {
        let correlator = RequestCorrelator::new(Duration::from_secs(1));
        assert!(!correlator.settle(42, json!(null)));
    }

    #[tokio::test]
    async fn test_fail_all_rejects_pending() {
        let correlator = RequestCorrelator::new(Duration::from_secs(5));
        let a = correlator.register(1).unwrap();
        let b = correlator.register(2).unwrap();
        assert_eq!(correlator.fail_all("closed by client"), 2);
        assert!(matches!(correlator.wait(a).await, Err(LinkError::ConnectionClosed(_))));
        assert!(matches!(correlator.wait(b).await, Err(LinkError::ConnectionClosed(_))));
    }

    #[test]
    fn test_ack_ids_are_unique() {
        let correlator = RequestCorrelator::new(Duration::from_secs(1));
        let a = correlator.next_ack_id();
        let b = correlator.next_ack_id();
        assert_ne!(a, b);
    }
}
