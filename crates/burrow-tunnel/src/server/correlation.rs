//! Request/response correlation for a single tunnel
//!
//! Each forwarded request registers a [`Receptacle`]: a single-use,
//! capacity-one handoff keyed by the request identifier. The tunnel's read
//! loop delivers into it, the forwarding call waits on it. Exactly one of
//! delivery, deadline expiry, or tunnel close resolves each receptacle.
//!
//! Entries are removed by whichever side finishes first; removal is
//! idempotent, and dropping a receptacle (an abandoned wait) removes its
//! entry too.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Result, TunnelError};
use crate::protocol::ForwardedResponse;

/// `None` is sent when the tunnel closes under a waiting request
type Slot = oneshot::Sender<Option<ForwardedResponse>>;

/// Registrations are numbered so a stale receptacle never removes a newer
/// entry that reuses its identifier
#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<String, (u64, Slot)>,
    next_generation: u64,
    closed: bool,
}

/// What happened to a response handed to [`CorrelationMap::deliver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A waiting receptacle received the response
    Delivered,
    /// No entry exists for the identifier
    Unmatched,
    /// The entry existed but its waiter had already gone
    Dropped,
}

/// Outstanding requests of one tunnel, keyed by request identifier
#[derive(Debug, Default)]
pub struct CorrelationMap {
    inner: Mutex<Inner>,
}

impl CorrelationMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a receptacle for `id`
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::ConnectionClosed`] once the map was closed, and a
    /// protocol error if `id` is already outstanding.
    pub fn register(&self, id: impl Into<String>) -> Result<Receptacle<'_>> {
        let id = id.into();
        let (tx, rx) = oneshot::channel();

        let generation = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(TunnelError::ConnectionClosed);
            }
            if inner.slots.contains_key(&id) {
                return Err(TunnelError::protocol(format!(
                    "request id {id} is already outstanding"
                )));
            }
            let generation = inner.next_generation;
            inner.next_generation += 1;
            inner.slots.insert(id.clone(), (generation, tx));
            generation
        };

        Ok(Receptacle {
            map: self,
            id,
            generation,
            rx,
            settled: false,
        })
    }

    /// Hand a response to the receptacle waiting for its identifier
    ///
    /// Never blocks: the entry is removed under the lock and the send happens
    /// outside it.
    pub fn deliver(&self, response: ForwardedResponse) -> Delivery {
        let slot = self.inner.lock().slots.remove(&response.id);
        match slot {
            Some((_, tx)) => match tx.send(Some(response)) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Dropped,
            },
            None => Delivery::Unmatched,
        }
    }

    /// Remove the entry for `id`; returns whether one existed
    pub fn remove(&self, id: &str) -> bool {
        self.inner.lock().slots.remove(id).is_some()
    }

    /// Remove the entry for `id` only if it is still the given registration
    fn remove_registration(&self, id: &str, generation: u64) {
        let mut inner = self.inner.lock();
        if matches!(inner.slots.get(id), Some((current, _)) if *current == generation) {
            inner.slots.remove(id);
        }
    }

    /// Refuse new registrations and release every waiter with "closed"
    ///
    /// Returns how many waiters were released. Calling it again is a no-op.
    pub fn close(&self) -> usize {
        let drained: Vec<Slot> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.slots.drain().map(|(_, (_, tx))| tx).collect()
        };

        let released = drained.len();
        for tx in drained {
            let _ = tx.send(None);
        }
        released
    }

    /// Whether [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of outstanding requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Whether no request is outstanding
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Waiting half of a registered request
///
/// Resolves exactly once through [`wait_until`](Self::wait_until). Dropping
/// it before then removes the entry from the map.
#[derive(Debug)]
pub struct Receptacle<'a> {
    map: &'a CorrelationMap,
    id: String,
    generation: u64,
    rx: oneshot::Receiver<Option<ForwardedResponse>>,
    settled: bool,
}

impl Receptacle<'_> {
    /// Identifier this receptacle answers to
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the response until `deadline`
    ///
    /// # Errors
    ///
    /// - [`TunnelError::Timeout`] if the deadline passes first
    /// - [`TunnelError::ConnectionClosed`] if the tunnel closed while waiting
    pub async fn wait_until(mut self, deadline: Instant) -> Result<ForwardedResponse> {
        let outcome = tokio::time::timeout_at(deadline, &mut self.rx).await;
        self.settle();

        match outcome {
            Ok(Ok(Some(response))) => Ok(response),
            Ok(Ok(None) | Err(_)) => Err(TunnelError::ConnectionClosed),
            Err(_) => Err(TunnelError::Timeout),
        }
    }

    fn settle(&mut self) {
        if !self.settled {
            self.settled = true;
            self.map.remove_registration(&self.id, self.generation);
        }
    }
}

impl Drop for Receptacle<'_> {
    fn drop(&mut self) {
        self.settle();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn deadline_in(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn test_deliver_wakes_waiter() {
        let map = CorrelationMap::new();
        let receptacle = map.register("r1").unwrap();
        assert_eq!(map.len(), 1);

        let delivery = map.deliver(ForwardedResponse::new("r1", 200).with_body(b"ok".to_vec()));
        assert_eq!(delivery, Delivery::Delivered);

        let response = receptacle.wait_until(deadline_in(1000)).await.unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, b"ok");
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_removes_entry() {
        let map = CorrelationMap::new();
        let receptacle = map.register("slow").unwrap();

        let started = std::time::Instant::now();
        let err = receptacle.wait_until(deadline_in(50)).await.unwrap_err();
        assert!(matches!(err, TunnelError::Timeout));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(map.is_empty());

        // A late response finds nothing to deliver to
        assert_eq!(
            map.deliver(ForwardedResponse::new("slow", 200)),
            Delivery::Unmatched
        );
    }

    #[tokio::test]
    async fn test_close_releases_waiters_as_closed() {
        let map = Arc::new(CorrelationMap::new());

        let waiter = {
            let map = Arc::clone(&map);
            tokio::spawn(async move {
                let receptacle = map.register("r1").unwrap();
                receptacle.wait_until(deadline_in(5000)).await
            })
        };

        while map.is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(map.close(), 1);

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, TunnelError::ConnectionClosed));
        assert!(map.is_empty());
    }

    #[test]
    fn test_register_after_close_fails() {
        let map = CorrelationMap::new();
        assert_eq!(map.close(), 0);
        assert!(map.is_closed());
        assert!(matches!(
            map.register("late").unwrap_err(),
            TunnelError::ConnectionClosed
        ));
        // Closing twice is harmless
        assert_eq!(map.close(), 0);
    }

    #[test]
    fn test_duplicate_outstanding_id_rejected() {
        let map = CorrelationMap::new();
        let _first = map.register("same").unwrap();
        let err = map.register("same").unwrap_err();
        assert!(err.to_string().contains("already outstanding"));
    }

    #[test]
    fn test_id_reusable_after_delivery() {
        let map = CorrelationMap::new();
        let first = map.register("reuse").unwrap();
        assert_eq!(
            map.deliver(ForwardedResponse::new("reuse", 200)),
            Delivery::Delivered
        );
        drop(first);

        let _second = map.register("reuse").unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_stale_receptacle_leaves_reused_id_alone() {
        let map = CorrelationMap::new();
        let first = map.register("reuse").unwrap();
        assert_eq!(
            map.deliver(ForwardedResponse::new("reuse", 200)),
            Delivery::Delivered
        );

        // Registered again while the first receptacle is still alive
        let second = map.register("reuse").unwrap();
        drop(first);
        assert_eq!(map.len(), 1);

        assert_eq!(
            map.deliver(ForwardedResponse::new("reuse", 201)),
            Delivery::Delivered
        );
        drop(second);
        assert!(map.is_empty());
    }

    #[test]
    fn test_drop_removes_entry() {
        let map = CorrelationMap::new();
        let receptacle = map.register("abandoned").unwrap();
        assert_eq!(receptacle.id(), "abandoned");
        assert_eq!(map.len(), 1);

        drop(receptacle);
        assert!(map.is_empty());
        assert!(!map.remove("abandoned"));
    }

    #[test]
    fn test_deliver_unmatched() {
        let map = CorrelationMap::new();
        assert_eq!(
            map.deliver(ForwardedResponse::new("ghost", 200)),
            Delivery::Unmatched
        );
    }

    #[test]
    fn test_second_delivery_for_same_id_is_unmatched() {
        let map = CorrelationMap::new();
        let _receptacle = map.register("once").unwrap();
        assert_eq!(
            map.deliver(ForwardedResponse::new("once", 200)),
            Delivery::Delivered
        );
        assert_eq!(
            map.deliver(ForwardedResponse::new("once", 500)),
            Delivery::Unmatched
        );
    }

    #[tokio::test]
    async fn test_out_of_order_delivery_reaches_right_waiter() {
        let map = CorrelationMap::new();
        let first = map.register("first").unwrap();
        let second = map.register("second").unwrap();

        map.deliver(ForwardedResponse::new("second", 202));
        map.deliver(ForwardedResponse::new("first", 201));

        let deadline = deadline_in(1000);
        let (a, b) = tokio::join!(first.wait_until(deadline), second.wait_until(deadline));
        assert_eq!(a.unwrap().status_code, 201);
        assert_eq!(b.unwrap().status_code, 202);
        assert!(map.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_and_remove_leaves_no_entries() {
        let map = Arc::new(CorrelationMap::new());
        let mut handles = Vec::new();

        for i in 0..200 {
            let map = Arc::clone(&map);
            handles.push(tokio::spawn(async move {
                let id = format!("req-{i}");
                let receptacle = map.register(id.clone()).unwrap();
                match i % 3 {
                    // delivered
                    0 => {
                        map.deliver(ForwardedResponse::new(id, 200));
                        receptacle.wait_until(deadline_in(1000)).await.unwrap();
                    }
                    // timed out
                    1 => {
                        let _ = receptacle.wait_until(deadline_in(5)).await;
                    }
                    // abandoned
                    _ => drop(receptacle),
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(map.is_empty());
    }
}
