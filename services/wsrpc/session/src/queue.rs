//! Request correlation queues.
//!
//! A session keeps two of these: one for requests accepted while the socket
//! was still connecting, one for requests already on the wire. Both preserve
//! insertion order so that pending requests flush in the order they were
//! issued.

use std::collections::{HashMap, VecDeque};
use wsrpc_wire::{RequestId, Response};

use crate::deferred::Deferred;
use crate::error::SessionError;

/// An outstanding request
#[derive(Debug)]
pub struct RequestRecord {
    /// Correlation id
    pub id: RequestId,
    /// Serialized request text
    pub payload: String,
    /// Settles the caller's handle
    pub deferred: Deferred<Response>,
}

/// Ordered map from request id to its record
#[derive(Debug, Default)]
pub struct RequestQueue {
    records: HashMap<RequestId, RequestRecord>,
    order: VecDeque<RequestId>,
}

impl RequestQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record at the back. A record with the same id is replaced
    /// in place and returned.
    pub fn insert(&mut self, record: RequestRecord) -> Option<RequestRecord> {
        let id = record.id.clone();
        let previous = self.records.insert(id.clone(), record);
        if previous.is_none() {
            self.order.push_back(id);
        }
        previous
    }

    /// Whether a record with this id is queued
    pub fn contains(&self, id: &RequestId) -> bool {
        self.records.contains_key(id)
    }

    /// Look up a record
    pub fn get(&self, id: &RequestId) -> Option<&RequestRecord> {
        self.records.get(id)
    }

    /// Remove and return a record
    pub fn remove(&mut self, id: &RequestId) -> Option<RequestRecord> {
        let record = self.records.remove(id)?;
        if let Some(position) = self.order.iter().position(|queued| queued == id) {
            self.order.remove(position);
        }
        Some(record)
    }

    /// Remove every record, oldest first
    pub fn drain(&mut self) -> Vec<RequestRecord> {
        let order = std::mem::take(&mut self.order);
        let mut drained = Vec::with_capacity(order.len());
        for id in order {
            if let Some(record) = self.records.remove(&id) {
                drained.push(record);
            }
        }
        drained
    }

    /// Reject and remove every record, oldest first. Returns how many were rejected.
    pub fn reject_all(&mut self, error: &SessionError) -> usize {
        let records = self.drain();
        for record in &records {
            record.deferred.reject(error.clone());
        }
        records.len()
    }

    /// Drop every record without settling it
    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
    }

    /// Number of queued records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::{deferred, DeferredState, ResponseHandle};

    fn record(id: u64) -> (RequestRecord, ResponseHandle<Response>) {
        let (deferred, handle) = deferred();
        let record = RequestRecord {
            id: RequestId::from(id),
            payload: format!(r#"{{"jsonrpc":"2.0","id":{},"method":"m"}}"#, id),
            deferred,
        };
        (record, handle)
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut queue = RequestQueue::new();
        let (first, _h1) = record(1);
        let (second, _h2) = record(2);

        assert!(queue.insert(first).is_none());
        assert!(queue.insert(second).is_none());

        assert_eq!(queue.len(), 2);
        assert!(queue.contains(&RequestId::from(1u64)));
        assert!(!queue.contains(&RequestId::from(3u64)));
        assert!(queue.get(&RequestId::from(2u64)).unwrap().payload.contains("\"id\":2"));
    }

    #[test]
    fn test_drain_preserves_order() {
        let mut queue = RequestQueue::new();
        let mut handles = Vec::new();
        for id in [5, 1, 9, 3] {
            let (r, h) = record(id);
            queue.insert(r);
            handles.push(h);
        }
        queue.remove(&RequestId::from(9u64));

        let ids: Vec<RequestId> = queue.drain().into_iter().map(|r| r.id).collect();
        assert_eq!(
            ids,
            vec![RequestId::from(5u64), RequestId::from(1u64), RequestId::from(3u64)]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut queue = RequestQueue::new();
        let (a, _ha) = record(1);
        let (b, _hb) = record(2);
        let (again, _hc) = record(1);
        queue.insert(a);
        queue.insert(b);

        assert!(queue.insert(again).is_some());
        let ids: Vec<RequestId> = queue.drain().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RequestId::from(1u64), RequestId::from(2u64)]);
    }

    #[tokio::test]
    async fn test_reject_all() {
        let mut queue = RequestQueue::new();
        let (a, ha) = record(1);
        let (b, hb) = record(2);
        queue.insert(a);
        queue.insert(b);

        assert_eq!(queue.reject_all(&SessionError::PendingRequestsOnReconnect), 2);
        assert!(queue.is_empty());
        assert_eq!(ha.state(), DeferredState::Rejected);
        assert_eq!(hb.await, Err(SessionError::PendingRequestsOnReconnect));
    }

    #[tokio::test]
    async fn test_clear_leaves_handles_pending() {
        let mut queue = RequestQueue::new();
        let (a, handle) = record(1);
        queue.insert(a);

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(handle.state(), DeferredState::Pending);
        assert_eq!(handle.await, Err(SessionError::Abandoned));
    }
}
