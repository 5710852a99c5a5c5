//! In-flight request table
//!
//! Sequence numbers are allocated by the table itself, so concurrent callers
//! registering under the shared session lock always get distinct numbers.
//! An entry leaves the table exactly once: resolved, rejected, timed out or
//! failed at termination.

use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use super::types::ResponseMessage;
use crate::common::{Error, Result};

/// Receiving end handed back to the caller of a request
pub type Waiter = oneshot::Receiver<Result<Option<Value>>>;

/// A request awaiting its response
#[derive(Debug)]
pub struct PendingRequest {
    pub seq: i64,
    pub command: String,
    pub issued_at: Instant,
    waiter: oneshot::Sender<Result<Option<Value>>>,
}

impl PendingRequest {
    pub fn age(&self) -> Duration {
        self.issued_at.elapsed()
    }

    fn settle(self, outcome: Result<Option<Value>>) {
        // The caller may have stopped waiting; nothing to do in that case
        let _ = self.waiter.send(outcome);
    }
}

/// Table of in-flight requests keyed by sequence number
#[derive(Debug)]
pub struct PendingTable {
    next_seq: i64,
    pending: HashMap<i64, PendingRequest>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate the next sequence number and register a waiter for it
    pub fn register(&mut self, command: &str) -> (i64, Waiter) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            seq,
            PendingRequest {
                seq,
                command: command.to_string(),
                issued_at: Instant::now(),
                waiter: tx,
            },
        );
        (seq, rx)
    }

    /// Complete a request with its response body
    pub fn resolve(&mut self, seq: i64, body: Option<Value>) -> bool {
        match self.pending.remove(&seq) {
            Some(request) => {
                tracing::trace!(seq, command = %request.command, elapsed = ?request.age(), "request resolved");
                request.settle(Ok(body));
                true
            }
            None => false,
        }
    }

    /// Fail a request with an error
    pub fn reject(&mut self, seq: i64, error: Error) -> bool {
        match self.pending.remove(&seq) {
            Some(request) => {
                tracing::debug!(seq, command = %request.command, %error, "request rejected");
                request.settle(Err(error));
                true
            }
            None => false,
        }
    }

    /// Route a response frame to its waiter
    ///
    /// A response with no matching entry (never sent, already timed out, or
    /// abandoned) is dropped with a warning. Returns whether it matched.
    pub fn complete(&mut self, response: ResponseMessage) -> bool {
        let seq = response.request_seq;
        let Some(request) = self.pending.remove(&seq) else {
            tracing::warn!(
                request_seq = seq,
                command = %response.command,
                "Dropping response with no pending request"
            );
            return false;
        };

        if request.command != response.command {
            tracing::warn!(
                seq,
                expected = %request.command,
                got = %response.command,
                "Response command does not match request"
            );
        }

        let outcome = if response.success {
            Ok(response.body)
        } else {
            Err(Error::adapter_error(&request.command, &response.error_text()))
        };
        request.settle(outcome);
        true
    }

    /// Forget a request without notifying its waiter
    pub fn remove(&mut self, seq: i64) -> Option<PendingRequest> {
        self.pending.remove(&seq)
    }

    /// Fail every pending request, returning how many there were
    pub fn fail_all(&mut self, reason: &str) -> usize {
        let count = self.pending.len();
        for (_, request) in self.pending.drain() {
            request.settle(Err(Error::SessionTerminated(reason.to_string())));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(request_seq: i64, command: &str, success: bool, body: Option<Value>) -> ResponseMessage {
        ResponseMessage {
            seq: 100 + request_seq,
            request_seq,
            success,
            command: command.to_string(),
            message: None,
            body,
        }
    }

    #[test]
    fn test_sequence_numbers_start_at_one_and_increase() {
        let mut table = PendingTable::new();
        let (a, _ra) = table.register("threads");
        let (b, _rb) = table.register("threads");
        table.resolve(a, None);
        let (c, _rc) = table.register("threads");
        assert_eq!((a, b, c), (1, 2, 3));
    }

    #[tokio::test]
    async fn test_out_of_order_completion() {
        let mut table = PendingTable::new();
        let (s1, r1) = table.register("evaluate");
        let (s2, r2) = table.register("evaluate");
        let (s3, r3) = table.register("evaluate");

        assert!(table.complete(response(s3, "evaluate", true, Some(json!({"result": "3"})))));
        assert!(table.complete(response(s1, "evaluate", true, Some(json!({"result": "1"})))));
        assert!(table.complete(response(s2, "evaluate", true, Some(json!({"result": "2"})))));

        assert_eq!(r1.await.unwrap().unwrap(), Some(json!({"result": "1"})));
        assert_eq!(r2.await.unwrap().unwrap(), Some(json!({"result": "2"})));
        assert_eq!(r3.await.unwrap().unwrap(), Some(json!({"result": "3"})));
        assert!(table.is_empty());
    }

    #[test]
    fn test_unmatched_response_is_dropped() {
        let mut table = PendingTable::new();
        let (_seq, _rx) = table.register("threads");
        assert!(!table.complete(response(42, "threads", true, None)));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_response_becomes_adapter_error() {
        let mut table = PendingTable::new();
        let (seq, rx) = table.register("evaluate");
        let mut resp = response(seq, "evaluate", false, None);
        resp.message = Some("name 'c' is not defined".into());
        table.complete(resp);

        match rx.await.unwrap() {
            Err(Error::AdapterError { command, message }) => {
                assert_eq!(command, "evaluate");
                assert_eq!(message, "name 'c' is not defined");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fail_all() {
        let mut table = PendingTable::new();
        let receivers: Vec<_> = (0..3).map(|_| table.register("evaluate").1).collect();
        assert_eq!(table.fail_all("adapter exited"), 3);
        assert!(table.is_empty());

        for rx in receivers {
            assert!(matches!(rx.await.unwrap(), Err(Error::SessionTerminated(_))));
        }
    }

    #[test]
    fn test_removed_request_ignores_late_response() {
        let mut table = PendingTable::new();
        let (seq, _rx) = table.register("stackTrace");
        assert!(table.remove(seq).is_some());
        assert!(!table.complete(response(seq, "stackTrace", true, None)));
        assert!(!table.reject(seq, Error::NoActiveFrame));
    }
}
