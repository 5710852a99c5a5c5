//! Connection to a debug adapter
//!
//! One reader task owns the adapter's output stream. Responses are routed to
//! the pending table, events to the subscribed handlers, both under the same
//! state lock the callers use. Requests are written through a separate async
//! writer lock so a slow pipe never blocks state access.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::codec;
use super::correlator::{PendingTable, Waiter};
use super::events::{EventDispatcher, Flow};
use super::types::{Event, ProtocolMessage, RequestMessage};
use crate::common::{Error, Result};

type BoxedWriter = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// State shared between callers and the reader task
///
/// The implementor owns the pending table and decides what "closed" means.
/// Every method runs under the connection's state lock and must not block.
pub trait ConnectionState: Send + 'static {
    /// Cheap view published to watchers after every mutation
    type Snapshot: Clone + Send + Sync + 'static;

    fn pending(&mut self) -> &mut PendingTable;

    /// Why new requests are refused, if they are
    fn closed_reason(&self) -> Option<String>;

    /// The adapter stream ended or became unreadable
    fn connection_lost(&mut self, reason: &str);

    fn snapshot(&self) -> Self::Snapshot;
}

struct Inner<C> {
    ctx: C,
    dispatcher: EventDispatcher<C>,
}

struct Shared<C: ConnectionState> {
    inner: Mutex<Inner<C>>,
    writer: tokio::sync::Mutex<BoxedWriter>,
    snapshot: watch::Sender<C::Snapshot>,
    connected: AtomicBool,
}

impl<C: ConnectionState> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, Inner<C>> {
        // State mutations are short and panic-free; recover from poison
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, inner: &Inner<C>) {
        self.snapshot.send_replace(inner.ctx.snapshot());
    }

    fn route(&self, message: ProtocolMessage) {
        match message {
            ProtocolMessage::Response(response) => {
                tracing::debug!(
                    request_seq = response.request_seq,
                    command = %response.command,
                    success = response.success,
                    "DAP <<< response"
                );
                let mut inner = self.lock();
                inner.ctx.pending().complete(response);
            }
            ProtocolMessage::Event(message) => {
                tracing::debug!(seq = message.seq, event = %message.event, "DAP <<< event");
                let event = Event::from_message(&message);
                let mut guard = self.lock();
                let inner = &mut *guard;
                inner.dispatcher.dispatch(&mut inner.ctx, &event);
                self.publish(inner);
            }
            ProtocolMessage::Request(request) => {
                tracing::warn!(
                    seq = request.seq,
                    command = %request.command,
                    "Ignoring reverse request from adapter"
                );
            }
        }
    }

    fn connection_lost(&self, reason: &str) {
        let mut guard = self.lock();
        self.connected.store(false, Ordering::Release);
        let inner = &mut *guard;
        inner.ctx.connection_lost(reason);
        inner.dispatcher.clear();
        self.publish(inner);
    }
}

/// DAP client for communicating with a debug adapter
pub struct DapClient<C: ConnectionState> {
    shared: Arc<Shared<C>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    adapter: Mutex<Option<Child>>,
}

impl<C: ConnectionState> DapClient<C> {
    /// Spawn a debug adapter process and connect to its stdio
    pub fn spawn(
        adapter_path: &Path,
        args: &[String],
        ctx: C,
        dispatcher: EventDispatcher<C>,
    ) -> Result<Self> {
        let mut cmd = Command::new(adapter_path);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Let adapter errors go to stderr
            .kill_on_drop(true);

        let mut adapter = cmd.spawn().map_err(|e| {
            Error::AdapterStartFailed(format!(
                "Failed to start {}: {}",
                adapter_path.display(),
                e
            ))
        })?;

        let stdin = adapter
            .stdin
            .take()
            .ok_or_else(|| Error::AdapterStartFailed("Failed to get adapter stdin".to_string()))?;
        let stdout = adapter.stdout.take().ok_or_else(|| {
            Error::AdapterStartFailed("Failed to get adapter stdout".to_string())
        })?;

        tracing::info!(adapter = %adapter_path.display(), pid = ?adapter.id(), "Spawned debug adapter");

        let client = Self::from_transport(stdout, stdin, ctx, dispatcher);
        *client.adapter.lock().unwrap_or_else(|e| e.into_inner()) = Some(adapter);
        Ok(client)
    }

    /// Connect over an arbitrary byte transport
    ///
    /// Must be called inside a tokio runtime; the reader task starts
    /// immediately.
    pub fn from_transport<R, W>(reader: R, writer: W, ctx: C, dispatcher: EventDispatcher<C>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (snapshot, _) = watch::channel(ctx.snapshot());
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner { ctx, dispatcher }),
            writer: tokio::sync::Mutex::new(BufWriter::new(writer)),
            snapshot,
            connected: AtomicBool::new(true),
        });

        let task = tokio::spawn(read_loop(shared.clone(), BufReader::new(reader)));

        Self {
            shared,
            reader_task: Mutex::new(Some(task)),
            adapter: Mutex::new(None),
        }
    }

    /// Run a closure against the shared state, then publish a snapshot
    pub fn with_state<T>(&self, f: impl FnOnce(&mut C) -> T) -> T {
        let mut inner = self.shared.lock();
        let result = f(&mut inner.ctx);
        self.shared.publish(&inner);
        result
    }

    /// Add an event handler after construction
    pub fn subscribe<F>(&self, event: &str, handler: F)
    where
        F: FnMut(&mut C, &Event) -> Flow + Send + 'static,
    {
        self.shared.lock().dispatcher.subscribe(event, handler);
    }

    /// Drop every event handler
    pub fn unsubscribe_all(&self) {
        self.shared.lock().dispatcher.clear();
    }

    /// Watch the published state snapshots
    pub fn watch(&self) -> watch::Receiver<C::Snapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Send a request and return a handle for its response
    ///
    /// The sequence number is allocated while holding the writer, so frames
    /// reach the adapter in sequence order.
    pub async fn submit(&self, command: &str, arguments: Option<Value>) -> Result<ResponseHandle<C>> {
        self.send_request(command, arguments, true).await
    }

    /// Send a teardown request even though the state refuses new requests
    ///
    /// Adapters report `terminated` before they are told to disconnect, so
    /// the final `disconnect` has to pass the closed gate. Only a lost
    /// connection stops it.
    pub async fn submit_teardown(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<ResponseHandle<C>> {
        self.send_request(command, arguments, false).await
    }

    async fn send_request(
        &self,
        command: &str,
        arguments: Option<Value>,
        gated: bool,
    ) -> Result<ResponseHandle<C>> {
        let mut writer = self.shared.writer.lock().await;

        let (seq, rx) = {
            let mut inner = self.shared.lock();
            if !self.shared.connected.load(Ordering::Acquire) {
                return Err(Error::SessionTerminated(
                    "adapter connection is closed".to_string(),
                ));
            }
            if gated {
                if let Some(reason) = inner.ctx.closed_reason() {
                    return Err(Error::SessionTerminated(reason));
                }
            }
            inner.ctx.pending().register(command)
        };

        // From here on the handle owns the pending entry; dropping it on an
        // early return removes the entry again.
        let handle = ResponseHandle {
            seq,
            command: command.to_string(),
            rx,
            shared: self.shared.clone(),
            settled: false,
        };

        let message = ProtocolMessage::Request(RequestMessage {
            seq,
            command: command.to_string(),
            arguments,
        });
        tracing::debug!(seq, command, "DAP >>> request");
        codec::write_message(&mut *writer, &message).await?;

        Ok(handle)
    }

    /// Send a request and wait for its response body
    pub async fn request(
        &self,
        command: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        self.submit(command, arguments).await?.wait(timeout).await
    }

    /// Send a request and parse its response body
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        command: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<T> {
        let handle = self.submit(command, arguments).await?;
        let seq = handle.seq();
        let body = handle.wait(timeout).await?;
        parse_body(command, seq, body)
    }

    /// Kill the adapter process (if we spawned one) and stop reading
    pub async fn shutdown(&self) {
        let child = self.adapter.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut child) = child {
            match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
                Ok(Ok(status)) => tracing::info!(%status, "Debug adapter exited"),
                _ => {
                    tracing::warn!("Debug adapter did not exit, killing it");
                    let _ = child.kill().await;
                }
            }
        }

        let task = self.reader_task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl<C: ConnectionState> Drop for DapClient<C> {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

/// Parse a successful response body into a typed value
pub fn parse_body<T: DeserializeOwned>(command: &str, seq: i64, body: Option<Value>) -> Result<T> {
    serde_json::from_value(body.unwrap_or(Value::Null)).map_err(|e| {
        Error::protocol_violation(
            Some(seq),
            format!("Failed to parse {} response: {}", command, e),
        )
    })
}

async fn read_loop<C, R>(shared: Arc<Shared<C>>, reader: R)
where
    C: ConnectionState,
    R: tokio::io::AsyncBufRead + Unpin + Send,
{
    let messages = codec::decode(reader);
    tokio::pin!(messages);

    let reason = loop {
        match messages.next().await {
            Some(Ok(message)) => shared.route(message),
            Some(Err(Error::ProtocolViolation { request_seq, message })) => {
                tracing::warn!(?request_seq, %message, "Adapter protocol violation");
                if let Some(seq) = request_seq {
                    let mut inner = shared.lock();
                    inner
                        .ctx
                        .pending()
                        .reject(seq, Error::protocol_violation(Some(seq), message));
                }
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Adapter connection failed");
                break format!("adapter connection failed: {}", e);
            }
            None => {
                tracing::info!("Debug adapter closed its output stream");
                break "debug adapter exited".to_string();
            }
        }
    };

    shared.connection_lost(&reason);
}

/// Correlation handle for one in-flight request
///
/// Dropping the handle before the response arrives stops the bridge from
/// waiting; the adapter-side operation is not cancelled and its late
/// response is discarded.
pub struct ResponseHandle<C: ConnectionState> {
    seq: i64,
    command: String,
    rx: Waiter,
    shared: Arc<Shared<C>>,
    settled: bool,
}

impl<C: ConnectionState> ResponseHandle<C> {
    pub fn seq(&self) -> i64 {
        self.seq
    }

    /// Wait for the response, giving up after `timeout`
    pub async fn wait(mut self, timeout: Duration) -> Result<Option<Value>> {
        let outcome = tokio::time::timeout(timeout, &mut self.rx).await;
        self.settled = true;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::SessionTerminated(format!(
                "'{}' was abandoned before a response arrived",
                self.command
            ))),
            Err(_) => {
                self.shared.lock().ctx.pending().remove(self.seq);
                tracing::warn!(seq = self.seq, command = %self.command, "Request timed out");
                Err(Error::RequestTimeout {
                    command: self.command.clone(),
                    seq: self.seq,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl<C: ConnectionState> Drop for ResponseHandle<C> {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.lock().ctx.pending().remove(self.seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dap::codec::{read_message, write_message};
    use crate::dap::types::{EventMessage, ResponseMessage};
    use serde_json::json;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    #[derive(Default)]
    struct TestState {
        pending: PendingTable,
        closed: Option<String>,
        events: Vec<String>,
    }

    impl ConnectionState for TestState {
        type Snapshot = (bool, usize);

        fn pending(&mut self) -> &mut PendingTable {
            &mut self.pending
        }

        fn closed_reason(&self) -> Option<String> {
            self.closed.clone()
        }

        fn connection_lost(&mut self, reason: &str) {
            self.closed = Some(reason.to_string());
            self.pending.fail_all(reason);
        }

        fn snapshot(&self) -> Self::Snapshot {
            (self.closed.is_some(), self.events.len())
        }
    }

    struct FakeAdapter {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeAdapter {
        async fn next_request(&mut self) -> RequestMessage {
            match read_message(&mut self.reader).await.unwrap() {
                Some(ProtocolMessage::Request(r)) => r,
                other => panic!("expected request, got {:?}", other),
            }
        }

        async fn respond(&mut self, request_seq: i64, command: &str, body: Value) {
            let msg = ProtocolMessage::Response(ResponseMessage {
                seq: 1000 + request_seq,
                request_seq,
                success: true,
                command: command.to_string(),
                message: None,
                body: Some(body),
            });
            write_message(&mut self.writer, &msg).await.unwrap();
        }

        async fn event(&mut self, event: &str) {
            let msg = ProtocolMessage::Event(EventMessage {
                seq: 0,
                event: event.to_string(),
                body: None,
            });
            write_message(&mut self.writer, &msg).await.unwrap();
        }
    }

    fn connect() -> (DapClient<TestState>, FakeAdapter) {
        let (client_io, adapter_io) = tokio::io::duplex(64 * 1024);
        let (client_r, client_w) = tokio::io::split(client_io);
        let (adapter_r, adapter_w) = tokio::io::split(adapter_io);

        let mut dispatcher = EventDispatcher::new();
        dispatcher.subscribe("initialized", |state: &mut TestState, e: &Event| {
            state.events.push(e.name().to_string());
            Flow::Continue
        });

        let client = DapClient::from_transport(client_r, client_w, TestState::default(), dispatcher);
        let adapter = FakeAdapter {
            reader: BufReader::new(adapter_r),
            writer: adapter_w,
        };
        (client, adapter)
    }

    #[tokio::test]
    async fn test_concurrent_requests_complete_out_of_order() {
        let (client, mut adapter) = connect();
        let first = client.submit("evaluate", Some(json!({"expression": "a"}))).await.unwrap();
        let second = client.submit("evaluate", Some(json!({"expression": "b"}))).await.unwrap();
        assert_ne!(first.seq(), second.seq());

        let r1 = adapter.next_request().await;
        let r2 = adapter.next_request().await;
        assert_eq!((r1.seq, r2.seq), (first.seq(), second.seq()));

        adapter.respond(r2.seq, "evaluate", json!({"result": "b"})).await;
        adapter.respond(r1.seq, "evaluate", json!({"result": "a"})).await;

        let timeout = Duration::from_secs(5);
        assert_eq!(second.wait(timeout).await.unwrap(), Some(json!({"result": "b"})));
        assert_eq!(first.wait(timeout).await.unwrap(), Some(json!({"result": "a"})));
    }

    #[tokio::test]
    async fn test_unmatched_response_does_not_break_connection() {
        let (client, mut adapter) = connect();
        adapter.respond(77, "threads", json!({})).await;

        let handle = client.submit("threads", None).await.unwrap();
        let request = adapter.next_request().await;
        adapter.respond(request.seq, "threads", json!({"threads": []})).await;
        assert!(handle.wait(Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_removes_entry_and_late_response_is_dropped() {
        let (client, mut adapter) = connect();
        let handle = client.submit("stackTrace", None).await.unwrap();
        let request = adapter.next_request().await;

        let err = handle.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { seq, .. } if seq == request.seq));
        assert_eq!(client.with_state(|s| s.pending.len()), 0);

        adapter.respond(request.seq, "stackTrace", json!({})).await;
        let next = client.submit("threads", None).await.unwrap();
        let request = adapter.next_request().await;
        adapter.respond(request.seq, "threads", json!({"threads": []})).await;
        assert!(next.wait(Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_handle_forgets_request() {
        let (client, mut adapter) = connect();
        let handle = client.submit("threads", None).await.unwrap();
        adapter.next_request().await;
        assert_eq!(client.with_state(|s| s.pending.len()), 1);
        drop(handle);
        assert_eq!(client.with_state(|s| s.pending.len()), 0);
    }

    #[tokio::test]
    async fn test_events_reach_handlers_and_snapshot() {
        let (client, mut adapter) = connect();
        let mut watch = client.watch();
        adapter.event("initialized").await;
        adapter.event("module").await;

        tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|(_, n)| *n == 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.with_state(|s| s.events.clone()), vec!["initialized".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_end_fails_pending_and_refuses_new_requests() {
        let (client, mut adapter) = connect();
        let handle = client.submit("evaluate", None).await.unwrap();
        adapter.next_request().await;
        drop(adapter);

        let err = handle.wait(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::SessionTerminated(_)));
        assert!(matches!(
            client.submit("threads", None).await,
            Err(Error::SessionTerminated(_))
        ));
    }

    #[tokio::test]
    async fn test_teardown_request_passes_closed_state() {
        let (client, mut adapter) = connect();
        client.with_state(|s| s.closed = Some("terminated".to_string()));
        assert!(client.submit("threads", None).await.is_err());

        let handle = client.submit_teardown("disconnect", None).await.unwrap();
        let request = adapter.next_request().await;
        assert_eq!(request.command, "disconnect");
        adapter.respond(request.seq, "disconnect", json!({})).await;
        assert!(handle.wait(Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_teardown_request_refused_after_stream_end() {
        let (client, adapter) = connect();
        let mut watch = client.watch();
        drop(adapter);
        tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|(closed, _)| *closed))
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            client.submit_teardown("disconnect", None).await,
            Err(Error::SessionTerminated(_))
        ));
    }

    #[tokio::test]
    async fn test_framing_error_closes_connection() {
        let (client, mut adapter) = connect();
        let handle = client.submit("threads", None).await.unwrap();
        adapter.next_request().await;

        use tokio::io::AsyncWriteExt;
        adapter.writer.write_all(b"Content-Length: 3\r\n\r\n{{{").await.unwrap();

        let err = handle.wait(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::SessionTerminated(_)));
        assert!(client.with_state(|s| s.closed.is_some()));
    }
}
