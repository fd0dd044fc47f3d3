//! Client builder, request multiplexing and the listener loop.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring and connecting
//! a client. The [`Client`] manages the lifecycle:
//! 1. Dial the agent and split the socket
//! 2. Spawn the listener task on the read half
//! 3. Handshake (and authenticate, if configured)
//! 4. Multiplex calls and subscriptions until closed
//!
//! Every request gets a fresh seq. Its handler is registered before the
//! request is written; the listener routes each response header to the
//! handler registered for that seq. Callers wait on a private completion
//! channel raced against the client-wide shutdown signal.
//!
//! # Example
//!
//! ```ignore
//! use serf_rpc::{Client, LogLevel};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .auth_key("s3cr3t")
//!         .connect("127.0.0.1:7373")
//!         .await?;
//!
//!     for member in client.members().await? {
//!         println!("{} {:?} {}", member.name, member.ip(), member.status);
//!     }
//!
//!     let (tx, mut rx) = mpsc::channel(64);
//!     let handle = client.monitor(LogLevel::Debug, tx).await?;
//!     while let Some(line) = rx.recv().await {
//!         println!("{}", line);
//!     }
//!     client.stop(handle).await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::ToSocketAddrs;
use tokio::sync::{mpsc, watch};

use crate::codec::MsgPackCodec;
use crate::error::{ClientError, Result};
use crate::handler::{
    CallHandler, DispatchTable, Handler, Outcome, RecordSink, StreamHandler, TypedSink,
};
use crate::protocol::{
    commands, AuthRequest, EventRecord, EventRequest, ForceLeaveRequest, HandshakeRequest,
    JoinRequest, JoinResponse, LogLevel, LogRecord, Member, MembersFilteredRequest,
    MembersResponse, MonitorRequest, RecordDecoder, RequestHeader, RespondRequest,
    ResponseHeader, Stats, StopRequest, StreamRequest, TagsRequest, DEFAULT_MAX_RECORD_SIZE,
    DEFAULT_READ_BUFFER_CAPACITY, MAX_IPC_VERSION,
};
use crate::transport::dial;
use crate::writer::{FrameWriter, OutboundFrame};

/// Opaque handle to an active `monitor` or `stream` subscription.
///
/// Pass it to [`Client::stop`] to end the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(u64);

impl StreamHandle {
    /// The subscription's sequence number.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.0
    }
}

/// Builder for configuring and connecting a client.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    auth_key: Option<String>,
    max_record_size: usize,
    read_buffer_capacity: usize,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            auth_key: None,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            read_buffer_capacity: DEFAULT_READ_BUFFER_CAPACITY,
        }
    }

    /// Authenticate with this key right after the handshake.
    ///
    /// Needed when the agent was started with an RPC auth key.
    pub fn auth_key(mut self, key: impl Into<String>) -> Self {
        self.auth_key = Some(key.into());
        self
    }

    /// Set the largest response record accepted from the agent.
    ///
    /// A larger record is treated as a corrupt stream and closes the client.
    /// Default: 64MB
    pub fn max_record_size(mut self, bytes: usize) -> Self {
        self.max_record_size = bytes;
        self
    }

    /// Set the socket read buffer capacity.
    ///
    /// Default: 64KB
    pub fn read_buffer_capacity(mut self, bytes: usize) -> Self {
        self.read_buffer_capacity = bytes;
        self
    }

    /// Dial the agent's RPC address and handshake.
    ///
    /// On any failure the socket is closed and no client is returned.
    pub async fn connect<A: ToSocketAddrs>(self, addr: A) -> Result<Client> {
        let stream = dial(addr).await?;
        let (reader, writer) = stream.into_split();
        Client::start(self, reader, writer).await
    }

    /// Handshake over an already-connected stream.
    pub async fn connect_stream<S>(self, stream: S) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Client::start(self, reader, writer).await
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between the client and its listener task.
struct Inner {
    /// Last sequence number handed out.
    seq: AtomicU64,
    writer: FrameWriter,
    dispatch: DispatchTable,
    /// Guards the shutdown transition.
    closed: Mutex<bool>,
    shutdown_tx: watch::Sender<bool>,
    /// Records dropped because a subscriber's channel was full.
    dropped: Arc<AtomicU64>,
}

impl Inner {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Remove the handler for `seq` and clean it up. Idempotent.
    fn deregister(&self, seq: u64) {
        if let Some(handler) = self.dispatch.remove(seq) {
            handler.cleanup();
        }
    }

    /// Stop new traffic, wake every waiting caller and clean up every handler.
    ///
    /// Returns `false` if shutdown had already happened. Closing the write half
    /// is async and done by the caller.
    fn shutdown(&self) -> bool {
        let mut closed = self.closed.lock();
        if *closed {
            return false;
        }
        *closed = true;
        self.shutdown_tx.send_replace(true);

        let handlers = self.dispatch.remove_all();
        tracing::debug!(pending = handlers.len(), "shutting down client");
        for handler in handlers {
            handler.cleanup();
        }
        true
    }
}

/// A handler's slot in the dispatch table.
///
/// Dropping it deregisters the handler, including when the caller's future
/// is dropped mid-await. [`Registration::keep`] leaves the handler in place.
struct Registration<'a> {
    inner: &'a Inner,
    seq: u64,
    armed: bool,
}

impl<'a> Registration<'a> {
    fn new(inner: &'a Inner, seq: u64, handler: Handler) -> Self {
        inner.dispatch.register(seq, handler);
        Self {
            inner,
            seq,
            armed: true,
        }
    }

    /// Leave the handler registered past this scope.
    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.deregister(self.seq);
        }
    }
}

/// Resolves once the shutdown signal has fired.
async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    // A dropped sender means the client is gone, which is also closed.
    let _ = rx.wait_for(|closed| *closed).await;
}

/// A connected agent RPC client.
///
/// Methods take `&self`; share one client between tasks with an `Arc`.
/// Dropping the client shuts it down.
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect with default settings.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        ClientBuilder::new().connect(addr).await
    }

    async fn start<R, W>(config: ClientBuilder, reader: R, writer: W) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            seq: AtomicU64::new(0),
            writer: FrameWriter::new(writer),
            dispatch: DispatchTable::new(),
            closed: Mutex::new(false),
            shutdown_tx,
            dropped: Arc::new(AtomicU64::new(0)),
        });

        let decoder = RecordDecoder::with_limits(
            reader,
            config.read_buffer_capacity,
            config.max_record_size,
        );
        tokio::spawn(listen(inner.clone(), decoder));

        let client = Client { inner };

        if let Err(e) = client.handshake().await {
            tracing::debug!("handshake failed: {}", e);
            let _ = client.close().await;
            return Err(e);
        }

        if let Some(key) = &config.auth_key {
            if let Err(e) = client.auth(key).await {
                tracing::debug!("authentication failed: {}", e);
                let _ = client.close().await;
                return Err(e);
            }
        }

        Ok(client)
    }

    /// Close the connection. Idempotent.
    ///
    /// Every in-flight call fails with [`ClientError::ClientClosed`] and every
    /// subscription channel is closed.
    pub async fn close(&self) -> Result<()> {
        self.inner.shutdown();
        self.inner.writer.close().await
    }

    /// Whether the client has been shut down.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Total stream records dropped because a subscriber's channel was full.
    pub fn dropped_records(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Number of registered handlers (pending calls plus live subscriptions).
    pub fn in_flight(&self) -> usize {
        self.inner.dispatch.len()
    }

    /// Ask the agent to force a failed node into the left state.
    pub async fn force_leave(&self, node: &str) -> Result<()> {
        let frame = self.frame(commands::FORCE_LEAVE)?.with_body(&ForceLeaveRequest { node })?;
        self.call(frame, false).await.map(drop)
    }

    /// Ask the agent to join the given addresses.
    ///
    /// Returns the number of nodes successfully contacted.
    pub async fn join<S: AsRef<str>>(&self, addrs: &[S], replay: bool) -> Result<usize> {
        let req = JoinRequest {
            existing: addrs.iter().map(AsRef::as_ref).collect(),
            replay,
        };
        let frame = self.frame(commands::JOIN)?.with_body(&req)?;
        let resp: JoinResponse = self.call_decode(frame).await?;
        Ok(usize::try_from(resp.num).unwrap_or(0))
    }

    /// List every member the agent knows about.
    pub async fn members(&self) -> Result<Vec<Member>> {
        let frame = self.frame(commands::MEMBERS)?;
        let resp: MembersResponse = self.call_decode(frame).await?;
        Ok(resp.members)
    }

    /// List members whose tags and status match the given filters.
    ///
    /// Tag values and the status are regular expressions evaluated by the
    /// agent; an empty status matches any.
    pub async fn members_filtered(
        &self,
        tags: &HashMap<String, String>,
        status: &str,
    ) -> Result<Vec<Member>> {
        let frame = self
            .frame(commands::MEMBERS_FILTERED)?
            .with_body(&MembersFilteredRequest { tags, status })?;
        let resp: MembersResponse = self.call_decode(frame).await?;
        Ok(resp.members)
    }

    /// Fire a custom user event into the cluster.
    pub async fn user_event(&self, name: &str, payload: &[u8], coalesce: bool) -> Result<()> {
        let frame = self.frame(commands::EVENT)?.with_body(&EventRequest {
            name,
            payload,
            coalesce,
        })?;
        self.call(frame, false).await.map(drop)
    }

    /// Gracefully leave the cluster and shut the agent down.
    pub async fn leave(&self) -> Result<()> {
        let frame = self.frame(commands::LEAVE)?;
        self.call(frame, false).await.map(drop)
    }

    /// Set and delete tags on the agent's local member.
    pub async fn update_tags(
        &self,
        tags: &HashMap<String, String>,
        delete_tags: &[String],
    ) -> Result<()> {
        let frame = self
            .frame(commands::TAGS)?
            .with_body(&TagsRequest { tags, delete_tags })?;
        self.call(frame, false).await.map(drop)
    }

    /// Fetch the agent's runtime statistics.
    pub async fn stats(&self) -> Result<Stats> {
        let frame = self.frame(commands::STATS)?;
        self.call_decode(frame).await
    }

    /// Answer a query received on an event stream.
    ///
    /// `id` is the query's [`EventRecord::id`].
    pub async fn respond(&self, id: u64, payload: &[u8]) -> Result<()> {
        let frame = self
            .frame(commands::RESPOND)?
            .with_body(&RespondRequest { id, payload })?;
        self.call(frame, false).await.map(drop)
    }

    /// Subscribe to the agent's log output at `level` and above.
    ///
    /// Lines are pushed into `tx` without waiting; if the channel is full the
    /// line is dropped. The channel closes when the subscription ends.
    pub async fn monitor(&self, level: LogLevel, tx: mpsc::Sender<String>) -> Result<StreamHandle> {
        let sink = TypedSink::new(tx, |record: LogRecord| record.log);
        let req = MonitorRequest {
            log_level: level.as_str(),
        };
        self.subscribe(commands::MONITOR, &req, Box::new(sink)).await
    }

    /// Subscribe to cluster events matching `filter`
    /// (for example `"member-join,user:deploy"`, or `"*"`).
    ///
    /// Records are decoded as `T`; [`EventRecord`] covers every event kind.
    /// Delivery follows the same drop-when-full policy as [`Client::monitor`].
    pub async fn stream<T>(&self, filter: &str, tx: mpsc::Sender<T>) -> Result<StreamHandle>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let sink = TypedSink::passthrough(tx);
        let req = StreamRequest { event_type: filter };
        self.subscribe(commands::STREAM, &req, Box::new(sink)).await
    }

    /// Subscribe to cluster events as [`EventRecord`]s.
    pub async fn stream_events(
        &self,
        filter: &str,
        tx: mpsc::Sender<EventRecord>,
    ) -> Result<StreamHandle> {
        self.stream(filter, tx).await
    }

    /// End a subscription.
    ///
    /// Local delivery stops before the agent is told, so nothing reaches the
    /// channel after this returns, and the channel is closed.
    pub async fn stop(&self, handle: StreamHandle) -> Result<()> {
        self.inner.deregister(handle.seq());

        let frame = self
            .frame(commands::STOP)?
            .with_body(&StopRequest { stop: handle.seq() })?;
        self.call(frame, false).await.map(drop)
    }

    async fn handshake(&self) -> Result<()> {
        let frame = self.frame(commands::HANDSHAKE)?.with_body(&HandshakeRequest {
            version: MAX_IPC_VERSION,
        })?;
        self.call(frame, false).await.map(drop)
    }

    async fn auth(&self, auth_key: &str) -> Result<()> {
        let frame = self
            .frame(commands::AUTH)?
            .with_body(&AuthRequest { auth_key })?;
        self.call(frame, false).await.map(drop)
    }

    /// Start a request frame with a fresh seq.
    fn frame(&self, command: &str) -> Result<OutboundFrame> {
        OutboundFrame::new(&RequestHeader::new(command, self.inner.next_seq()))
    }

    /// Write a frame, giving up if the client shuts down mid-write.
    async fn send(&self, frame: &OutboundFrame) -> Result<()> {
        let mut shutdown = self.inner.shutdown_rx();
        let inner = &self.inner;
        tokio::select! {
            res = inner.writer.send(frame, || inner.is_closed()) => res,
            _ = wait_closed(&mut shutdown) => Err(ClientError::ClientClosed),
        }
    }

    /// One-shot request/response. Returns the raw body if `expects_body`.
    async fn call(&self, frame: OutboundFrame, expects_body: bool) -> Result<Option<Bytes>> {
        let (handler, rx) = CallHandler::new(expects_body);
        let _registration = Registration::new(&self.inner, frame.seq(), Handler::call(handler));

        self.send(&frame).await?;

        let mut shutdown = self.inner.shutdown_rx();
        tokio::select! {
            res = rx => res.unwrap_or(Err(ClientError::ClientClosed)),
            _ = wait_closed(&mut shutdown) => Err(ClientError::ClientClosed),
        }
    }

    /// One-shot request whose response body decodes as `T`.
    async fn call_decode<T: DeserializeOwned>(&self, frame: OutboundFrame) -> Result<T> {
        let body = self
            .call(frame, true)
            .await?
            .ok_or_else(|| ClientError::Protocol("missing response body".to_string()))?;
        MsgPackCodec::decode(&body)
    }

    async fn subscribe<B: Serialize>(
        &self,
        command: &'static str,
        body: &B,
        sink: Box<dyn RecordSink>,
    ) -> Result<StreamHandle> {
        let frame = self.frame(command)?.with_body(body)?;
        let seq = frame.seq();

        let (handler, init) =
            StreamHandler::new(seq, command, sink, self.inner.dropped.clone());
        let registration = Registration::new(&self.inner, seq, Handler::stream(handler));

        self.send(&frame).await?;

        let mut shutdown = self.inner.shutdown_rx();
        let result = tokio::select! {
            res = init => res.unwrap_or(Err(ClientError::StreamClosed)),
            _ = wait_closed(&mut shutdown) => Err(ClientError::ClientClosed),
        };
        result?;

        registration.keep();
        tracing::debug!(seq, command, "subscription established");
        Ok(StreamHandle(seq))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // The listener sees the signal, exits and releases the socket.
        self.inner.shutdown();
    }
}

/// Listener loop: read response headers and route them until the stream
/// fails or the client shuts down.
async fn listen<R>(inner: Arc<Inner>, mut decoder: RecordDecoder<R>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut shutdown = inner.shutdown_rx();
    loop {
        tokio::select! {
            _ = wait_closed(&mut shutdown) => break,
            res = route_one(&inner, &mut decoder) => {
                if let Err(e) = res {
                    if !inner.is_closed() {
                        tracing::error!("listener stopped reading responses: {}", e);
                    }
                    break;
                }
            }
        }
    }

    inner.shutdown();
    if let Err(e) = inner.writer.close().await {
        tracing::debug!("error closing connection: {}", e);
    }
    tracing::debug!("listener stopped");
}

/// Read one response header and hand it to its handler.
async fn route_one<R>(inner: &Inner, decoder: &mut RecordDecoder<R>) -> Result<()>
where
    R: AsyncRead + Send + Unpin,
{
    let header: ResponseHeader = decoder.next().await?;

    let Some(handler) = inner.dispatch.lookup(header.seq) else {
        tracing::trace!(seq = header.seq, "discarding response with no handler");
        return Ok(());
    };

    match handler.handle(&header, decoder).await? {
        Outcome::Continue => {}
        Outcome::Complete | Outcome::Undeliverable => inner.deregister(header.seq),
    }
    Ok(())
}
