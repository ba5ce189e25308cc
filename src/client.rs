//! Client builder and connection runtime.
//!
//! [`ClientBuilder`] collects configuration, named routes and an error hook;
//! `connect` then takes over a byte stream and starts three tasks:
//! 1. the writer task, which batches outbound packets
//! 2. the read loop, which frames inbound bytes and routes each packet
//! 3. the push dispatcher, which runs listener callbacks off the read path
//!
//! Responses go to the [`RequestCorrelator`], pushes to the
//! [`ListenerRegistry`]. When the stream ends or fails the connection is torn
//! down: pending requests fail with `Disconnected` and listeners are cleared.
//!
//! # Example
//!
//! ```ignore
//! use routewire::Client;
//!
//! #[tokio::main]
//! async fn main() -> routewire::Result<()> {
//!     let client = Client::builder()
//!         .route("test.echo", 7)
//!         .route("events.tick", 9)
//!         .connect_tcp("127.0.0.1:3010")
//!         .await?;
//!
//!     client.add_listener("events.tick", |n: u64| println!("tick {}", n))?;
//!
//!     let (status, reply) = client
//!         .request::<_, String>("test.echo", "hello")
//!         .await?;
//!     println!("{:?} {:?}", status, reply);
//!
//!     client.disconnect();
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::ToSocketAddrs;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::codec::EncodingType;
use crate::config::ClientConfig;
use crate::correlator::{PendingReply, RequestCorrelator};
use crate::error::{Result, RoutewireError};
use crate::listener::{ListenerHandle, ListenerRegistry, TypedListener};
use crate::protocol::{
    FrameBuffer, Header, IdGenerator, PackageType, Packet, RawPacket, Status, NO_ID,
};
use crate::route::{IntoRoute, RouteTable};
use crate::transport;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

/// Size of each read from the stream.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Callback for errors that close the connection.
pub type ErrorHook = Arc<dyn Fn(&RoutewireError) + Send + Sync>;

/// Whether a client can still send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Connected,
    Disconnected,
}

/// Builder for configuring and connecting a client.
pub struct ClientBuilder {
    config: ClientConfig,
    routes: RouteTable,
    encoding: EncodingType,
    on_error: Option<ErrorHook>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            routes: RouteTable::new(),
            encoding: EncodingType::MsgPack,
            on_error: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Default deadline for `request`.
    ///
    /// Default: 10 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Deadline for `connect_tcp` and `connect_unix`.
    ///
    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Largest correlation id before wrapping.
    ///
    /// Default: 65535
    pub fn id_modulus(mut self, modulus: u32) -> Self {
        self.config.id_modulus = modulus;
        self
    }

    /// Limit on requests in flight, capped at the id modulus.
    pub fn max_pending_requests(mut self, limit: usize) -> Self {
        self.config.max_pending_requests = Some(limit);
        self
    }

    /// Largest accepted inbound payload.
    ///
    /// Default: 16 MB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Outbound frames queued before senders wait.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_frames = limit;
        self
    }

    /// Writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// How long a sender waits for backpressure to clear.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.writer.backpressure_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Payload codec for outgoing requests and notifies.
    ///
    /// Default: MsgPack
    pub fn encoding(mut self, encoding: EncodingType) -> Self {
        self.encoding = encoding;
        self
    }

    /// Name a route id.
    pub fn route(mut self, name: &str, id: u32) -> Self {
        self.routes.insert(name, id);
        self
    }

    /// Replace the route table.
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Called once with the error that closed the connection.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RoutewireError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Open a TCP connection and start the client over it.
    ///
    /// A failed connect is also reported to the error hook.
    pub async fn connect_tcp<A: ToSocketAddrs>(self, addr: A) -> Result<Client> {
        match transport::connect_tcp(addr, self.config.connect_timeout()).await {
            Ok(stream) => Ok(self.connect(stream)),
            Err(e) => Err(self.connect_failed(e)),
        }
    }

    /// Open a Unix socket connection and start the client over it.
    #[cfg(unix)]
    pub async fn connect_unix<P: AsRef<std::path::Path>>(self, path: P) -> Result<Client> {
        match transport::connect_unix(path, self.config.connect_timeout()).await {
            Ok(stream) => Ok(self.connect(stream)),
            Err(e) => Err(self.connect_failed(e)),
        }
    }

    fn connect_failed(&self, err: RoutewireError) -> RoutewireError {
        tracing::error!(error = %err, "connect failed");
        if let Some(hook) = &self.on_error {
            hook(&err);
        }
        err
    }

    /// Start the client over an already connected stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<S>(self, stream: S) -> Client
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Client::start(self, stream)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between the client and its background tasks.
struct Connection {
    connected: AtomicBool,
    correlator: RequestCorrelator,
    listeners: ListenerRegistry,
    on_error: Option<ErrorHook>,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Connection {
    /// Keep the background tasks so teardown can stop them. Aborts them
    /// right away if the connection already closed while they started.
    fn adopt_tasks(&self, handles: Vec<AbortHandle>) {
        let mut tasks = self.tasks.lock();
        if self.connected.load(Ordering::Acquire) {
            tasks.extend(handles);
        } else {
            handles.iter().for_each(AbortHandle::abort);
        }
    }

    /// Mark the connection closed, fail pending requests, drop listeners
    /// and stop the background tasks.
    ///
    /// Returns `false` if it was already closed.
    fn teardown(&self) -> bool {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return false;
        }
        let drained = self.correlator.close();
        self.listeners.clear();
        // A task aborting itself keeps running until its next await.
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::debug!(drained, "connection torn down");
        true
    }

    /// Tear down after a fatal error and report it.
    fn fail(&self, err: RoutewireError) {
        if !self.teardown() {
            tracing::debug!(error = %err, "error after disconnect");
            return;
        }
        tracing::error!(error = %err, "connection closed by error");
        if let Some(hook) = &self.on_error {
            hook(&err);
        }
    }
}

/// A connected client.
///
/// Dropping the client disconnects it.
pub struct Client {
    conn: Arc<Connection>,
    writer: WriterHandle,
    ids: IdGenerator,
    routes: RouteTable,
    config: ClientConfig,
    encoding: EncodingType,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    fn start<S>(builder: ClientBuilder, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let ClientBuilder {
            config,
            routes,
            encoding,
            on_error,
        } = builder;

        let (reader, write_half) = tokio::io::split(stream);

        let conn = Arc::new(Connection {
            connected: AtomicBool::new(true),
            correlator: RequestCorrelator::new(config.max_pending_requests()),
            listeners: ListenerRegistry::new(),
            on_error,
            tasks: Mutex::new(Vec::new()),
        });

        let (writer, writer_task) = spawn_writer_task(write_half, config.writer_config());
        let writer_abort = writer_task.abort_handle();

        let writer_conn = conn.clone();
        let writer_monitor = tokio::spawn(async move {
            match writer_task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => writer_conn.fail(e),
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    tracing::error!(error = %e, "writer task panicked");
                    writer_conn.teardown();
                }
            }
        });

        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let push_task = tokio::spawn(Self::push_loop(push_rx, conn.clone()));

        let read_conn = conn.clone();
        let max_payload = config.max_payload_size;
        let read_task = tokio::spawn(async move {
            match Self::read_loop(reader, &read_conn, push_tx, max_payload).await {
                Ok(()) => {
                    tracing::debug!("stream closed by peer");
                    read_conn.teardown();
                }
                Err(e) => read_conn.fail(e),
            }
        });

        conn.adopt_tasks(vec![
            read_task.abort_handle(),
            push_task.abort_handle(),
            writer_monitor.abort_handle(),
            writer_abort,
        ]);

        Client {
            conn,
            writer,
            ids: IdGenerator::new(config.id_modulus()),
            routes,
            config,
            encoding,
        }
    }

    /// Frame inbound bytes and route each packet until EOF or a fatal error.
    async fn read_loop<R: AsyncRead + Unpin>(
        mut reader: R,
        conn: &Connection,
        push_tx: mpsc::UnboundedSender<RawPacket>,
        max_payload_size: u32,
    ) -> Result<()> {
        let mut frame_buffer = FrameBuffer::with_max_payload(max_payload_size);
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }

            for packet in frame_buffer.push(&buf[..n])? {
                Self::route_packet(packet, conn, &push_tx);
            }
            // Packets ahead of a bad frame are routed before failing.
            if let Some(err) = frame_buffer.take_error() {
                return Err(err);
            }
        }
    }

    fn route_packet(packet: RawPacket, conn: &Connection, push_tx: &mpsc::UnboundedSender<RawPacket>) {
        match packet.package_type() {
            PackageType::Response => {
                conn.correlator.on_packet_received(packet);
            }
            PackageType::Push => {
                if push_tx.send(packet).is_err() {
                    tracing::debug!("push dispatcher stopped, dropping push");
                }
            }
            other => {
                tracing::warn!(
                    route = packet.route(),
                    package_type = ?other,
                    "ignoring packet a client does not handle"
                );
            }
        }
    }

    /// Run listener callbacks in arrival order.
    async fn push_loop(mut rx: mpsc::UnboundedReceiver<RawPacket>, conn: Arc<Connection>) {
        while let Some(packet) = rx.recv().await {
            let fired = conn.listeners.dispatch(&packet);
            if fired == 0 {
                tracing::debug!(route = packet.route(), "push with no listeners");
            }
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.conn.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(RoutewireError::Disconnected)
        }
    }

    /// Register `packet` and hand it to the writer.
    async fn dispatch_request<T: Serialize>(&self, mut packet: Packet<T>) -> Result<PendingReply> {
        self.ensure_connected()?;
        let reply = self.conn.correlator.register(packet.id())?;
        let frame = OutboundFrame::from_packet(&mut packet)?;
        // On failure `reply` drops and releases the id.
        self.writer.send(frame).await?;
        Ok(reply)
    }

    /// Send a request and return a handle to its reply.
    ///
    /// The handle can be awaited with a deadline or cancelled.
    pub async fn send_request<Req>(&self, route: impl IntoRoute, payload: &Req) -> Result<PendingReply>
    where
        Req: Serialize + ?Sized,
    {
        let route = route.into_route(&self.routes)?;
        let packet = Packet::request(route, payload, self.encoding, &self.ids);
        self.dispatch_request(packet).await
    }

    /// Send a request and wait for its reply with the default timeout.
    ///
    /// Returns the response status and, for successful responses with a
    /// payload, the decoded reply. An `Error` status is not a failure of
    /// this call.
    pub async fn request<Req, Resp>(
        &self,
        route: impl IntoRoute,
        payload: &Req,
    ) -> Result<(Status, Option<Resp>)>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.request_with_timeout(route, payload, self.config.request_timeout())
            .await
    }

    /// Like [`request`](Self::request) with an explicit deadline.
    pub async fn request_with_timeout<Req, Resp>(
        &self,
        route: impl IntoRoute,
        payload: &Req,
        timeout: Duration,
    ) -> Result<(Status, Option<Resp>)>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let reply = self.send_request(route, payload).await?;
        let packet = reply.wait(timeout).await?;
        typed_reply(&packet)
    }

    /// Send raw bytes and get the raw reply payload.
    pub async fn request_raw(
        &self,
        route: impl IntoRoute,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<(Status, Bytes)> {
        let route = route.into_route(&self.routes)?;
        let header = Header::new(route, EncodingType::Raw, PackageType::Request, self.ids.next());
        let reply = self
            .dispatch_request(RawPacket::create_raw(header, payload))
            .await?;

        let packet = reply.wait(timeout).await?;
        let payload = packet.raw().cloned().unwrap_or_default();
        Ok((packet.header.status(), payload))
    }

    /// Send a one-way message. Never waits: fails with
    /// `BackpressureTimeout` if the outbound queue is full.
    pub fn notify<T>(&self, route: impl IntoRoute, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.ensure_connected()?;
        let route = route.into_route(&self.routes)?;
        let mut packet = Packet::notify(route, payload, self.encoding);
        self.writer.try_send(OutboundFrame::from_packet(&mut packet)?)
    }

    /// Send a one-way message with raw bytes.
    pub fn notify_raw(&self, route: impl IntoRoute, payload: Bytes) -> Result<()> {
        self.ensure_connected()?;
        let route = route.into_route(&self.routes)?;
        let header = Header::new(route, EncodingType::Raw, PackageType::Notify, NO_ID);
        let mut packet = RawPacket::create_raw(header, payload);
        self.writer.try_send(OutboundFrame::from_packet(&mut packet)?)
    }

    /// Call `callback` with every push on `route` until removed.
    ///
    /// Pushes whose payload does not decode as `T` are logged and skipped.
    pub fn add_listener<T, F>(&self, route: impl IntoRoute, callback: F) -> Result<ListenerHandle>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.ensure_connected()?;
        let route = route.into_route(&self.routes)?;
        Ok(self.conn.listeners.add_listener(route, TypedListener::new(callback)))
    }

    /// Call `callback` once, with the next push on `route` that decodes as `T`.
    pub fn add_listener_once<T, F>(
        &self,
        route: impl IntoRoute,
        callback: F,
    ) -> Result<ListenerHandle>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.ensure_connected()?;
        let route = route.into_route(&self.routes)?;
        Ok(self
            .conn
            .listeners
            .add_listener_once(route, TypedListener::new(callback)))
    }

    /// Listen for raw push packets on `route`.
    pub fn add_raw_listener<F>(&self, route: impl IntoRoute, callback: F) -> Result<ListenerHandle>
    where
        F: Fn(&RawPacket) + Send + Sync + 'static,
    {
        self.ensure_connected()?;
        let route = route.into_route(&self.routes)?;
        Ok(self.conn.listeners.add_listener(route, callback))
    }

    /// Remove a listener. Returns `Ok(false)` if it was not registered.
    pub fn remove_listener(&self, route: impl IntoRoute, handle: ListenerHandle) -> Result<bool> {
        let route = route.into_route(&self.routes)?;
        Ok(self.conn.listeners.remove_listener(route, handle))
    }

    pub fn status(&self) -> ClientStatus {
        if self.conn.connected.load(Ordering::Acquire) {
            ClientStatus::Connected
        } else {
            ClientStatus::Disconnected
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.status() == ClientStatus::Connected
    }

    /// Close the connection.
    ///
    /// Pending requests fail with `Disconnected`, listeners are cleared and
    /// the background tasks stop. Safe to call more than once.
    pub fn disconnect(&self) {
        self.conn.teardown();
    }

    /// Requests waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.conn.correlator.pending_count()
    }

    /// Outbound frames not yet written.
    pub fn pending_frames(&self) -> usize {
        self.writer.pending_count()
    }

    pub fn is_backpressure_active(&self) -> bool {
        self.writer.is_backpressure_active()
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Split a response into its status and decoded payload.
///
/// Error responses and empty payloads yield `None`.
pub fn typed_reply<Resp: DeserializeOwned>(packet: &RawPacket) -> Result<(Status, Option<Resp>)> {
    let status = packet.header.status();
    if !status.is_success() || packet.header.content_size == 0 {
        return Ok((status, None));
    }
    let data = packet.decode_typed()?;
    Ok((status, Some(data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusCode;

    #[test]
    fn test_builder_configuration() {
        let builder = Client::builder()
            .request_timeout(Duration::from_millis(250))
            .connect_timeout(Duration::from_secs(1))
            .id_modulus(255)
            .max_pending_requests(16)
            .max_payload_size(1024)
            .max_pending_frames(2048)
            .channel_capacity(512)
            .backpressure_timeout(Duration::from_secs(10))
            .encoding(EncodingType::Json);

        assert_eq!(builder.config.request_timeout(), Duration::from_millis(250));
        assert_eq!(builder.config.connect_timeout(), Duration::from_secs(1));
        assert_eq!(builder.config.id_modulus, 255);
        assert_eq!(builder.config.max_pending_requests(), 16);
        assert_eq!(builder.config.max_payload_size, 1024);
        assert_eq!(builder.config.writer.max_pending_frames, 2048);
        assert_eq!(builder.config.writer.channel_capacity, 512);
        assert_eq!(builder.config.writer.backpressure_timeout_ms, 10_000);
        assert_eq!(builder.encoding, EncodingType::Json);
    }

    #[test]
    fn test_builder_routes() {
        let builder = Client::builder().route("test.echo", 7).route("events.tick", 9);
        assert_eq!(builder.routes.resolve("test.echo").unwrap(), 7);
        assert_eq!(builder.routes.resolve("events.tick").unwrap(), 9);
    }

    fn reply_packet(status: Status, text: Option<&str>) -> RawPacket {
        let request = Header::new(1, EncodingType::MsgPack, PackageType::Request, 1);
        let mut reply = Packet::response(&request, status, text.map(str::to_string));
        let bytes = reply.encode().unwrap();
        FrameBuffer::new().push(&bytes).unwrap().remove(0)
    }

    #[test]
    fn test_typed_reply_success() {
        let (status, data) = typed_reply::<String>(&reply_packet(Status::success(), Some("hi"))).unwrap();
        assert_eq!(status.code, StatusCode::Success);
        assert_eq!(data.as_deref(), Some("hi"));
    }

    #[test]
    fn test_typed_reply_error_has_no_data() {
        let (status, data) =
            typed_reply::<String>(&reply_packet(Status::error("SYSTEM_ERR"), Some("ignored"))).unwrap();
        assert_eq!(status.message, "SYSTEM_ERR");
        assert!(data.is_none());
    }

    #[test]
    fn test_typed_reply_empty_payload() {
        let (status, data) = typed_reply::<String>(&reply_packet(Status::success(), None)).unwrap();
        assert!(status.is_success());
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn test_unknown_route_name() {
        let (stream, _server) = tokio::io::duplex(1024);
        let client = Client::builder().connect(stream);

        let err = client.notify("nope", &1u8).unwrap_err();
        assert!(matches!(err, RoutewireError::UnknownRoute(_)));
    }

    #[tokio::test]
    async fn test_peer_close_stops_writer_task() {
        let (stream, server) = tokio::io::duplex(1024);
        let client = Client::builder().connect(stream);
        drop(server);

        for _ in 0..200 {
            if client.writer.is_closed() {
                assert!(!client.is_connected());
                assert!(client.conn.tasks.lock().is_empty());
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("writer task still running after the peer closed");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (stream, _server) = tokio::io::duplex(1024);
        let client = Client::builder().connect(stream);
        assert_eq!(client.status(), ClientStatus::Connected);

        client.disconnect();
        client.disconnect();
        assert_eq!(client.status(), ClientStatus::Disconnected);
        assert!(matches!(
            client.notify(1u32, &1u8),
            Err(RoutewireError::Disconnected)
        ));
    }
}
