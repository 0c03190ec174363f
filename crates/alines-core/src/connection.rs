//! Per-connection protocol state machine.
//!
//! ```text
//!  Unauthenticated ──password ok──▶ Authenticated ──┐
//!        │                              │  ▲        │ response
//!        │ bad password                 │  └────────┘
//!        ▼                              ▼
//!   Disconnected ◀──── violation / transport error / shutdown
//! ```
//!
//! A connection is split into three parts:
//! - a [`ByteQueue`] fed by the socket's read half,
//! - a [`ConnectionHandle`] (send/close) whose frames a writer task flushes,
//! - a [`ConnectionHandler`] that reads frames from the queue and talks to the
//!   [`MenuCoordinator`].
//!
//! The handler never touches the socket directly, so it can be driven by any
//! transport that can push bytes and consume [`Outbound`] commands.

use crate::codec::{self, CodecError, Response, ResponsePacket, ServerMessage};
use crate::coordinator::MenuCoordinator;
use crate::error::DisconnectReason;
use crate::reader::ByteQueue;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Process-unique connection identifier
pub type ConnectionId = u64;

/// Socket read size
const READ_CHUNK_SIZE: usize = 4096;

/// Commands for a connection's writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write one encoded frame
    Frame(Arc<[u8]>),
    /// Flush and close the transport
    Close,
}

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the password frame
    Unauthenticated,
    /// Registered, reading responses
    Authenticated,
    /// Terminal
    Disconnected,
}

/// Send/close handle for one connection.
///
/// Sending never blocks: frames are queued for the connection's writer.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    tx: mpsc::UnboundedSender<Outbound>,
    queue: Arc<ByteQueue>,
}

impl ConnectionHandle {
    /// Create a handle over `queue`, returning the writer's command stream
    pub fn new(
        id: ConnectionId,
        peer: Option<SocketAddr>,
        queue: Arc<ByteQueue>,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id,
                peer,
                tx,
                queue,
            },
            rx,
        )
    }

    /// Connection identifier
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address, if known
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Inbound byte queue
    pub fn queue(&self) -> &Arc<ByteQueue> {
        &self.queue
    }

    /// Queue an already encoded frame
    pub fn send_frame(&self, frame: Arc<[u8]>) {
        // A gone writer means the transport is gone; the reader side notices
        let _ = self.tx.send(Outbound::Frame(frame));
    }

    /// Encode and queue a message
    pub fn send(&self, msg: &ServerMessage) {
        match msg.encode() {
            Ok(frame) => self.send_frame(frame.into()),
            Err(e) => warn!(conn = self.id, error = %e, "dropping unencodable {}", msg.message_type()),
        }
    }

    /// Send a `Disconnect` frame, then close the transport and the queue
    pub fn disconnect(&self, reason: &DisconnectReason) {
        self.send(&ServerMessage::Disconnect {
            reason: reason.to_string(),
        });
        self.drop_transport();
    }

    /// Close the transport and the queue without a reason frame
    pub fn drop_transport(&self) {
        let _ = self.tx.send(Outbound::Close);
        self.queue.close();
    }
}

/// Why a handler stopped
#[derive(Debug)]
enum Exit {
    /// Stream ended or failed; nothing can be sent
    Transport,
    /// Peer misbehaved; tell it why
    Violation(DisconnectReason),
}

impl From<CodecError> for Exit {
    fn from(err: CodecError) -> Self {
        match DisconnectReason::from_codec(&err) {
            Some(reason) => Exit::Violation(reason),
            None => Exit::Transport,
        }
    }
}

/// Drives one connection through authentication and its response loop
pub struct ConnectionHandler {
    handle: ConnectionHandle,
    coordinator: Arc<MenuCoordinator>,
    password: Option<Arc<str>>,
    state: ConnectionState,
}

impl ConnectionHandler {
    /// Create a handler. `None` password accepts any password frame.
    pub fn new(
        handle: ConnectionHandle,
        coordinator: Arc<MenuCoordinator>,
        password: Option<Arc<str>>,
    ) -> Self {
        Self {
            handle,
            coordinator,
            password,
            state: ConnectionState::Unauthenticated,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run until the connection ends, then release it.
    ///
    /// Server-initiated ends send a `Disconnect` frame before closing.
    pub async fn run(&mut self) {
        let exit = self.drive().await;
        let id = self.handle.id();
        let peer = self.handle.peer();

        self.coordinator.unregister(id).await;
        match exit {
            Exit::Violation(reason) => {
                warn!(conn = id, ?peer, %reason, "client forcefully disconnected");
                self.handle.disconnect(&reason);
            }
            Exit::Transport => {
                info!(conn = id, ?peer, "client disconnected");
                self.handle.drop_transport();
            }
        }
        self.state = ConnectionState::Disconnected;
    }

    async fn drive(&mut self) -> Exit {
        if let Err(exit) = self.authenticate().await {
            return exit;
        }
        loop {
            if let Err(exit) = self.handle_response().await {
                return exit;
            }
        }
    }

    async fn authenticate(&mut self) -> Result<(), Exit> {
        let supplied = codec::read_text(self.handle.queue()).await?;
        let accepted = self
            .password
            .as_deref()
            .is_none_or(|expected| expected == supplied);
        if !accepted {
            return Err(Exit::Violation(DisconnectReason::InvalidPassword));
        }

        self.coordinator.register(self.handle.clone()).await;
        self.state = ConnectionState::Authenticated;
        info!(conn = self.handle.id(), "client accepted");
        Ok(())
    }

    async fn handle_response(&mut self) -> Result<(), Exit> {
        let queue = self.handle.queue().clone();
        let packet = codec::read_u8(&queue).await?;

        // The response binds to whatever menu is active when it starts
        let Some((generation, menu)) = self.coordinator.active_menu().await else {
            return Err(Exit::Violation(DisconnectReason::NoActiveMenu));
        };

        let packet = ResponsePacket::try_from(packet)?;
        let response = Response::read_body(packet, &queue).await?;
        debug!(conn = self.handle.id(), generation, ?response, "response received");

        let selection = menu.resolve(&response).map_err(Exit::Violation)?;
        self.coordinator
            .resolve(self.handle.id(), generation, selection)
            .await
            .map_err(|reason| {
                debug!(
                    conn = self.handle.id(),
                    stale_generation = generation,
                    "menu closed or superseded mid-response"
                );
                Exit::Violation(reason)
            })
    }
}

/// Feed a socket's read half into `queue` until it ends.
///
/// End-of-stream finishes the queue; a read error closes it.
pub(crate) async fn pump_inbound<R>(mut reader: R, queue: &ByteQueue)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                queue.finish();
                return;
            }
            Ok(n) => queue.push(&buf[..n]),
            Err(e) => {
                debug!(error = %e, "read failed");
                queue.close();
                return;
            }
        }
    }
}

/// Flush queued frames to a socket's write half until told to close.
pub(crate) async fn write_outbound<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Outbound::Frame(frame) => {
                if let Err(e) = writer.write_all(&frame).await {
                    debug!(error = %e, "write failed");
                    return;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = writer.shutdown().await;
}

/// Serve one accepted TCP connection to completion.
///
/// The inbound pump and the handler run in the same task; the writer runs in
/// its own task so that it can flush a final `Disconnect` after the handler
/// is gone.
pub async fn serve_connection(
    stream: TcpStream,
    id: ConnectionId,
    coordinator: Arc<MenuCoordinator>,
    password: Option<Arc<str>>,
) {
    let peer = stream.peer_addr().ok();
    if let Err(e) = stream.set_nodelay(true) {
        debug!(conn = id, error = %e, "set_nodelay failed");
    }
    let (read_half, write_half) = stream.into_split();

    let queue = Arc::new(ByteQueue::new());
    let (handle, outbound) = ConnectionHandle::new(id, peer, queue.clone());
    tokio::spawn(write_outbound(write_half, outbound));

    let mut handler = ConnectionHandler::new(handle, coordinator, password);
    let pump = pump_inbound(read_half, &queue);
    tokio::pin!(pump);
    let run = handler.run();
    tokio::pin!(run);

    let mut pumping = true;
    loop {
        tokio::select! {
            () = &mut run => break,
            () = &mut pump, if pumping => pumping = false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_password;
    use crate::menu::{Menu, MenuEntry, MenuOptions, Selection};

    struct Harness {
        coordinator: Arc<MenuCoordinator>,
        queue: Arc<ByteQueue>,
        outbound: mpsc::UnboundedReceiver<Outbound>,
        task: tokio::task::JoinHandle<ConnectionState>,
    }

    fn spawn_handler(coordinator: Arc<MenuCoordinator>, id: ConnectionId, password: Option<&str>) -> Harness {
        let queue = Arc::new(ByteQueue::new());
        let (handle, outbound) = ConnectionHandle::new(id, None, queue.clone());
        let mut handler = ConnectionHandler::new(handle, coordinator.clone(), password.map(Arc::from));
        let task = tokio::spawn(async move {
            handler.run().await;
            handler.state()
        });
        Harness {
            coordinator,
            queue,
            outbound,
            task,
        }
    }

    async fn next_frame(outbound: &mut mpsc::UnboundedReceiver<Outbound>) -> Outbound {
        outbound.recv().await.expect("writer channel closed")
    }

    fn disconnect_frame(reason: &str) -> Outbound {
        let frame = ServerMessage::Disconnect {
            reason: reason.to_string(),
        }
        .encode()
        .unwrap();
        Outbound::Frame(frame.into())
    }

    async fn wait_for_connections(coordinator: &MenuCoordinator, count: usize) {
        while coordinator.connection_count().await != count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_wrong_password_disconnects() {
        let mut h = spawn_handler(Arc::new(MenuCoordinator::new()), 1, Some("pass"));
        h.queue.push(&encode_password("nope").unwrap());

        assert_eq!(next_frame(&mut h.outbound).await, disconnect_frame("invalid password"));
        assert_eq!(next_frame(&mut h.outbound).await, Outbound::Close);
        assert_eq!(h.task.await.unwrap(), ConnectionState::Disconnected);
        assert_eq!(h.coordinator.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_no_password_accepts_anything() {
        let mut h = spawn_handler(Arc::new(MenuCoordinator::new()), 1, None);
        h.queue.push(&encode_password("whatever").unwrap());
        wait_for_connections(&h.coordinator, 1).await;

        // No menu active, so nothing was sent
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_joiner_receives_menu() {
        let coordinator = Arc::new(MenuCoordinator::new());
        let menu = Menu::new("Pick", ["A", "B"]);
        let _response = coordinator.open_menu(menu.clone()).await.unwrap();

        let mut h = spawn_handler(coordinator, 1, Some("pass"));
        h.queue.push(&encode_password("pass").unwrap());

        let expected = ServerMessage::MenuOpen(menu).encode().unwrap();
        assert_eq!(next_frame(&mut h.outbound).await, Outbound::Frame(expected.into()));
    }

    #[tokio::test]
    async fn test_response_without_menu_disconnects() {
        let mut h = spawn_handler(Arc::new(MenuCoordinator::new()), 1, None);
        let mut bytes = encode_password("").unwrap();
        bytes.extend(Response::Single(0).encode().unwrap());
        h.queue.push(&bytes);

        assert_eq!(
            next_frame(&mut h.outbound).await,
            disconnect_frame("response despite no menu")
        );
        assert_eq!(h.task.await.unwrap(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unsupported_packet_disconnects_without_broadcast() {
        let coordinator = Arc::new(MenuCoordinator::new());
        let response = coordinator.open_menu(Menu::new("Pick", ["A"])).await.unwrap();

        let mut h = spawn_handler(coordinator.clone(), 1, None);
        h.queue.push(&encode_password("").unwrap());
        let _menu_open = next_frame(&mut h.outbound).await;

        h.queue.push(&[0x09]);
        assert_eq!(next_frame(&mut h.outbound).await, disconnect_frame("unsupported packet 9"));
        h.task.await.unwrap();

        // Menu is still open
        assert!(coordinator.active_menu().await.is_some());
        assert!(coordinator.close_menu().await);
        assert_eq!(response.await, Selection::NoSelection);
    }

    #[tokio::test]
    async fn test_single_selection_resolves_menu() {
        let coordinator = Arc::new(MenuCoordinator::new());
        let response = coordinator
            .open_menu(Menu::new("Pick", ["A", "B", "C"]))
            .await
            .unwrap();

        let mut h = spawn_handler(coordinator.clone(), 1, Some("pass"));
        h.queue.push(&encode_password("pass").unwrap());
        let _menu_open = next_frame(&mut h.outbound).await;

        // Split the response across two pushes
        let frame = Response::Single(1).encode().unwrap();
        h.queue.push(&frame[..2]);
        h.queue.push(&frame[2..]);

        assert_eq!(
            response.await,
            Selection::Single(MenuEntry {
                index: 1,
                text: "B".to_string()
            })
        );
        assert!(coordinator.active_menu().await.is_none());
    }

    #[tokio::test]
    async fn test_response_to_superseded_menu_disconnects() {
        let coordinator = Arc::new(MenuCoordinator::new());
        let first = coordinator.open_menu(Menu::new("1", ["A", "B"])).await.unwrap();

        let mut h = spawn_handler(coordinator.clone(), 1, None);
        h.queue.push(&encode_password("").unwrap());
        let _menu_open = next_frame(&mut h.outbound).await;

        // Packet type arrives, then the handler waits for the index
        h.queue.push(&[0x01]);
        while !h.queue.is_waiting() {
            tokio::task::yield_now().await;
        }

        let second_menu = Menu::new("2", ["X"]);
        let second = coordinator.open_menu(second_menu.clone()).await.unwrap();
        assert_eq!(first.await, Selection::NoSelection);
        h.queue.push(&[0x00, 0x01]);

        let menu_close = ServerMessage::MenuClose.encode().unwrap();
        let menu_open = ServerMessage::MenuOpen(second_menu).encode().unwrap();
        assert_eq!(next_frame(&mut h.outbound).await, Outbound::Frame(menu_close.into()));
        assert_eq!(next_frame(&mut h.outbound).await, Outbound::Frame(menu_open.into()));
        assert_eq!(
            next_frame(&mut h.outbound).await,
            disconnect_frame("response despite no menu")
        );
        h.task.await.unwrap();

        // The newer menu is untouched
        assert!(coordinator.close_menu().await);
        assert_eq!(second.await, Selection::NoSelection);
    }

    #[tokio::test]
    async fn test_out_of_range_index_disconnects() {
        let coordinator = Arc::new(MenuCoordinator::new());
        let _response = coordinator
            .open_menu(Menu::new("Pick", ["A"]).with_options(MenuOptions::new().with_multi()))
            .await
            .unwrap();

        let mut h = spawn_handler(coordinator, 1, None);
        h.queue.push(&encode_password("").unwrap());
        let _menu_open = next_frame(&mut h.outbound).await;

        h.queue.push(&Response::Multiple(vec![0, 4]).encode().unwrap());
        assert_eq!(
            next_frame(&mut h.outbound).await,
            disconnect_frame("entry index 4 out of range (1 entries)")
        );
    }

    #[tokio::test]
    async fn test_transport_close_unregisters_silently() {
        let mut h = spawn_handler(Arc::new(MenuCoordinator::new()), 1, None);
        h.queue.push(&encode_password("").unwrap());
        wait_for_connections(&h.coordinator, 1).await;

        h.queue.finish();
        assert_eq!(h.task.await.unwrap(), ConnectionState::Disconnected);
        assert_eq!(h.coordinator.connection_count().await, 0);
        assert_eq!(next_frame(&mut h.outbound).await, Outbound::Close);
    }

    #[tokio::test]
    async fn test_pump_finishes_queue_on_eof() {
        let queue = ByteQueue::new();
        pump_inbound(&b"\x00\x01"[..], &queue).await;

        assert!(queue.is_closed());
        assert_eq!(queue.get(2).await.unwrap(), vec![0x00, 0x01]);
    }

    #[tokio::test]
    async fn test_writer_flushes_until_close() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Outbound::Frame(Arc::from(&[1u8, 2][..]))).unwrap();
        tx.send(Outbound::Close).unwrap();
        tx.send(Outbound::Frame(Arc::from(&[3u8][..]))).unwrap();

        let mut written = Vec::new();
        write_outbound(&mut written, rx).await;
        assert_eq!(written, vec![1, 2]);
    }
}
