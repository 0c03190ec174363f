//! Reference client for the menu protocol.
//!
//! Connects over TCP, authenticates, then receives menu lifecycle frames and
//! answers them. Inbound bytes go through the same [`ByteQueue`] the server
//! uses; a background task decodes whole frames so that [`MenuClient::recv`]
//! is cancel safe.

use crate::codec::{self, CodecError, Response, ServerMessage};
use crate::connection::pump_inbound;
use crate::menu::Menu;
use crate::reader::{ByteQueue, QueueError};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(CodecError),

    /// The server closed the connection
    #[error("connection closed")]
    Closed,
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Queue(QueueError::Closed) => ClientError::Closed,
            other => ClientError::Codec(other),
        }
    }
}

type Inbound = Result<ServerMessage, CodecError>;

/// TCP client for a [`MenuServer`](crate::MenuServer)
pub struct MenuClient {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
    local_addr: SocketAddr,
    current: Option<Menu>,
}

impl MenuClient {
    /// Connect to a server
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        let (read_half, writer) = stream.into_split();

        let (tx, inbound) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_messages(read_half, tx));

        Ok(Self {
            inbound,
            writer,
            reader,
            local_addr,
            current: None,
        })
    }

    /// Connect and send the password frame
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or the write fails.
    pub async fn connect_with_password<A: ToSocketAddrs>(
        addr: A,
        password: &str,
    ) -> Result<Self, ClientError> {
        let mut client = Self::connect(addr).await?;
        client.authenticate(password).await?;
        Ok(client)
    }

    /// Send the password frame.
    ///
    /// The server answers a wrong password with a `Disconnect`; a correct one
    /// gets no reply unless a menu is active.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn authenticate(&mut self, password: &str) -> Result<(), ClientError> {
        let frame = codec::encode_password(password)?;
        self.send_raw(&frame).await
    }

    /// Wait for the next server message, tracking the open menu.
    ///
    /// Cancel safe: dropping the future never loses part of a frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] once the server has gone away.
    pub async fn recv(&mut self) -> Result<ServerMessage, ClientError> {
        let msg = match self.inbound.recv().await {
            Some(inbound) => inbound?,
            None => return Err(ClientError::Closed),
        };
        debug!(msg = msg.message_type(), "received");

        match &msg {
            ServerMessage::MenuOpen(menu) => self.current = Some(menu.clone()),
            ServerMessage::MenuClose | ServerMessage::Disconnect { .. } => self.current = None,
        }
        Ok(msg)
    }

    /// Answer the open menu
    ///
    /// # Errors
    ///
    /// Returns an error if the response cannot be encoded or written.
    pub async fn respond(&mut self, response: &Response) -> Result<(), ClientError> {
        let frame = response.encode()?;
        self.current = None;
        self.send_raw(&frame).await
    }

    /// Write raw bytes to the server
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    /// Menu currently awaiting this client's answer
    pub fn current_menu(&self) -> Option<&Menu> {
        self.current.as_ref()
    }

    /// Local socket address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

impl Drop for MenuClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Pump the socket into a queue and forward every decoded frame.
///
/// Stops after the first decode failure, which is forwarded as well.
async fn read_messages(read_half: OwnedReadHalf, tx: mpsc::UnboundedSender<Inbound>) {
    let queue = ByteQueue::new();
    let pump = pump_inbound(read_half, &queue);
    tokio::pin!(pump);
    let decode = async {
        loop {
            let msg = ServerMessage::read_from(&queue).await;
            let failed = msg.is_err();
            if tx.send(msg).is_err() || failed {
                return;
            }
        }
    };
    tokio::pin!(decode);

    let mut pumping = true;
    loop {
        tokio::select! {
            () = &mut decode => break,
            () = &mut pump, if pumping => pumping = false,
        }
    }
}
