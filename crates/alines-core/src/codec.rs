//! Wire codec for the ALINES protocol.
//!
//! Every integer is a 2-byte big-endian `u16`. Text is a `u16` byte length
//! followed by that many bytes of UTF-8. Every frame except the password
//! starts with a one-byte packet type.
//!
//! ```text
//! Server -> client
//!   Disconnect  [0x00] [text reason]
//!   MenuOpen    [0x01] [flags] [u16 count] [u16 selected+1] [text title] [text entry]*count
//!   MenuClose   [0x02]
//!
//! Client -> server
//!   Password    [text]                         (first frame only, no type byte)
//!   None        [0x00]
//!   Single      [0x01] [u16 index]
//!   Multiple    [0x02] [u16 count] [u16 index]*count
//!   Custom      [0x03] [text]
//! ```
//!
//! Decoding reads field by field from a [`ByteQueue`], so a frame may arrive
//! split across any number of transport chunks.

use crate::menu::{Menu, MenuOptions};
use crate::reader::{ByteQueue, QueueError};
use thiserror::Error;

/// Largest length or count a `u16` field can carry
pub const MAX_TEXT_LEN: usize = u16::MAX as usize;

/// Largest list a `u16` count can describe
pub const MAX_ITEMS: usize = u16::MAX as usize;

/// `MenuOpen` flag: client may pick several entries
pub const FLAG_ALLOW_MULTI: u8 = 0b0000_0001;

/// `MenuOpen` flag: client may type a custom entry
pub const FLAG_ALLOW_CUSTOM: u8 = 0b0000_0010;

/// Codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Text does not fit a `u16` length prefix
    #[error("text too long: {0} bytes (max 65535)")]
    TextTooLong(usize),

    /// List does not fit a `u16` count
    #[error("too many items: {0} (max 65535)")]
    TooManyItems(usize),

    /// Text field is not valid UTF-8
    #[error("invalid UTF-8 text")]
    InvalidUtf8,

    /// Unknown leading packet byte
    #[error("unsupported packet {0}")]
    UnsupportedPacket(u8),

    /// The underlying byte stream failed
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Server-to-client packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerPacket {
    /// Reason for an imminent close
    Disconnect = 0x00,
    /// A menu is awaiting input
    MenuOpen = 0x01,
    /// The menu no longer awaits input
    MenuClose = 0x02,
}

impl TryFrom<u8> for ServerPacket {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Disconnect),
            0x01 => Ok(Self::MenuOpen),
            0x02 => Ok(Self::MenuClose),
            _ => Err(CodecError::UnsupportedPacket(value)),
        }
    }
}

/// Client-to-server response packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResponsePacket {
    /// Closed without a choice
    NoSelection = 0x00,
    /// One entry
    Single = 0x01,
    /// Several entries
    Multiple = 0x02,
    /// Free text
    Custom = 0x03,
}

impl TryFrom<u8> for ResponsePacket {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::NoSelection),
            0x01 => Ok(Self::Single),
            0x02 => Ok(Self::Multiple),
            0x03 => Ok(Self::Custom),
            _ => Err(CodecError::UnsupportedPacket(value)),
        }
    }
}

// ============================================================================
// Primitives
// ============================================================================

/// Append a big-endian `u16`
pub fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Append a `usize` as a `u16`, failing if it does not fit
fn put_count(buf: &mut Vec<u8>, count: usize) -> Result<(), CodecError> {
    let count = u16::try_from(count).map_err(|_| CodecError::TooManyItems(count))?;
    put_u16(buf, count);
    Ok(())
}

/// Append length-prefixed UTF-8 text
///
/// # Errors
///
/// Returns [`CodecError::TextTooLong`] if the text exceeds 65535 bytes.
pub fn put_text(buf: &mut Vec<u8>, text: &str) -> Result<(), CodecError> {
    let len = u16::try_from(text.len()).map_err(|_| CodecError::TextTooLong(text.len()))?;
    put_u16(buf, len);
    buf.extend_from_slice(text.as_bytes());
    Ok(())
}

/// Read one byte
///
/// # Errors
///
/// Fails if the stream closes first.
pub async fn read_u8(queue: &ByteQueue) -> Result<u8, CodecError> {
    let bytes = queue.get(1).await?;
    Ok(bytes[0])
}

/// Read a big-endian `u16`
///
/// # Errors
///
/// Fails if the stream closes first.
pub async fn read_u16(queue: &ByteQueue) -> Result<u16, CodecError> {
    let bytes = queue.get(2).await?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Read length-prefixed UTF-8 text
///
/// # Errors
///
/// Fails if the stream closes first or the bytes are not UTF-8.
pub async fn read_text(queue: &ByteQueue) -> Result<String, CodecError> {
    let len = read_u16(queue).await?;
    let bytes = queue.get(usize::from(len)).await?;
    String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
}

/// Encode the authentication frame
///
/// # Errors
///
/// Returns [`CodecError::TextTooLong`] for passwords over 65535 bytes.
pub fn encode_password(password: &str) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(2 + password.len());
    put_text(&mut buf, password)?;
    Ok(buf)
}

// ============================================================================
// Server -> client
// ============================================================================

/// Messages sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// The server is about to close the connection
    Disconnect {
        /// Human-readable reason
        reason: String,
    },
    /// A menu is open and awaiting a response
    MenuOpen(Menu),
    /// The menu no longer awaits this client's input
    MenuClose,
}

impl ServerMessage {
    /// Encode the message as one frame
    ///
    /// # Errors
    ///
    /// Returns an error if a text or list does not fit its `u16` prefix.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            ServerMessage::Disconnect { reason } => {
                let mut buf = vec![ServerPacket::Disconnect as u8];
                put_text(&mut buf, reason)?;
                Ok(buf)
            }
            ServerMessage::MenuOpen(menu) => encode_menu_open(menu),
            ServerMessage::MenuClose => Ok(vec![ServerPacket::MenuClose as u8]),
        }
    }

    /// Read one message from the stream
    ///
    /// # Errors
    ///
    /// Fails on unknown packet types, malformed text, or a closed stream.
    pub async fn read_from(queue: &ByteQueue) -> Result<Self, CodecError> {
        match ServerPacket::try_from(read_u8(queue).await?)? {
            ServerPacket::Disconnect => Ok(ServerMessage::Disconnect {
                reason: read_text(queue).await?,
            }),
            ServerPacket::MenuOpen => read_menu_open(queue).await.map(ServerMessage::MenuOpen),
            ServerPacket::MenuClose => Ok(ServerMessage::MenuClose),
        }
    }

    /// Get the message type name
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::Disconnect { .. } => "Disconnect",
            ServerMessage::MenuOpen(_) => "MenuOpen",
            ServerMessage::MenuClose => "MenuClose",
        }
    }
}

fn encode_menu_open(menu: &Menu) -> Result<Vec<u8>, CodecError> {
    let options = &menu.options;
    let mut flags = 0u8;
    if options.allow_multi {
        flags |= FLAG_ALLOW_MULTI;
    }
    if options.allow_custom {
        flags |= FLAG_ALLOW_CUSTOM;
    }

    let mut buf = vec![ServerPacket::MenuOpen as u8, flags];
    put_count(&mut buf, menu.entries.len())?;
    // Selected index travels as index + 1 so that 0 means "none"
    put_count(&mut buf, options.selected_index.map_or(0, |i| i.saturating_add(1)))?;
    put_text(&mut buf, &menu.title)?;
    for entry in &menu.entries {
        put_text(&mut buf, entry)?;
    }
    Ok(buf)
}

async fn read_menu_open(queue: &ByteQueue) -> Result<Menu, CodecError> {
    let flags = read_u8(queue).await?;
    let count = read_u16(queue).await?;
    let selected = read_u16(queue).await?;
    let title = read_text(queue).await?;

    let mut entries = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        entries.push(read_text(queue).await?);
    }

    Ok(Menu {
        title,
        entries,
        options: MenuOptions {
            allow_multi: flags & FLAG_ALLOW_MULTI != 0,
            allow_custom: flags & FLAG_ALLOW_CUSTOM != 0,
            selected_index: usize::from(selected).checked_sub(1),
        },
    })
}

// ============================================================================
// Client -> server
// ============================================================================

/// A client's answer to the active menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Closed without a choice
    NoSelection,
    /// One entry index
    Single(u16),
    /// Several entry indices, in order
    Multiple(Vec<u16>),
    /// Free text
    Custom(String),
}

impl Response {
    /// Packet type of this response
    pub fn packet(&self) -> ResponsePacket {
        match self {
            Response::NoSelection => ResponsePacket::NoSelection,
            Response::Single(_) => ResponsePacket::Single,
            Response::Multiple(_) => ResponsePacket::Multiple,
            Response::Custom(_) => ResponsePacket::Custom,
        }
    }

    /// Encode the response as one frame
    ///
    /// # Errors
    ///
    /// Returns an error if the text or index list does not fit its prefix.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = vec![self.packet() as u8];
        match self {
            Response::NoSelection => {}
            Response::Single(index) => put_u16(&mut buf, *index),
            Response::Multiple(indices) => {
                put_count(&mut buf, indices.len())?;
                for &index in indices {
                    put_u16(&mut buf, index);
                }
            }
            Response::Custom(text) => put_text(&mut buf, text)?,
        }
        Ok(buf)
    }

    /// Read the payload of a response whose type byte was already consumed
    ///
    /// # Errors
    ///
    /// Fails on malformed text or a closed stream.
    pub async fn read_body(packet: ResponsePacket, queue: &ByteQueue) -> Result<Self, CodecError> {
        match packet {
            ResponsePacket::NoSelection => Ok(Response::NoSelection),
            ResponsePacket::Single => Ok(Response::Single(read_u16(queue).await?)),
            ResponsePacket::Multiple => {
                let count = read_u16(queue).await?;
                let mut indices = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    indices.push(read_u16(queue).await?);
                }
                Ok(Response::Multiple(indices))
            }
            ResponsePacket::Custom => Ok(Response::Custom(read_text(queue).await?)),
        }
    }

    /// Read a complete response frame
    ///
    /// # Errors
    ///
    /// Fails on unknown packet types, malformed text, or a closed stream.
    pub async fn read_from(queue: &ByteQueue) -> Result<Self, CodecError> {
        let packet = ResponsePacket::try_from(read_u8(queue).await?)?;
        Self::read_body(packet, queue).await
    }
}
