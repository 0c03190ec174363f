//! Error types for the ALINES protocol engine.

use crate::client::ClientError;
use crate::codec::CodecError;
use crate::menu::MenuError;
use crate::reader::QueueError;
use crate::server::ServerError;
use thiserror::Error;

/// Core errors
#[derive(Debug, Error)]
pub enum Error {
    /// Byte queue error
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Wire codec error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Menu rejected before opening
    #[error("menu error: {0}")]
    Menu(#[from] MenuError),

    /// Server lifecycle error
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// Client error
    #[error("client error: {0}")]
    Client(#[from] ClientError),
}

/// Why the server closes a connection.
///
/// The `Display` text is the exact reason carried by the `Disconnect` frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Password frame did not match
    #[error("invalid password")]
    InvalidPassword,

    /// Response arrived while no menu was active, or after it was resolved
    #[error("response despite no menu")]
    NoActiveMenu,

    /// Unknown response packet type
    #[error("unsupported packet {0}")]
    UnsupportedPacket(u8),

    /// Response referenced an entry that does not exist
    #[error("entry index {index} out of range ({len} entries)")]
    IndexOutOfRange {
        /// Index sent by the client
        index: u16,
        /// Number of entries in the menu
        len: usize,
    },

    /// Multi selection sent for a single-selection menu.
    ///
    /// The frame itself is well formed; peers that ignore the menu flags and
    /// send one anyway are disconnected rather than having it accepted.
    #[error("multi selection not allowed")]
    MultiNotAllowed,

    /// Custom text sent for a menu without custom entries.
    ///
    /// Rejected on the same terms as [`Self::MultiNotAllowed`].
    #[error("custom entry not allowed")]
    CustomNotAllowed,

    /// Frame could not be decoded
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Server is shutting down
    #[error("server closing")]
    ServerClosing,
}

impl DisconnectReason {
    /// Map a decode failure to the reason sent to the peer.
    ///
    /// Returns `None` when the stream itself is gone and no frame can be sent.
    pub fn from_codec(err: &CodecError) -> Option<Self> {
        match err {
            CodecError::Queue(_) => None,
            CodecError::UnsupportedPacket(packet) => Some(Self::UnsupportedPacket(*packet)),
            other => Some(Self::Malformed(other.to_string())),
        }
    }
}
