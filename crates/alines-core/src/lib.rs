//! # ALINES Core
//!
//! Protocol engine for broadcasting a selection menu to remote clients and
//! collecting the first answer.
//!
//! This crate provides:
//! - A push-to-pull byte queue with size-exact, suspending reads
//! - The binary wire codec (u16 big-endian integers, u16-prefixed UTF-8 text)
//! - The per-connection state machine (authenticate, then answer menus)
//! - The menu coordinator (single active menu, first responder wins)
//! - A TCP server and a reference client
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            MenuServer                           │
//! │         (listener, start/stop, open_menu/close_menu API)        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         MenuCoordinator                         │
//! │     (active-menu slot, authenticated registry, resolve-once)    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                        ConnectionHandler                        │
//! │          (per-connection: password, then response loop)         │
//! ├────────────────────────────────┬────────────────────────────────┤
//! │             codec              │           ByteQueue            │
//! │         (frame shapes)         │      (exact-length reads)      │
//! └────────────────────────────────┴────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod codec;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod menu;
pub mod reader;
pub mod server;

pub use client::{ClientError, MenuClient};
pub use codec::{CodecError, Response, ServerMessage};
pub use connection::{ConnectionHandle, ConnectionHandler, ConnectionId, ConnectionState};
pub use coordinator::MenuCoordinator;
pub use error::{DisconnectReason, Error};
pub use menu::{Menu, MenuEntry, MenuError, MenuOptions, MenuResponse, Selection};
pub use reader::{ByteQueue, QueueError};
pub use server::{MenuServer, ServerConfig, ServerError};

/// Default listening port
pub const DEFAULT_PORT: u16 = 64937;
