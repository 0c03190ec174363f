//! Active-menu slot and registry of authenticated connections.
//!
//! All state lives behind one lock and every transition (open, close,
//! resolve, register with catch-up, shutdown) completes inside a single
//! critical section. Frames are handed to per-connection writers without
//! waiting, so the lock is never held across network I/O.
//!
//! Invariants:
//! - at most one menu is active;
//! - an active menu's outcome resolves exactly once;
//! - every authenticated connection has seen `MenuOpen` for the active menu.

use crate::codec::{ServerMessage, ServerPacket};
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::DisconnectReason;
use crate::menu::{Menu, MenuError, MenuResolver, MenuResponse, Selection};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// The menu currently awaiting a response
struct ActiveMenu {
    generation: u64,
    menu: Arc<Menu>,
    /// Encoded `MenuOpen`, replayed to late joiners
    frame: Arc<[u8]>,
    resolver: MenuResolver,
}

#[derive(Default)]
struct CoordinatorState {
    active: Option<ActiveMenu>,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    generation: u64,
}

impl CoordinatorState {
    /// Queue a frame for every connection except `skip`
    fn broadcast(&self, frame: &Arc<[u8]>, skip: Option<ConnectionId>) {
        for (id, conn) in &self.connections {
            if Some(*id) != skip {
                conn.send_frame(frame.clone());
            }
        }
    }

    /// Clear the slot, resolve its outcome, tell clients to stop waiting
    fn finish_active(&mut self, selection: Selection, skip: Option<ConnectionId>) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        info!(generation = active.generation, outcome = %selection, "menu closed");
        active.resolver.resolve(selection);
        self.broadcast(&menu_close_frame(), skip);
        true
    }
}

fn menu_close_frame() -> Arc<[u8]> {
    Arc::from(&[ServerPacket::MenuClose as u8][..])
}

/// Owner of the single active menu and the authenticated connections
#[derive(Default)]
pub struct MenuCoordinator {
    state: Mutex<CoordinatorState>,
}

impl MenuCoordinator {
    /// Create a coordinator with no menu and no connections
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `menu`, superseding any active one.
    ///
    /// A superseded menu resolves to [`Selection::NoSelection`] and its
    /// `MenuClose` is broadcast before the new `MenuOpen`.
    ///
    /// # Errors
    ///
    /// Returns [`MenuError`] if the menu cannot be framed; the active menu is
    /// left untouched in that case.
    pub async fn open_menu(&self, menu: Menu) -> Result<MenuResponse, MenuError> {
        menu.validate()?;
        let menu = Arc::new(menu);
        let frame: Arc<[u8]> = ServerMessage::MenuOpen(Menu::clone(&menu)).encode()?.into();
        let (resolver, response) = MenuResponse::pair();

        let mut state = self.state.lock().await;
        state.finish_active(Selection::NoSelection, None);

        state.generation += 1;
        let generation = state.generation;
        info!(
            generation,
            entries = menu.entries.len(),
            clients = state.connections.len(),
            "menu open"
        );
        state.broadcast(&frame, None);
        state.active = Some(ActiveMenu {
            generation,
            menu,
            frame,
            resolver,
        });

        Ok(response)
    }

    /// Cancel the active menu with [`Selection::NoSelection`].
    ///
    /// Returns whether a menu was active.
    pub async fn close_menu(&self) -> bool {
        self.state
            .lock()
            .await
            .finish_active(Selection::NoSelection, None)
    }

    /// Generation and content of the active menu
    pub async fn active_menu(&self) -> Option<(u64, Arc<Menu>)> {
        self.state
            .lock()
            .await
            .active
            .as_ref()
            .map(|active| (active.generation, active.menu.clone()))
    }

    /// Number of authenticated connections
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Register an authenticated connection, replaying the active menu to it
    pub(crate) async fn register(&self, conn: ConnectionHandle) {
        let mut state = self.state.lock().await;
        if let Some(active) = &state.active {
            debug!(conn = conn.id(), generation = active.generation, "sending active menu");
            conn.send_frame(active.frame.clone());
        }
        state.connections.insert(conn.id(), conn);
    }

    /// Forget a connection. No-op if it was never registered.
    pub(crate) async fn unregister(&self, id: ConnectionId) {
        self.state.lock().await.connections.remove(&id);
    }

    /// Resolve menu `generation` with a response from `responder`.
    ///
    /// The first accepted response wins; every other connection gets
    /// `MenuClose`.
    ///
    /// # Errors
    ///
    /// Returns [`DisconnectReason::NoActiveMenu`] if that menu is no longer
    /// active (already answered, closed, or superseded).
    pub(crate) async fn resolve(
        &self,
        responder: ConnectionId,
        generation: u64,
        selection: Selection,
    ) -> Result<(), DisconnectReason> {
        let mut state = self.state.lock().await;
        let current = state.active.as_ref().map(|active| active.generation);
        if current != Some(generation) {
            return Err(DisconnectReason::NoActiveMenu);
        }

        debug!(conn = responder, generation, "response accepted");
        state.finish_active(selection, Some(responder));
        Ok(())
    }

    /// Disconnect every connection and cancel the active menu
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        for (_, conn) in state.connections.drain() {
            conn.disconnect(&DisconnectReason::ServerClosing);
        }
        if let Some(active) = state.active.take() {
            info!(generation = active.generation, "menu cancelled");
            active.resolver.resolve(Selection::Cancelled);
        }
    }
}

impl std::fmt::Debug for MenuCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MenuCoordinator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::menu::{MenuEntry, MenuOptions};
    use crate::reader::ByteQueue;
    use tokio::sync::mpsc;

    fn connection(id: ConnectionId) -> (ConnectionHandle, mpsc::UnboundedReceiver<Outbound>) {
        ConnectionHandle::new(id, None, Arc::new(ByteQueue::new()))
    }

    fn frame(msg: ServerMessage) -> Outbound {
        Outbound::Frame(msg.encode().unwrap().into())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[tokio::test]
    async fn test_open_broadcasts_to_registered() {
        let coordinator = MenuCoordinator::new();
        let (a, mut rx_a) = connection(1);
        let (b, mut rx_b) = connection(2);
        coordinator.register(a).await;
        coordinator.register(b).await;

        let menu = Menu::new("Pick", ["A", "B", "C"]);
        let _response = coordinator.open_menu(menu.clone()).await.unwrap();

        assert_eq!(drain(&mut rx_a), vec![frame(ServerMessage::MenuOpen(menu.clone()))]);
        assert_eq!(drain(&mut rx_b), vec![frame(ServerMessage::MenuOpen(menu))]);
    }

    #[tokio::test]
    async fn test_open_supersedes_previous() {
        let coordinator = MenuCoordinator::new();
        let (a, mut rx_a) = connection(1);
        coordinator.register(a).await;

        let first = coordinator.open_menu(Menu::new("1", ["A"])).await.unwrap();
        let second_menu = Menu::new("2", ["B"]);
        let _second = coordinator.open_menu(second_menu.clone()).await.unwrap();

        assert_eq!(first.await, Selection::NoSelection);
        assert_eq!(
            drain(&mut rx_a),
            vec![
                frame(ServerMessage::MenuOpen(Menu::new("1", ["A"]))),
                frame(ServerMessage::MenuClose),
                frame(ServerMessage::MenuOpen(second_menu)),
            ]
        );
        let (generation, active) = coordinator.active_menu().await.unwrap();
        assert_eq!(generation, 2);
        assert_eq!(active.title, "2");
    }

    #[tokio::test]
    async fn test_invalid_menu_keeps_active() {
        let coordinator = MenuCoordinator::new();
        let _response = coordinator.open_menu(Menu::new("ok", ["A"])).await.unwrap();

        let bad = Menu::new("bad", ["A"]).with_options(MenuOptions::new().with_selected(5));
        assert!(coordinator.open_menu(bad).await.is_err());
        assert_eq!(coordinator.active_menu().await.unwrap().1.title, "ok");
    }

    #[tokio::test]
    async fn test_close_menu() {
        let coordinator = MenuCoordinator::new();
        assert!(!coordinator.close_menu().await);

        let (a, mut rx_a) = connection(1);
        coordinator.register(a).await;
        let response = coordinator.open_menu(Menu::new("T", ["A"])).await.unwrap();
        drain(&mut rx_a);

        assert!(coordinator.close_menu().await);
        assert_eq!(response.await, Selection::NoSelection);
        assert_eq!(drain(&mut rx_a), vec![frame(ServerMessage::MenuClose)]);
        assert!(coordinator.active_menu().await.is_none());
    }

    #[tokio::test]
    async fn test_first_response_wins() {
        let coordinator = MenuCoordinator::new();
        let (a, mut rx_a) = connection(1);
        let (b, mut rx_b) = connection(2);
        coordinator.register(a).await;
        coordinator.register(b).await;

        let response = coordinator.open_menu(Menu::new("T", ["A", "B"])).await.unwrap();
        let (generation, _) = coordinator.active_menu().await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let entry = MenuEntry {
            index: 0,
            text: "A".to_string(),
        };
        coordinator
            .resolve(1, generation, Selection::Single(entry.clone()))
            .await
            .unwrap();
        assert_eq!(
            coordinator.resolve(2, generation, Selection::NoSelection).await,
            Err(DisconnectReason::NoActiveMenu)
        );

        assert_eq!(response.await, Selection::Single(entry));
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![frame(ServerMessage::MenuClose)]);
    }

    #[tokio::test]
    async fn test_stale_generation_rejected() {
        let coordinator = MenuCoordinator::new();
        let _first = coordinator.open_menu(Menu::new("1", ["A"])).await.unwrap();
        let second = coordinator.open_menu(Menu::new("2", ["A"])).await.unwrap();

        assert_eq!(
            coordinator.resolve(1, 1, Selection::NoSelection).await,
            Err(DisconnectReason::NoActiveMenu)
        );
        coordinator.resolve(1, 2, Selection::Custom("x".into())).await.unwrap();
        assert_eq!(second.await, Selection::Custom("x".into()));
    }

    #[tokio::test]
    async fn test_register_replays_active_menu() {
        let coordinator = MenuCoordinator::new();
        let menu = Menu::new("T", ["A"]);
        let _response = coordinator.open_menu(menu.clone()).await.unwrap();

        let (late, mut rx) = connection(7);
        coordinator.register(late).await;
        assert_eq!(drain(&mut rx), vec![frame(ServerMessage::MenuOpen(menu))]);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let coordinator = MenuCoordinator::new();
        let (a, mut rx_a) = connection(1);
        let queue = a.queue().clone();
        coordinator.register(a).await;
        let response = coordinator.open_menu(Menu::new("T", ["A"])).await.unwrap();
        drain(&mut rx_a);

        coordinator.shutdown().await;

        assert_eq!(response.await, Selection::Cancelled);
        assert_eq!(coordinator.connection_count().await, 0);
        assert_eq!(
            drain(&mut rx_a),
            vec![
                frame(ServerMessage::Disconnect {
                    reason: "server closing".to_string()
                }),
                Outbound::Close,
            ]
        );
        assert!(queue.is_closed());
    }
}
