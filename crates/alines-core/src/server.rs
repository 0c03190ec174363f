//! Menu server: listener lifecycle and the caller-facing API.

use crate::DEFAULT_PORT;
use crate::connection::serve_connection;
use crate::coordinator::MenuCoordinator;
use crate::menu::{Menu, MenuError, MenuOptions, MenuResponse};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

/// Server lifecycle errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` called while the server is running
    #[error("server already running")]
    AlreadyRunning,

    /// Listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Other socket error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Menu server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to listen on
    pub bind_ip: IpAddr,
    /// Port used when `start` is given none
    pub default_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            default_port: DEFAULT_PORT,
        }
    }
}

struct Running {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

/// Serves menus to authenticated TCP clients.
///
/// The coordinator outlives start/stop cycles, so menus may be opened before
/// the server starts listening; clients that join later catch up.
///
/// # Example
///
/// ```rust,no_run
/// use alines_core::{MenuOptions, MenuServer};
///
/// # async fn example() -> Result<(), alines_core::Error> {
/// let server = MenuServer::new();
/// server.start(Some("pass".to_string()), None).await?;
///
/// let outcome = server
///     .open_menu("Pick", ["A", "B", "C"], MenuOptions::default())
///     .await?
///     .await;
/// println!("response: {outcome}");
///
/// server.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct MenuServer {
    config: ServerConfig,
    coordinator: Arc<MenuCoordinator>,
    running: Mutex<Option<Running>>,
    next_id: Arc<AtomicU64>,
}

impl MenuServer {
    /// Create a stopped server with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a stopped server with custom configuration
    #[must_use]
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            coordinator: Arc::new(MenuCoordinator::new()),
            running: Mutex::new(None),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Start accepting connections.
    ///
    /// An empty or missing password accepts every client. Port 0 binds an
    /// ephemeral port; the bound address is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyRunning`] if started twice, or
    /// [`ServerError::Bind`] if the port cannot be bound.
    pub async fn start(
        &self,
        password: Option<String>,
        port: Option<u16>,
    ) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = SocketAddr::new(
            self.config.bind_ip,
            port.unwrap_or(self.config.default_port),
        );
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let password: Option<Arc<str>> = password.filter(|p| !p.is_empty()).map(Arc::from);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.coordinator.clone(),
            password,
            self.next_id.clone(),
        ));

        info!(%local_addr, "listening");
        *running = Some(Running {
            local_addr,
            accept_task,
        });
        Ok(local_addr)
    }

    /// Stop accepting, disconnect every client and cancel the active menu.
    ///
    /// No-op when not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        // Dropping the accept loop aborts every connection task it owns
        running.accept_task.abort();
        let _ = running.accept_task.await;

        self.coordinator.shutdown().await;
        info!(addr = %running.local_addr, "server closed");
    }

    /// Whether the server is listening
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Bound address while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Open a menu, superseding any active one.
    ///
    /// The returned future resolves once: with the first accepted client
    /// response, or with no selection / cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`MenuError`] if the menu cannot be framed.
    pub async fn open_menu<T, I, E>(
        &self,
        title: T,
        entries: I,
        options: MenuOptions,
    ) -> Result<MenuResponse, MenuError>
    where
        T: Into<String>,
        I: IntoIterator<Item = E>,
        E: Into<String>,
    {
        self.open(Menu::new(title, entries).with_options(options)).await
    }

    /// Open a prepared [`Menu`]
    ///
    /// # Errors
    ///
    /// Returns [`MenuError`] if the menu cannot be framed.
    pub async fn open(&self, menu: Menu) -> Result<MenuResponse, MenuError> {
        self.coordinator.open_menu(menu).await
    }

    /// Cancel the active menu. Returns whether one was active.
    pub async fn close_menu(&self) -> bool {
        self.coordinator.close_menu().await
    }

    /// Number of authenticated clients
    pub async fn connection_count(&self) -> usize {
        self.coordinator.connection_count().await
    }
}

impl Default for MenuServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MenuServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.accept_task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    coordinator: Arc<MenuCoordinator>,
    password: Option<Arc<str>>,
    next_id: Arc<AtomicU64>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    info!(conn = id, %peer, "client connected");
                    connections.spawn(serve_connection(
                        stream,
                        id,
                        coordinator.clone(),
                        password.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}
