//! `ChatmlServer` builder and accept loop.
//!
//! This ties the layers together: transport → handshake → session → room.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chatml_protocol::{Codec, JsonCodec};
use chatml_room::{MessageProcessor, ProcessorChain, RoomConfig, RoomRegistry};
use chatml_session::SessionConfig;
use chatml_transport::{Transport, WebSocketTransport};
use tokio::sync::Mutex;

use crate::handler::handle_connection;
use crate::{ChatmlError, ServerConfig};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<K: Codec> {
    pub(crate) rooms: Arc<Mutex<RoomRegistry>>,
    /// Set under the registry lock once shutdown begins; no room is
    /// created after that.
    pub(crate) shutting_down: AtomicBool,
    pub(crate) codec: K,
    pub(crate) config: ServerConfig,
}

impl<K: Codec> ServerState<K> {
    pub(crate) fn new(rooms: RoomRegistry, codec: K, config: ServerConfig) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(rooms)),
            shutting_down: AtomicBool::new(false),
            codec,
            config,
        }
    }
}

/// Builder for configuring and starting a chatml server.
///
/// # Example
///
/// ```rust,no_run
/// use chatml::prelude::*;
///
/// # async fn start() -> Result<(), ChatmlError> {
/// let server = ChatmlServer::builder()
///     .bind("0.0.0.0:8080")
///     .processor(Uppercase)
///     .build()
///     .await?;
/// server.run_until_ctrl_c().await
/// # }
/// ```
pub struct ChatmlServerBuilder {
    config: ServerConfig,
    processors: ProcessorChain,
}

impl ChatmlServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            processors: ProcessorChain::new(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets how long a new connection may take to send its hello.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.config.room = config;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Appends a processor to the chain every room applies to text.
    pub fn processor(mut self, processor: impl MessageProcessor) -> Self {
        self.processors.register(processor);
        self
    }

    /// Lets experimental processors run.
    pub fn allow_experimental(mut self, allow: bool) -> Self {
        self.processors = self.processors.allow_experimental(allow);
        self
    }

    /// Binds the listener and builds the server.
    ///
    /// Uses `JsonCodec` over `WebSocketTransport`.
    pub async fn build(self) -> Result<ChatmlServer<JsonCodec>, ChatmlError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;

        for (name, description) in self.processors.descriptions() {
            tracing::info!(processor = name, description, "processor registered");
        }

        let rooms = RoomRegistry::with_processors(self.config.room.clone(), self.processors);
        let state = Arc::new(ServerState::new(rooms, JsonCodec, self.config));

        Ok(ChatmlServer { transport, state })
    }
}

impl Default for ChatmlServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound chatml server.
///
/// Call [`run_until()`](Self::run_until) to start accepting connections.
pub struct ChatmlServer<K: Codec = JsonCodec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<K>>,
}

impl<K> ChatmlServer<K>
where
    K: Codec + Clone,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Shared handle to the room registry, for status pages and tests.
    pub fn rooms(&self) -> Arc<Mutex<RoomRegistry>> {
        Arc::clone(&self.state.rooms)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), ChatmlError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until the ctrl-c signal.
    pub async fn run_until_ctrl_c(self) -> Result<(), ChatmlError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to install ctrl-c handler");
            }
        })
        .await
    }

    /// Runs the accept loop until `shutdown` resolves, then closes every
    /// room. Closing a room releases its members, which ends their
    /// sessions and closes their connections.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ChatmlError>
    where
        F: Future<Output = ()> + Send,
    {
        let Self { transport, state } = self;
        tracing::info!(addr = %state.config.bind_addr, "chatml server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = transport.accept_socket() => match accepted {
                    Ok(pending) => {
                        let state = Arc::clone(&state);
                        // The upgrade runs on the connection's own task so a
                        // silent socket never holds up the accept loop.
                        tokio::spawn(async move {
                            let peer = pending.peer_addr();
                            let conn = match pending.upgrade().await {
                                Ok(conn) => conn,
                                Err(e) => {
                                    tracing::debug!(%peer, error = %e, "upgrade failed");
                                    return;
                                }
                            };
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(%peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!("chatml server shutting down");
        if let Err(e) = transport.shutdown().await {
            tracing::debug!(error = %e, "transport shutdown failed");
        }

        let mut rooms = state.rooms.lock().await;
        state.shutting_down.store(true, Ordering::Release);
        let closed = rooms.close_all().await;
        tracing::info!(rooms = closed, "chatml server stopped");
        Ok(())
    }
}

impl ChatmlServer<JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> ChatmlServerBuilder {
        ChatmlServerBuilder::new()
    }
}
