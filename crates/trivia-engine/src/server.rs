//! The server builder and accept loop.
//!
//! A builder assembles the transport and shared state once; the server
//! itself just accepts connections and spawns a handler task per socket.

use std::sync::Arc;

use trivia_connection::ConnectionRegistry;
use trivia_protocol::{Codec, JsonCodec};
use trivia_room::{Cache, RoomManager};
use trivia_transport::{Transport, WebSocketEventBus, WebSocketTransport};

use crate::archive::SessionArchive;
use crate::catalog::{Catalog, QuestionProvider};
use crate::config::AppConfig;
use crate::engine::GameEngineRegistry;
use crate::error::EngineError;
use crate::handler::handle_connection;
use crate::pipeline::QuestionPipeline;

/// Shared state passed to every connection handler task.
pub(crate) struct ServerState<C, Cat, Prov, Arch>
where
    C: Cache,
    Cat: Catalog,
    Prov: QuestionProvider,
    Arch: SessionArchive,
{
    pub(crate) registry: ConnectionRegistry,
    pub(crate) manager: Arc<RoomManager<C>>,
    pub(crate) engines: Arc<GameEngineRegistry<C, WebSocketEventBus, Cat, Prov, Arch>>,
    pub(crate) bus: Arc<WebSocketEventBus>,
    pub(crate) codec: JsonCodec,
}

/// Builder for configuring and starting a trivia game server.
pub struct TriviaServerBuilder {
    config: AppConfig,
}

impl TriviaServerBuilder {
    pub fn new() -> Self {
        Self { config: AppConfig::default() }
    }

    /// Overrides the default timing/bind configuration.
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the transport and assembles a [`TriviaServer`] wired to the
    /// given question catalog, question provider, and session archive.
    pub async fn build<C, Cat, Prov, Arch>(
        self,
        cache: C,
        catalog: Cat,
        provider: Prov,
        archive: Arch,
    ) -> Result<TriviaServer<C, Cat, Prov, Arch>, EngineError>
    where
        C: Cache,
        Cat: Catalog,
        Prov: QuestionProvider,
        Arch: SessionArchive,
    {
        let transport = WebSocketTransport::bind(&self.config.bind_addr.to_string())
            .await
            .map_err(EngineError::Transport)?;

        let config = Arc::new(self.config);
        let manager = Arc::new(RoomManager::new(cache));
        let bus = Arc::new(WebSocketEventBus::new());
        let pipeline = Arc::new(QuestionPipeline::new(Arc::new(catalog), Arc::new(provider), config.provider_timeout));
        let archive = Arc::new(archive);
        let engines = Arc::new(GameEngineRegistry::new(manager.clone(), bus.clone(), pipeline, archive, config));

        let state = Arc::new(ServerState {
            registry: ConnectionRegistry::new(),
            manager,
            engines,
            bus,
            codec: JsonCodec,
        });

        Ok(TriviaServer { transport, state })
    }
}

impl Default for TriviaServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running trivia game server. Call [`run`](Self::run) to start accepting
/// connections.
pub struct TriviaServer<C, Cat, Prov, Arch>
where
    C: Cache,
    Cat: Catalog,
    Prov: QuestionProvider,
    Arch: SessionArchive,
{
    transport: WebSocketTransport,
    state: Arc<ServerState<C, Cat, Prov, Arch>>,
}

impl<C, Cat, Prov, Arch> TriviaServer<C, Cat, Prov, Arch>
where
    C: Cache,
    Cat: Catalog,
    Prov: QuestionProvider,
    Arch: SessionArchive,
{
    pub fn builder() -> TriviaServerBuilder {
        TriviaServerBuilder::new()
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the accept loop: accepts incoming WebSocket connections,
    /// registers them on the event bus, and spawns a handler task for each.
    /// Runs until the process is terminated.
    pub async fn run(mut self) -> Result<(), EngineError> {
        tracing::info!("trivia server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    self.state.bus.register(conn.clone()).await;
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
