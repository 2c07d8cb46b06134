//! Coordinator server

use crate::common::{CoordinatorConfig, Result};
use crate::coordinator::http::{create_router, CoordState};
use crate::membership::{HttpTransport, InMemoryLog, NoopRecovery, ServerList};
use std::sync::Arc;

pub struct Coordinator {
    config: CoordinatorConfig,
    node_id: String,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, node_id: String) -> Self {
        Self { config, node_id }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting coordinator: {}", self.node_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Concurrent updates: {}", self.config.concurrent_updates);
        tracing::info!("  RPC timeout: {} ms (0 = infinite)", self.config.rpc_timeout_ms);

        // A real deployment hands the membership service a durable
        // replicated log; the in-process log keeps single-node clusters and
        // local development working without one.
        let journal = Arc::new(InMemoryLog::new());
        let transport = Arc::new(HttpTransport::new());
        let list = Arc::new(ServerList::new(
            &self.config,
            journal,
            transport,
            Arc::new(NoopRecovery),
        ));

        // Replay whatever the journal holds before accepting requests.
        list.recover()?;

        let router = create_router(CoordState { list: list.clone() });
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!("Coordinator ready");
        axum::serve(listener, router).await?;

        Ok(())
    }
}
