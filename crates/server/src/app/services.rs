//! Store, transport and engine construction from [`ServerConfig`].

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use txweave_engine::Engine;
use txweave_infra::{HttpTransport, InMemoryTransStore, SqlTransStore, TransStore, connect};

use crate::config::{ServerConfig, StoreKind};

pub async fn build_store(store: &StoreKind) -> anyhow::Result<Arc<dyn TransStore>> {
    match store {
        StoreKind::Memory => {
            info!("using in-memory transaction store");
            Ok(InMemoryTransStore::arc())
        }
        StoreKind::Sql {
            url,
            max_connections,
        } => {
            let (pool, dialect) = connect(url, *max_connections)
                .await
                .context("failed to open transaction store")?;
            let store = SqlTransStore::new(pool, dialect);
            store
                .migrate()
                .await
                .context("failed to create transaction tables")?;
            info!(dialect = store.dialect().name(), "using sql transaction store");
            Ok(Arc::new(store))
        }
    }
}

/// Build the engine the server drives, calling participants over HTTP.
pub async fn build_engine(config: &ServerConfig) -> anyhow::Result<Engine> {
    let store = build_store(&config.store).await?;
    let transport =
        HttpTransport::new(config.engine.request_timeout).context("failed to build http client")?;
    Engine::new(store, Arc::new(transport), config.engine.clone())
        .context("invalid engine configuration")
}
