mod api;
mod db;
mod service;
mod util;

use std::sync::Arc;

use thiserror::Error;

use crate::api::server::{RouteError, start_server};
use crate::db::memory::MemStore;
use crate::db::pg::PgStore;
use crate::db::prelude::{Store, StoreError};
use crate::util::env::{EnvErr, Var};

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Route(#[from] RouteError),
}

#[tokio::main]
async fn main() -> Result<(), RunnerErr> {
    util::trace::init();

    let database_url = crate::var!(Var::DatabaseUrl).await?;
    let store: Arc<dyn Store> = if database_url.is_empty() {
        tracing::warn!("DATABASE_URL is unset, state is in-memory only");
        Arc::new(MemStore::new())
    } else {
        Arc::new(PgStore::connect(database_url).await?)
    };

    start_server(store).await?;
    Ok(())
}
