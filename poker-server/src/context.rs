use std::sync::Arc;

use axum::extract::FromRef;
use poker_collab::Collab;
use poker_core::RuntimeConfig;

#[derive(Clone, FromRef)]
pub struct ServerContext {
    pub collab: Arc<Collab>,
    pub runtime_config: Arc<RuntimeConfig>,
}
