use std::sync::Arc;

use poker_collab::db::PgStore;
use poker_collab::{
    AllFeaturesEnabled, Collab, ExportWorker, InMemoryBlobStore, InMemoryTokenValidator, PokerContext,
    PrivacyOnlyPermissions,
};
use poker_core::RuntimeConfig;
use poker_impls::RedisBus;

mod config;
mod logging;

use config::BootConfig;

#[tokio::main]
async fn main() {
    logging::init_logger();

    let boot = BootConfig::from_env();

    let store = PgStore::new(&boot.database_url).await.expect("connects to postgres and runs migrations");
    let bus = RedisBus::new(&boot.redis_url).expect("connects to redis");

    // No production identity provider or blob storage is wired yet; both
    // boundaries are defined as traits in poker-collab for that purpose.
    let context = PokerContext {
        store: Arc::new(store),
        bus: Arc::new(bus),
        token_validator: Arc::new(InMemoryTokenValidator::new()),
        blob_store: Arc::new(InMemoryBlobStore::new()),
        permissions: Arc::new(PrivacyOnlyPermissions),
        feature_gate: Arc::new(AllFeaturesEnabled),
    };

    let collab = Collab::new(context.clone());
    let runtime_config = RuntimeConfig::default();

    tokio::spawn(ExportWorker::new(context, "export-worker-0").run());

    poker_server::run_server(collab, runtime_config).await;
}
