mod collaborators;
pub mod db;
mod export;
mod rooms;

use std::sync::Arc;

pub use collaborators::*;
pub use export::*;
pub use rooms::*;

use poker_core::EventBus;

use db::AuthorityStore;

/// Shared handle passed to the gateway, the room hubs, and the export
/// worker: access to persistence, the event bus, and the boundary
/// collaborators (§6.3), without any of them needing to know how the others
/// are wired.
#[derive(Clone)]
pub struct PokerContext {
    pub store: Arc<dyn AuthorityStore>,
    pub bus: Arc<dyn EventBus>,
    pub token_validator: Arc<dyn TokenValidator>,
    pub blob_store: Arc<dyn BlobStore>,
    pub permissions: Arc<dyn PermissionsResolver>,
    pub feature_gate: Arc<dyn FeatureGate>,
}

/// The top-level poker collaboration system: room management bound to a
/// concrete [PokerContext].
pub struct Collab {
    pub context: PokerContext,
    pub rooms: RoomRegistry,
}

impl Collab {
    pub fn new(context: PokerContext) -> Self {
        let rooms = RoomRegistry::new(&context);
        Self { context, rooms }
    }
}
