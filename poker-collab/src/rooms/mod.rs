mod connection;
mod room;

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::StreamExt;
use log::{error, info};
use poker_core::{room_topic, RoomEvent, RoomId};

pub use connection::*;
pub use room::*;

use crate::db::DatabaseError;
use crate::PokerContext;

/// Per-process map of active rooms to their [Room] actors. Exactly one hub
/// per `(node, roomId)`; lookup-or-create is atomic. Strictly per-process —
/// there is no global registry.
///
/// `construction_locks` holds one async mutex per room id currently being
/// (or about to be) constructed, so two connections racing to attach to a
/// not-yet-resident room serialize on the same lock instead of each building
/// its own `Room` and relay task. The plain `rooms` map alone can't provide
/// this: a `get` miss followed later by an `insert` is a classic
/// check-then-act race under concurrent callers.
pub struct RoomRegistry {
    context: PokerContext,
    rooms: DashMap<RoomId, Arc<Room>>,
    construction_locks: DashMap<RoomId, Arc<tokio::sync::Mutex<()>>>,
}

impl RoomRegistry {
    pub fn new(context: &PokerContext) -> Self {
        Self {
            context: context.clone(),
            rooms: DashMap::new(),
            construction_locks: DashMap::new(),
        }
    }

    /// Returns the hub for `room_id`, creating and activating it (including
    /// its EventBus relay task) if it isn't already resident on this node.
    pub async fn get_or_create(&self, room_id: &RoomId) -> Result<Arc<Room>, RoomError> {
        if let Some(room) = self.rooms.get(room_id) {
            return Ok(room.clone());
        }

        let lock = self
            .construction_locks
            .entry(room_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let _guard = lock.lock().await;

        // Re-check: a competing caller may have finished construction while
        // we were waiting on the lock.
        if let Some(room) = self.rooms.get(room_id) {
            return Ok(room.clone());
        }

        let data = self
            .context
            .store
            .room_by_id(room_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => RoomError::RoomNotFound(room_id.clone()),
                e => RoomError::Database(e),
            })?;

        if data.is_deleted() {
            return Err(RoomError::RoomDeleted(room_id.clone()));
        }

        let active_round_id = self
            .context
            .store
            .active_round_for_room(room_id)
            .await?
            .map(|r| r.id);

        let room = Arc::new(Room::new(&self.context, data, active_round_id));
        self.rooms.insert(room_id.clone(), room.clone());

        spawn_relay(self.context.clone(), room.clone());

        Ok(room)
    }

    pub fn get(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|r| r.clone())
    }

    /// Releases a room's hub once it has no locally attached connections.
    /// Called by the gateway after a short linger period past the last
    /// detach.
    pub fn release_if_empty(&self, room_id: &RoomId) {
        if let Some(room) = self.rooms.get(room_id) {
            if room.local_connection_count() == 0 {
                drop(room);
                self.rooms.remove(room_id);
                self.construction_locks.remove(room_id);
            }
        }
    }
}

/// Subscribes to a room's EventBus topic for the lifetime of the hub and
/// relays every received event to locally attached connections. This is the
/// only path by which a room's own mutations reach its own connections,
/// keeping local and remote observers on the same fan-out mechanism.
fn spawn_relay(context: PokerContext, room: Arc<Room>) {
    tokio::spawn(async move {
        let topic = room_topic(room.id());

        let mut stream = match context.bus.subscribe(&topic).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("failed to subscribe to {topic}: {e}");
                return;
            }
        };

        info!("room {} relay subscribed to {topic}", room.id());

        while let Some(payload) = stream.next().await {
            match serde_json::from_slice::<RoomEvent>(&payload) {
                Ok(event) => room.relay_locally(&event),
                Err(e) => error!("dropping malformed event on {topic}: {e}"),
            }
        }

        info!("room {} relay for {topic} ended", room.id());
    });
}
