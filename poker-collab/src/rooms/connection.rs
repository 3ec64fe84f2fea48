use parking_lot::Mutex;
use poker_core::{Id, ParticipantId, ParticipantRole, RoomEvent};
use tokio::sync::{mpsc, oneshot};

pub type RoomConnectionId = Id<RoomConnection>;

/// A single websocket connection locally attached to a [super::Room].
///
/// Outbound delivery is lossy by design: a slow consumer's queue fills up,
/// further sends are dropped rather than buffered without bound. The
/// gateway is responsible for actually closing such a connection; it learns
/// of the condition through the `kick` half of the channel returned
/// alongside the connection by [RoomConnection::new].
pub struct RoomConnection {
    pub id: RoomConnectionId,
    pub participant_id: ParticipantId,
    pub role: ParticipantRole,
    sender: mpsc::Sender<RoomEvent>,
    kick: Mutex<Option<oneshot::Sender<()>>>,
}

impl RoomConnection {
    /// Builds a connection and the one-shot receiver the gateway should
    /// poll in its own event loop. It fires exactly once, the first time
    /// [Self::try_send] observes a full outbound queue.
    pub fn new(
        participant_id: ParticipantId,
        role: ParticipantRole,
        sender: mpsc::Sender<RoomEvent>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (kick_tx, kick_rx) = oneshot::channel();

        let connection = Self {
            id: RoomConnectionId::new(),
            participant_id,
            role,
            sender,
            kick: Mutex::new(Some(kick_tx)),
        };

        (connection, kick_rx)
    }

    /// Attempts to deliver an event without blocking. Returns false if the
    /// connection's outbound queue is full (a slow consumer), and fires the
    /// kick signal so the gateway closes it with `SLOW_CONSUMER`.
    pub fn try_send(&self, event: RoomEvent) -> bool {
        let delivered = self.sender.try_send(event).is_ok();

        if !delivered {
            if let Some(kick) = self.kick.lock().take() {
                let _ = kick.send(());
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poker_core::RoomId;

    #[tokio::test]
    async fn try_send_fails_once_queue_is_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let (connection, _kick_rx) = RoomConnection::new(ParticipantId::new(), ParticipantRole::Voter, tx);

        let event = || RoomEvent::ParticipantLeft {
            room_id: RoomId::generate(),
            participant_id: ParticipantId::new(),
        };

        assert!(connection.try_send(event()));
        assert!(!connection.try_send(event()));

        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn kick_signal_fires_once_the_queue_is_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let (connection, kick_rx) = RoomConnection::new(ParticipantId::new(), ParticipantRole::Voter, tx);

        let event = || RoomEvent::ParticipantLeft {
            room_id: RoomId::generate(),
            participant_id: ParticipantId::new(),
        };

        assert!(connection.try_send(event()));
        assert!(kick_rx.try_recv().is_err());

        assert!(!connection.try_send(event()));
        assert!(kick_rx.await.is_ok());

        rx.recv().await.unwrap();
    }
}
