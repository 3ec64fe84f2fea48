use std::time::Duration;

/// Timing knobs shared by the RoomHub, the ConnectionGateway, and the
/// ExportWorker. Analogous in spirit to the teacher's audio pipeline
/// `Config`, but covering connection lifecycle timing instead of sample
/// buffering.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How long a connection may stay open without sending `room.join.v1`.
    pub join_timeout: Duration,
    /// Interval at which the server emits `heartbeat.ping.v1`.
    pub heartbeat_interval: Duration,
    /// How long since the last `heartbeat.pong.v1` before a connection is
    /// considered dead.
    pub heartbeat_timeout: Duration,
    /// Upper bound for a single domain operation inside a connection handler.
    pub domain_operation_timeout: Duration,
    /// Upper bound for rendering and uploading one export job.
    pub export_job_timeout: Duration,
    /// Capacity of a connection's bounded outbound queue before it is
    /// considered a slow consumer and closed.
    pub outbound_queue_capacity: usize,
    /// How long an export artifact's download URL remains valid.
    pub export_artifact_ttl: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(60),
            domain_operation_timeout: Duration::from_secs(5),
            export_job_timeout: Duration::from_secs(600),
            outbound_queue_capacity: 64,
            export_artifact_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}
