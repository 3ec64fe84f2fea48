use std::env;

/// Process bootstrap configuration, read once at startup. Distinct from
/// [poker_core::RuntimeConfig], which covers connection/job timing rather
/// than where to find the database or the bus. The listen port is read
/// directly by `poker_server::run_server`, mirroring where the teacher
/// reads its own `TURNTABLE_SERVER_PORT`.
pub struct BootConfig {
    pub database_url: String,
    pub redis_url: String,
}

impl BootConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            redis_url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
        }
    }
}
