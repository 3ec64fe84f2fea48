mod memory_bus;
mod redis_bus;

pub use memory_bus::*;
pub use redis_bus::*;
