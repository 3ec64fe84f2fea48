mod bus;
mod config;
mod deck;
mod domain;
mod events;
mod ids;
mod voting;

pub use bus::*;
pub use config::*;
pub use deck::*;
pub use domain::*;
pub use events::*;
pub use ids::*;
pub use voting::*;
