pub mod config;
pub mod coordinator;
pub mod http_server;
pub mod observability;
pub mod sensor;
pub mod setup;
pub mod sinks;
pub mod transform;

pub use coordinator::{CoordinatorError, UpdateCoordinator};
