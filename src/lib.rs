pub mod agent;
pub mod api;
pub mod archive;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod probe;
pub mod process;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod sweeper;
pub mod telemetry;
