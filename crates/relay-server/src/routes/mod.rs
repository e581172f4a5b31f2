pub mod config;
pub mod events;
pub mod tasks;
pub mod workers;
