pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod io;
pub mod journal;
pub mod monitor;
pub mod paths;
pub mod registry;
pub mod review;
pub mod task;
pub mod types;

pub use error::{RelayError, Result};
