pub mod collab;
pub mod config;
pub mod cycle;
pub mod deployment;
pub mod error;
pub mod events;
pub mod failure;
pub mod io;
pub mod lifecycle;
pub mod orchestrator;
pub mod paths;
pub mod policy;
pub mod store;
pub mod types;
pub mod verification;

pub use error::{Result, ShipwrightError};
