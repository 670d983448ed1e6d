#![doc = "Common types shared across the cycle-timing workspace."]

pub mod config;
pub mod error;
pub mod metrics;
pub mod reading;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use reading::*;
