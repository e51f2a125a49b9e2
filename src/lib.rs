// ProcessGuard - process supervisor and host telemetry daemon

pub mod config;
pub mod crash;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod logs;
pub mod metrics;
pub mod monitoring;
pub mod process;

pub use daemon::ProcessGuard;
pub use error::{Result, UserError};
