pub mod auth;
pub mod backup;
pub mod config;
pub mod destination;
pub mod error;
pub mod fit;
pub mod ledger;
pub mod pipeline;
mod redact;
pub mod source;
pub mod upload;

pub use error::{Result, SyncError};
