use thiserror::Error;

use crate::forge::ForgeError;
use crate::radio::RadioError;

/// Errors from attack and radio-control calls. Throttling is not an error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("radio: {0}")]
    Radio(#[from] RadioError),
    #[error("forge: {0}")]
    Forge(#[from] ForgeError),
    #[error("invalid channel {0} (expected 1-13)")]
    InvalidChannel(u8),
    #[error("beacon flood needs at least one SSID")]
    NoSsids,
    #[error("beacon flood already running on channel {0}")]
    FloodActive(u8),
}
