use std::time::Duration;
use thiserror::Error;

/// Failures reported to producers and to whoever builds a hub.
///
/// None of these are fatal: a rejected broadcast is simply not delivered.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub is shut down")]
    Closed,
    #[error("broadcast queue stayed full for {0:?}")]
    Saturated(Duration),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid hub setting `{0}`: must be non-zero")]
    InvalidConfig(&'static str),
}
