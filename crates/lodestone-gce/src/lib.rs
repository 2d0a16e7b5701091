//! Compute Engine adapter for the instance gateway.

mod compute;
mod token;

pub use compute::{COMPUTE_BASE_URL, ComputeInstance, InstanceRef};
pub use token::{COMPUTE_SCOPE, ServiceAccountKey, TokenSource};

#[derive(Debug, thiserror::Error)]
pub enum GceError {
    #[error("oauth token exchange failed ({status}): {body}")]
    Auth { status: u16, body: String },
    #[error("compute {action} failed ({status}): {body}")]
    Api {
        action: String,
        status: u16,
        body: String,
    },
}
