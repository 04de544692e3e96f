//! Calling platform signaling

use async_trait::async_trait;

use crate::SignalingError;

/// Two-step answer protocol of the calling platform
///
/// Both steps carry the same sanitized SDP answer. `accept` must only be
/// issued after `pre_accept` succeeded.
#[async_trait]
pub trait SignalingGateway: Send + Sync + 'static {
    /// Announce the answer before media starts flowing
    async fn pre_accept(&self, call_id: &str, sdp: &str) -> Result<(), SignalingError>;

    /// Confirm the call
    async fn accept(&self, call_id: &str, sdp: &str) -> Result<(), SignalingError>;
}
