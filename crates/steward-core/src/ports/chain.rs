//! ChainHeight port - progress of the upstream data source.

use async_trait::async_trait;

use crate::domain::StewardError;

/// Current block height. Used for watermarks and by the watchdog.
#[async_trait]
pub trait ChainHeight: Send + Sync {
    async fn block_height(&self) -> Result<u64, StewardError>;
}
