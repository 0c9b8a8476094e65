//! Node software version, fetched once per process.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;

use crate::error::FetchError;
use crate::rpc::{methods, NodeRpc};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeVersion {
    pub subversion: String,
}

/// Memoizes `getnetworkinfo`'s `subversion`. Failures are not cached, so the
/// next call tries again.
pub struct VersionCache {
    rpc: Arc<dyn NodeRpc>,
    cached: OnceCell<NodeVersion>,
}

impl VersionCache {
    pub fn new(rpc: Arc<dyn NodeRpc>) -> Self {
        Self {
            rpc,
            cached: OnceCell::new(),
        }
    }

    pub async fn get_version(&self) -> Result<NodeVersion, FetchError> {
        self.cached
            .get_or_try_init(|| async {
                let info = self
                    .rpc
                    .get_network_info()
                    .await
                    .map_err(|err| FetchError::new(methods::GET_NETWORK_INFO, err))?;
                tracing::info!(subversion = %info.subversion, "node version");
                Ok::<_, FetchError>(NodeVersion {
                    subversion: info.subversion,
                })
            })
            .await
            .cloned()
    }
}
