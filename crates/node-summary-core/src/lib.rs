pub mod aggregator;
pub mod block_cache;
pub mod clock;
pub mod error;
pub mod fees;
pub mod precision;
pub mod refresh;
pub mod rpc;
pub mod summary;
pub mod version;

pub use aggregator::{Aggregator, AggregatorConfig};
pub use error::{CoreError, ErrorKind, FetchError, RpcError};
pub use refresh::RefreshCache;
pub use summary::{Snapshot, Summary};
pub use version::VersionCache;
