//! Worker-side provisioning: fetch a job's assets through the cache
//! service, sync the test tree, lay out the pool directory and write the
//! variables file the backend starts from.

pub mod asset_cache;
pub mod context;
pub mod engine;
pub mod http_client;
pub mod locate;
pub mod poll;
pub mod symlink;
pub mod test_sync;
pub mod vars;
pub mod workspace;

pub use asset_cache::{AssetCacheCoordinator, CachedAsset};
pub use context::{ClientContext, Job, JobContext, JobFile, WebuiClient, Worker, WorkerContext};
pub use engine::{ProvisionedJob, ProvisioningEngine};
pub use http_client::HttpCacheServiceClient;
pub use poll::{PollError, PollPolicy, RequestPhase};
pub use tokio_util::sync::CancellationToken;
pub use test_sync::TestSyncCoordinator;
pub use vars::{VARS_FILE, write_vars};
pub use workspace::{Location, WorkspacePaths, WorkspaceResolver};
