pub mod archive_bridge;
pub mod checkpoint;
pub mod classifier;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod registry;
pub mod report;
pub mod resilient;
pub mod resolver;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use error::{ExpandError, FetchError, RegistryConflict, SessionError};
pub use registry::{OriginRegistry, PutOutcome, RegistrySnapshot};
pub use report::SessionReport;
pub use resolver::{
    EntryOutcome, Resolution, Resolver, ResolverContext, ResolverSettings, Session, Strategy,
};
