//! plugctl-lifecycle: discovery, the plugin state machine, table backups and
//! the host bridge.

pub mod backup;
pub mod bridge;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod manifest;
pub mod report;

pub use backup::{BackupArchiver, BackupArtifact, BackupDocument};
pub use bridge::{BridgeConfig, PluginBridge};
pub use discovery::{Candidate, CandidateInfo};
pub use error::{BridgeError, LifecycleError};
pub use manager::{db_config, LifecycleManager, ManagerOptions};
pub use manifest::{ManifestDependency, PluginManifest};
pub use report::{
    BatchAction, BatchItem, BatchOutcome, BatchReport, DiscoveryReport, ItemError, Transition,
    UninstallOutcome,
};
