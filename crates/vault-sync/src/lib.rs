//! vault-sync: convergence engine for keeping a vault in sync through a
//! shared remote document store.
//!
//! This crate provides the core functionality for:
//! - Merging local scans and remote listings into one `FileNode` per path
//! - Deciding uploads, downloads, deletions and conflict winners
//! - Caching the remote view locally to avoid redundant queries
//! - Driving reconciliation ticks from an injected `Clock`
//! - LocalFileStore, RemoteDocumentStore and Clock trait abstractions

pub mod cache;
pub mod clock;
pub mod config;
pub mod device_id;
pub mod diff;
pub mod document;
pub mod error;
pub mod filter;
pub mod fs;
pub mod hash;
pub mod node;
pub mod progress;
pub mod registry;
pub mod remote;
pub mod syncer;

pub use cache::{CacheError, LocalMetadataCache};
pub use clock::{Clock, SimulatedClock, TimerCallback, TimerId};
pub use config::{ConfigError, SyncerConfig};
pub use device_id::{DeviceId, DeviceIdError};
pub use diff::{Action, ActionKind, Plan, TombstonePolicy};
pub use document::{DocumentContent, RemoteDocument};
pub use error::{ErrorKind, SyncerError};
pub use filter::PathFilter;
pub use fs::{FileStat, FsError, InMemoryFs, LocalEntry, LocalFileStore, WriteOptions};
pub use hash::ContentHash;
pub use node::{FileNode, LocalHalf, RemoteHalf, StorageRef};
pub use progress::{CycleSummary, EventBus, EventSubscription, NoopProgress, ProgressSink, SyncEvent};
pub use registry::{Registry, RemoteOrigin, RemoteSnapshot};
pub use remote::{DocumentQuery, InMemoryRemote, RemoteDocumentStore, RemoteError, Subscription};
pub use syncer::{FileSyncer, SyncContext, SyncerHandle, SyncerState};
