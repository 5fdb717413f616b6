//! Tiered file store: recently modified files stay raw, cold files are
//! compressed in the background and restored on read.

pub mod app_dirs;
pub mod codec;
pub mod config;
pub mod layout;
pub mod logging;
pub mod metadata;
pub mod pool;
pub mod promotion;
pub mod service;
pub mod storage;
pub mod tiering;
pub mod wakeup;

pub use codec::{Codec, CodecError, ZipCodec};
pub use config::TierConfig;
pub use layout::Layout;
pub use metadata::{ClaimKind, ClaimOutcome, FileRecord, MetadataStore, StoreError};
pub use pool::{Priority, WorkerPool};
pub use promotion::{PromoteError, Promoter};
pub use service::{ServiceError, TierService};
pub use storage::{LocalStorage, Storage};
