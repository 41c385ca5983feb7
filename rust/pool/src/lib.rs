//! Plasma Pools - Multi-Process Protein Ring Buffers
//!
//! A pool is a named ring buffer of proteins in a memory-mapped file that
//! any number of processes deposit into and read from. Indices grow
//! without bound; the oldest proteins are evicted as the ring wraps.

pub mod engine;
pub mod error;
pub mod layout;
pub mod name;
pub mod options;
pub mod region;
mod toc;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub mod context;
        pub mod gang;
        pub mod hose;
        mod notify;

        pub use context::{Pools, PoolsConfig, POOLS_DIR_ENV};
        pub use gang::{Gang, GangWaker, MemberId, SharedHose};
        pub use hose::{FetchBatch, FetchOp, Fetched, Hose, Retrieved};
        pub use notify::Waker;
        pub use region::MmapRegion;
    }
}

pub use engine::{PoolEngine, PoolInfo, StoredEntry, TimeComparison, WriteGuard, DEFAULT_SPIN_LIMIT};
pub use error::{Awaited, PoolError, Progress, Result, Timeout};
pub use name::{validate_name, PoolAddress, MAX_POOL_NAME_LEN};
pub use options::{OptionChanges, PoolOptions};
pub use region::{InMemoryRegion, SharedRegion};

/// Re-export common types
pub mod prelude {
    pub use crate::error::{Awaited, PoolError, Progress, Result, Timeout};
    pub use crate::engine::TimeComparison;
    pub use crate::options::{OptionChanges, PoolOptions};

    #[cfg(unix)]
    pub use crate::{gang::Gang, hose::Hose, context::Pools};
}

/// Backing file format version written by this crate
pub const POOL_VERSION: u8 = layout::POOL_FORMAT_VERSION;
