//! Plasma - typed binary values, framed proteins and multi-process pools
//!
//! This crate ties the workspace together:
//! - [`slaw`]: self-describing binary values and the protein framer
//! - [`pool`]: named ring buffers of proteins shared between processes

pub use plasma_pool as pool;
pub use plasma_slaw as slaw;

pub use plasma_pool::{PoolError, PoolOptions};
pub use plasma_slaw::{Protein, Slaw, SlawError};

#[cfg(unix)]
pub use plasma_pool::{Gang, Hose, Pools, PoolsConfig};

pub mod logging;

/// Re-export common types
pub mod prelude {
    pub use plasma_pool::{Awaited, OptionChanges, PoolError, PoolOptions, Progress, TimeComparison, Timeout};
    pub use plasma_slaw::{ByteOrder, Protein, SearchMode, Slaw, SlawError, SlawMap};

    #[cfg(unix)]
    pub use plasma_pool::{Gang, Hose, Pools};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
