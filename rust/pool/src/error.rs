//! Pool error types and wait outcomes

use plasma_slaw::{Retort, SlawError};
use thiserror::Error;

/// Pool error types
#[derive(Error, Debug)]
pub enum PoolError {
    /// No pool with this name
    #[error("No such pool: {0}")]
    NoSuchPool(String),

    /// A pool with this name already exists
    #[error("Pool already exists: {0}")]
    PoolExists(String),

    /// Malformed pool name
    #[error("Bad pool name {name:?}: {reason}")]
    BadName { name: String, reason: String },

    /// Unknown pool type
    #[error("Bad pool type: {0}")]
    BadType(String),

    /// Malformed option or configuration file
    #[error("Bad pool configuration: {0}")]
    BadConfig(String),

    #[error("Invalid pool size: {size}, must be between {min} and {max}")]
    InvalidSize { size: u64, min: u64, max: u64 },

    /// Hoses are still attached
    #[error("Pool in use: {0}")]
    InUse(String),

    /// The pool directory would nest inside another pool or contain one
    #[error("Pool path collides with another pool: {0}")]
    IllegalNesting(String),

    #[error("Cannot rename {from} to {to}")]
    ImpossibleRename { from: String, to: String },

    #[error("Unsupported pool format version {0}")]
    WrongVersion(u8),

    /// Backing file or entry corruption
    #[error("Pool corrupt: {0}")]
    Corrupt(String),

    /// Notification fifo failure
    #[error("Fifo error: {0}")]
    Fifo(String),

    /// Empty pool, evicted index or index not yet deposited
    #[error("No such protein")]
    NoSuchProtein,

    #[error("Protein of {size} bytes is bigger than pool capacity {capacity}")]
    ProteinBiggerThanPool { size: u64, capacity: u64 },

    #[error("Pool is frozen")]
    Frozen,

    /// Deposit would evict with stop-when-full set
    #[error("Pool is full")]
    Full,

    #[error("Hose already belongs to this gang")]
    AlreadyGangMember,

    #[error("Hose is not a member of this gang")]
    NotAGangMember,

    #[error("Gang has no members")]
    EmptyGang,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Slaw or protein codec error
    #[error(transparent)]
    Slaw(#[from] SlawError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(unix)]
impl From<nix::errno::Errno> for PoolError {
    fn from(errno: nix::errno::Errno) -> Self {
        PoolError::Io(std::io::Error::from(errno))
    }
}

impl PoolError {
    /// Conditions a caller may retry once the pool changes
    pub fn is_recoverable(&self) -> bool {
        match self {
            PoolError::Full | PoolError::Frozen | PoolError::InUse(_) => true,
            PoolError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    pub(crate) fn bad_name(name: &str, reason: impl Into<String>) -> Self {
        PoolError::BadName { name: name.to_string(), reason: reason.into() }
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        PoolError::Corrupt(msg.into())
    }

    /// Stable status code for this error
    pub fn retort(&self) -> Retort {
        match self {
            PoolError::NoSuchPool(_) => Retort::PoolNoSuchPool,
            PoolError::PoolExists(_) => Retort::PoolExists,
            PoolError::BadName { .. } => Retort::PoolPoolnameBadth,
            PoolError::BadType(_) => Retort::PoolTypeBadth,
            PoolError::BadConfig(_) => Retort::PoolConfigBadth,
            PoolError::InvalidSize { .. } => Retort::PoolInvalidSize,
            PoolError::InUse(_) => Retort::PoolInUse,
            PoolError::IllegalNesting(_) => Retort::PoolIllegalNesting,
            PoolError::ImpossibleRename { .. } => Retort::PoolImpossibleRename,
            PoolError::WrongVersion(_) => Retort::PoolWrongVersion,
            PoolError::Corrupt(_) => Retort::PoolCorrupt,
            PoolError::Fifo(_) => Retort::PoolFifoBadth,
            PoolError::NoSuchProtein => Retort::PoolNoSuchProtein,
            PoolError::ProteinBiggerThanPool { .. } => Retort::PoolProteinBiggerThanPool,
            PoolError::Frozen => Retort::PoolFrozen,
            PoolError::Full => Retort::PoolFull,
            PoolError::AlreadyGangMember => Retort::PoolAlreadyGangMember,
            PoolError::NotAGangMember => Retort::PoolNotAGangMember,
            PoolError::EmptyGang => Retort::PoolEmptyGang,
            PoolError::Unsupported(_) => Retort::PoolUnsupportedOperation,
            PoolError::Slaw(e) => e.retort(),
            PoolError::Io(_) => Retort::Io,
        }
    }
}

/// Outcome of an operation that may have nothing to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Done,
    NothingToDo,
}

impl Progress {
    pub fn retort(self) -> Retort {
        match self {
            Progress::Done => Retort::Ok,
            Progress::NothingToDo => Retort::NothingToDo,
        }
    }
}

/// Outcome of a blocking wait
#[derive(Debug, Clone, PartialEq)]
pub enum Awaited<T> {
    /// Data arrived
    Ready(T),
    TimedOut,
    /// Interrupted by an explicit wakeup
    Woken,
}

impl<T> Awaited<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Awaited::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Awaited::Ready(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Awaited<U> {
        match self {
            Awaited::Ready(v) => Awaited::Ready(f(v)),
            Awaited::TimedOut => Awaited::TimedOut,
            Awaited::Woken => Awaited::Woken,
        }
    }

    pub fn retort(&self) -> Retort {
        match self {
            Awaited::Ready(_) => Retort::Ok,
            Awaited::TimedOut => Retort::PoolAwaitTimedout,
            Awaited::Woken => Retort::PoolAwaitWoken,
        }
    }
}

/// How long a wait may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Return at once if nothing is ready
    NoWait,
    Forever,
    After(std::time::Duration),
}

impl Timeout {
    /// Seconds convention: negative blocks forever, zero does not wait
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs < 0.0 {
            Timeout::Forever
        } else if secs == 0.0 {
            Timeout::NoWait
        } else {
            Timeout::After(std::time::Duration::from_secs_f64(secs))
        }
    }

    pub(crate) fn deadline(self) -> Option<std::time::Instant> {
        match self {
            Timeout::NoWait => Some(std::time::Instant::now()),
            Timeout::Forever => None,
            Timeout::After(d) => Some(std::time::Instant::now() + d),
        }
    }
}

impl From<std::time::Duration> for Timeout {
    fn from(d: std::time::Duration) -> Self {
        if d.is_zero() {
            Timeout::NoWait
        } else {
            Timeout::After(d)
        }
    }
}
