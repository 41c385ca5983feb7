//! Closed set of status codes shared by the slaw and pool layers
//!
//! Every error type in the workspace maps onto one of these codes so that
//! callers can log, compare or forward a stable number. Success codes are
//! non-negative, failures negative.

use std::fmt;

const PLASMA_FIRST: i64 = 200_000;
const POOLS: i64 = PLASMA_FIRST;
const SLAW: i64 = PLASMA_FIRST + 10_000;

/// Status code returned by every core operation
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Retort {
    Ok = 0,
    NothingToDo = 301,
    PoolCreated = POOLS + 10,

    InvalidArgument = -2,
    Io = -3,

    SlawCorruptProtein = -SLAW,
    SlawCorruptSlaw = -(SLAW + 1),
    SlawNotNumeric = -(SLAW + 3),
    SlawRangeErr = -(SLAW + 4),
    SlawWrongLength = -(SLAW + 6),
    SlawNotFound = -(SLAW + 7),

    PoolInUse = -(POOLS + 530),
    PoolTypeBadth = -(POOLS + 540),
    PoolConfigBadth = -(POOLS + 545),
    PoolWrongVersion = -(POOLS + 547),
    PoolCorrupt = -(POOLS + 548),
    PoolPoolnameBadth = -(POOLS + 550),
    PoolImpossibleRename = -(POOLS + 551),
    PoolFifoBadth = -(POOLS + 555),
    PoolInvalidSize = -(POOLS + 560),
    PoolNoSuchPool = -(POOLS + 570),
    PoolExists = -(POOLS + 575),
    PoolIllegalNesting = -(POOLS + 576),
    PoolNoSuchProtein = -(POOLS + 635),
    PoolAwaitTimedout = -(POOLS + 640),
    PoolAwaitWoken = -(POOLS + 650),
    PoolWakeupNotEnabled = -(POOLS + 660),
    PoolProteinBiggerThanPool = -(POOLS + 700),
    PoolFrozen = -(POOLS + 710),
    PoolFull = -(POOLS + 720),
    PoolAlreadyGangMember = -(POOLS + 1050),
    PoolNotAGangMember = -(POOLS + 1055),
    PoolEmptyGang = -(POOLS + 1060),
    PoolUnsupportedOperation = -(POOLS + 1100),
}

impl Retort {
    /// Numeric value of the code
    pub fn code(self) -> i64 {
        self as i64
    }

    /// Whether the code reports success
    pub fn is_success(self) -> bool {
        self.code() >= 0
    }

    /// Symbolic name, as printed in logs
    pub fn name(self) -> &'static str {
        match self {
            Retort::Ok => "OB_OK",
            Retort::NothingToDo => "OB_NOTHING_TO_DO",
            Retort::PoolCreated => "POOL_CREATED",
            Retort::InvalidArgument => "OB_INVALID_ARGUMENT",
            Retort::Io => "OB_IO_ERROR",
            Retort::SlawCorruptProtein => "SLAW_CORRUPT_PROTEIN",
            Retort::SlawCorruptSlaw => "SLAW_CORRUPT_SLAW",
            Retort::SlawNotNumeric => "SLAW_NOT_NUMERIC",
            Retort::SlawRangeErr => "SLAW_RANGE_ERR",
            Retort::SlawWrongLength => "SLAW_WRONG_LENGTH",
            Retort::SlawNotFound => "SLAW_NOT_FOUND",
            Retort::PoolInUse => "POOL_IN_USE",
            Retort::PoolTypeBadth => "POOL_TYPE_BADTH",
            Retort::PoolConfigBadth => "POOL_CONFIG_BADTH",
            Retort::PoolWrongVersion => "POOL_WRONG_VERSION",
            Retort::PoolCorrupt => "POOL_CORRUPT",
            Retort::PoolPoolnameBadth => "POOL_POOLNAME_BADTH",
            Retort::PoolImpossibleRename => "POOL_IMPOSSIBLE_RENAME",
            Retort::PoolFifoBadth => "POOL_FIFO_BADTH",
            Retort::PoolInvalidSize => "POOL_INVALID_SIZE",
            Retort::PoolNoSuchPool => "POOL_NO_SUCH_POOL",
            Retort::PoolExists => "POOL_EXISTS",
            Retort::PoolIllegalNesting => "POOL_ILLEGAL_NESTING",
            Retort::PoolNoSuchProtein => "POOL_NO_SUCH_PROTEIN",
            Retort::PoolAwaitTimedout => "POOL_AWAIT_TIMEDOUT",
            Retort::PoolAwaitWoken => "POOL_AWAIT_WOKEN",
            Retort::PoolWakeupNotEnabled => "POOL_WAKEUP_NOT_ENABLED",
            Retort::PoolProteinBiggerThanPool => "POOL_PROTEIN_BIGGER_THAN_POOL",
            Retort::PoolFrozen => "POOL_FROZEN",
            Retort::PoolFull => "POOL_FULL",
            Retort::PoolAlreadyGangMember => "POOL_ALREADY_GANG_MEMBER",
            Retort::PoolNotAGangMember => "POOL_NOT_A_GANG_MEMBER",
            Retort::PoolEmptyGang => "POOL_EMPTY_GANG",
            Retort::PoolUnsupportedOperation => "POOL_UNSUPPORTED_OPERATION",
        }
    }
}

impl fmt::Display for Retort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
