//! Pool creation options

use plasma_slaw::Slaw;
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};
use crate::layout::{self, flags};

/// The only local pool type
pub const MMAP_POOL_TYPE: &str = "mmap";
/// Default ring size (1MB)
pub const DEFAULT_POOL_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_TOC_CAPACITY: u64 = 100;
pub const MIN_POOL_SIZE: u64 = 1024;
/// Largest ring a pool may have (8TB, or 2GB on 32-bit targets)
pub const MAX_POOL_SIZE: u64 = if usize::BITS < 64 { 2 << 30 } else { 8 << 40 };
pub const MAX_TOC_CAPACITY: u64 = MAX_POOL_SIZE / layout::QUANTUM;

/// Options recognized when creating a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PoolOptions {
    #[serde(rename = "type")]
    pub pool_type: String,
    /// Ring bytes
    pub size: u64,
    pub toc_capacity: u64,
    pub resizable: bool,
    /// Keep the options only in the backing file
    pub single_file: bool,
    /// Flush the mapping after every deposit
    pub sync: bool,
    pub checksum: bool,
    pub stop_when_full: bool,
    pub frozen: bool,
    pub auto_dispose: bool,
    /// User name or numeric uid to own the pool files
    pub owner: Option<String>,
    /// Group name or numeric gid
    pub group: Option<String>,
    /// Permission bits for the pool files
    pub mode: Option<u32>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            pool_type: MMAP_POOL_TYPE.to_string(),
            size: DEFAULT_POOL_SIZE,
            toc_capacity: DEFAULT_TOC_CAPACITY,
            resizable: true,
            single_file: false,
            sync: false,
            checksum: false,
            stop_when_full: false,
            frozen: false,
            auto_dispose: false,
            owner: None,
            group: None,
            mode: None,
        }
    }
}

impl PoolOptions {
    /// Defaults for a memory-mapped pool
    pub fn mmap() -> Self {
        Self::default()
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn toc_capacity(mut self, entries: u64) -> Self {
        self.toc_capacity = entries;
        self
    }

    pub fn resizable(mut self, on: bool) -> Self {
        self.resizable = on;
        self
    }

    pub fn single_file(mut self, on: bool) -> Self {
        self.single_file = on;
        self
    }

    pub fn sync(mut self, on: bool) -> Self {
        self.sync = on;
        self
    }

    pub fn checksum(mut self, on: bool) -> Self {
        self.checksum = on;
        self
    }

    pub fn stop_when_full(mut self, on: bool) -> Self {
        self.stop_when_full = on;
        self
    }

    pub fn frozen(mut self, on: bool) -> Self {
        self.frozen = on;
        self
    }

    pub fn auto_dispose(mut self, on: bool) -> Self {
        self.auto_dispose = on;
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Options from a slaw map; unknown keys are ignored
    pub fn from_slaw(slaw: &Slaw) -> Result<Self> {
        let map = slaw
            .as_map()
            .ok_or_else(|| PoolError::BadConfig(format!("options must be a map, got {}", slaw)))?;
        let mut options = Self::default();
        for (key, value) in map.pairs() {
            let Some(key) = key.as_str() else { continue };
            let bad = |e: plasma_slaw::SlawError| PoolError::BadConfig(format!("option {}: {}", key, e));
            match key {
                "type" => {
                    options.pool_type = value
                        .as_str()
                        .ok_or_else(|| PoolError::BadConfig("option type must be a string".into()))?
                        .to_string();
                }
                "size" => options.size = value.to_unt64().map_err(bad)?,
                "toc-capacity" | "index-capacity" => options.toc_capacity = value.to_unt64().map_err(bad)?,
                "resizable" => options.resizable = value.to_boolean().map_err(bad)?,
                "single-file" => options.single_file = value.to_boolean().map_err(bad)?,
                "sync" => options.sync = value.to_boolean().map_err(bad)?,
                "checksum" => options.checksum = value.to_boolean().map_err(bad)?,
                "stop-when-full" => options.stop_when_full = value.to_boolean().map_err(bad)?,
                "frozen" => options.frozen = value.to_boolean().map_err(bad)?,
                "auto-dispose" => options.auto_dispose = value.to_boolean().map_err(bad)?,
                "owner" => options.owner = Some(id_string(key, value)?),
                "group" => options.group = Some(id_string(key, value)?),
                "mode" => options.mode = Some(value.to_unt32().map_err(bad)?),
                _ => {}
            }
        }
        Ok(options)
    }

    /// Reject options that cannot describe a pool
    pub fn validate(&self) -> Result<()> {
        if self.pool_type != MMAP_POOL_TYPE {
            return Err(PoolError::BadType(self.pool_type.clone()));
        }
        ring_capacity(self.size)?;
        if self.toc_capacity > MAX_TOC_CAPACITY {
            return Err(PoolError::BadConfig(format!(
                "toc-capacity {} exceeds {}",
                self.toc_capacity, MAX_TOC_CAPACITY
            )));
        }
        if self.mode.is_some_and(|m| m > 0o7777) {
            return Err(PoolError::BadConfig(format!("mode {:o} out of range", self.mode.unwrap_or(0))));
        }
        Ok(())
    }

    /// Ring capacity in bytes, rounded up to the entry quantum
    pub fn capacity(&self) -> Result<u64> {
        ring_capacity(self.size)
    }

    /// Header flag bits these options select
    pub(crate) fn header_flags(&self) -> u64 {
        [
            (self.checksum, flags::CHECKSUM),
            (self.stop_when_full, flags::STOP_WHEN_FULL),
            (self.frozen, flags::FROZEN),
            (self.auto_dispose, flags::AUTO_DISPOSE),
            (self.sync, flags::SYNC),
            (self.resizable, flags::RESIZABLE),
            (self.single_file, flags::SINGLE_FILE),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .fold(0, |acc, (_, bit)| acc | bit)
    }
}

/// Ring bytes for a requested pool size
pub(crate) fn ring_capacity(size: u64) -> Result<u64> {
    let invalid = PoolError::InvalidSize { size, min: MIN_POOL_SIZE, max: MAX_POOL_SIZE };
    if !(MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&size) {
        return Err(invalid);
    }
    layout::round_up(size, layout::QUANTUM).ok_or(invalid)
}

fn id_string(key: &str, value: &Slaw) -> Result<String> {
    match value.as_str() {
        Some(s) => Ok(s.to_string()),
        None => value
            .to_unt64()
            .map(|id| id.to_string())
            .map_err(|e| PoolError::BadConfig(format!("option {}: {}", key, e))),
    }
}

/// Settings a live pool can change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OptionChanges {
    pub stop_when_full: Option<bool>,
    pub frozen: Option<bool>,
    pub auto_dispose: Option<bool>,
    pub checksum: Option<bool>,
}

impl OptionChanges {
    pub fn stop_when_full(mut self, on: bool) -> Self {
        self.stop_when_full = Some(on);
        self
    }

    pub fn frozen(mut self, on: bool) -> Self {
        self.frozen = Some(on);
        self
    }

    pub fn auto_dispose(mut self, on: bool) -> Self {
        self.auto_dispose = Some(on);
        self
    }

    pub fn checksum(mut self, on: bool) -> Self {
        self.checksum = Some(on);
        self
    }

    /// Changes from a slaw map; size changes are reported separately
    pub fn from_slaw(slaw: &Slaw) -> Result<(Self, Option<u64>)> {
        let map = slaw
            .as_map()
            .ok_or_else(|| PoolError::BadConfig(format!("options must be a map, got {}", slaw)))?;
        let mut changes = Self::default();
        let mut size = None;
        for (key, value) in map.pairs() {
            let Some(key) = key.as_str() else { continue };
            let flag = || {
                value
                    .to_boolean()
                    .map_err(|e| PoolError::BadConfig(format!("option {}: {}", key, e)))
            };
            match key {
                "stop-when-full" => changes.stop_when_full = Some(flag()?),
                "frozen" => changes.frozen = Some(flag()?),
                "auto-dispose" => changes.auto_dispose = Some(flag()?),
                "checksum" => changes.checksum = Some(flag()?),
                "size" => {
                    size = Some(
                        value
                            .to_unt64()
                            .map_err(|e| PoolError::BadConfig(format!("option size: {}", e)))?,
                    )
                }
                _ => {}
            }
        }
        Ok((changes, size))
    }

    /// (bits to set, bits to clear)
    pub(crate) fn flag_delta(&self) -> (u64, u64) {
        let mut set = 0;
        let mut clear = 0;
        for (change, bit) in [
            (self.stop_when_full, flags::STOP_WHEN_FULL),
            (self.frozen, flags::FROZEN),
            (self.auto_dispose, flags::AUTO_DISPOSE),
            (self.checksum, flags::CHECKSUM),
        ] {
            match change {
                Some(true) => set |= bit,
                Some(false) => clear |= bit,
                None => {}
            }
        }
        (set, clear)
    }
}
