//! Pool naming, lifecycle and on-disk layout
//!
//! Each local pool is a directory under the pools directory:
//!
//! ```text
//! <pools_dir>/<name>/
//!     pool.conf       creation options as JSON (absent for single-file pools)
//!     mmap.pool       backing file
//!     deposit.lock    writer lock
//!     notification/   one fifo per waiting hose
//! ```

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::unistd::{chown, Gid, Group, Uid, User};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::engine::{PoolEngine, DEFAULT_SPIN_LIMIT};
use crate::error::{PoolError, Result};
use crate::hose::{Hose, PoolHandle};
use crate::name::PoolAddress;
use crate::notify::NOTIFICATION_DIR;
use crate::options::PoolOptions;
use crate::region::{self, MmapRegion};

pub(crate) const POOL_FILE: &str = "mmap.pool";
pub(crate) const LOCK_FILE: &str = "deposit.lock";
pub(crate) const CONF_FILE: &str = "pool.conf";

/// Environment variable naming the pools directory
pub const POOLS_DIR_ENV: &str = "PLASMA_POOLS_DIR";

/// Settings shared by every pool operation of a [`Pools`]
#[derive(Debug, Clone)]
pub struct PoolsConfig {
    pub pools_dir: PathBuf,
    /// Reader retries while a writer is mid-publish
    pub spin_limit: u32,
    /// Used by `create` when the caller passes no options
    pub default_options: PoolOptions,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        let pools_dir = std::env::var_os(POOLS_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("plasma-pools"));
        Self::new(pools_dir)
    }
}

impl PoolsConfig {
    pub fn new(pools_dir: impl Into<PathBuf>) -> Self {
        Self {
            pools_dir: pools_dir.into(),
            spin_limit: DEFAULT_SPIN_LIMIT,
            default_options: PoolOptions::default(),
        }
    }

    pub fn spin_limit(mut self, spins: u32) -> Self {
        self.spin_limit = spins;
        self
    }

    pub fn default_options(mut self, options: PoolOptions) -> Self {
        self.default_options = options;
        self
    }
}

/// Entry point for creating, opening and removing pools
#[derive(Debug, Clone, Default)]
pub struct Pools {
    config: PoolsConfig,
}

impl Pools {
    pub fn new(config: PoolsConfig) -> Self {
        Self { config }
    }

    /// Pools under `dir` with default settings
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(PoolsConfig::new(dir))
    }

    pub fn config(&self) -> &PoolsConfig {
        &self.config
    }

    /// Check a pool name, local or remote
    pub fn validate_name(name: &str) -> Result<()> {
        PoolAddress::parse(name).map(|_| ())
    }

    fn local(&self, name: &str) -> Result<String> {
        match PoolAddress::parse(name)? {
            PoolAddress::Local(name) => Ok(name),
            remote => Err(PoolError::Unsupported(format!("no transport for remote pool {}", remote))),
        }
    }

    fn pool_dir(&self, name: &str) -> PathBuf {
        self.config.pools_dir.join(name)
    }

    /// Create a pool; `None` uses the configured default options
    #[instrument(skip(self, options))]
    pub fn create(&self, name: &str, options: Option<&PoolOptions>) -> Result<()> {
        let name = self.local(name)?;
        let options = options.unwrap_or(&self.config.default_options);
        options.validate()?;
        let ids = resolve_owner(options)?;
        let dir = self.pool_dir(&name);
        self.check_nesting(&name)?;
        if dir.join(POOL_FILE).exists() {
            return Err(PoolError::PoolExists(name));
        }
        let made = NewPoolDir::new(self, &dir);
        fs::create_dir_all(dir.join(NOTIFICATION_DIR))?;

        // format and configure under a scratch name, then link into place
        // so a concurrent participant never sees a half-made pool
        let live = dir.join(POOL_FILE);
        let scratch = dir.join(format!("{}.{}.new", POOL_FILE, Uuid::new_v4().simple()));
        let capacity = options.capacity()?;
        let len = PoolEngine::required_len(capacity, options.toc_capacity)?;
        let formatted = MmapRegion::create(&scratch, len, dir.join(LOCK_FILE)).and_then(|region| {
            let engine = PoolEngine::format(
                Arc::new(region),
                capacity,
                options.toc_capacity,
                options.header_flags(),
                self.config.spin_limit,
            )?;
            engine.flush()?;
            apply_permissions(&scratch, options.mode, ids, false)?;
            apply_permissions(&dir.join(NOTIFICATION_DIR), options.mode, ids, true)?;
            apply_permissions(&dir.join(LOCK_FILE), options.mode, ids, false)?;
            if !options.single_file {
                write_conf(&dir, options)?;
                apply_permissions(&dir.join(CONF_FILE), options.mode, ids, false)?;
            }
            fs::hard_link(&scratch, &live).map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => PoolError::PoolExists(name.clone()),
                _ => e.into(),
            })
        });
        let _ = fs::remove_file(&scratch);
        formatted?;
        made.keep();
        // last, since the mode may make the directory read-only
        apply_permissions(&dir, options.mode, ids, true)?;
        debug!(pool = %name, capacity, toc_capacity = options.toc_capacity, "created pool");
        Ok(())
    }

    /// Create a pool, first disposing any unused pool of the same name
    pub fn recreate(&self, name: &str, options: Option<&PoolOptions>) -> Result<()> {
        options.unwrap_or(&self.config.default_options).validate()?;
        match self.dispose(name) {
            Ok(()) => debug!(pool = name, "zapped existing pool"),
            Err(PoolError::NoSuchPool(_)) => {}
            Err(e) => return Err(e),
        }
        self.create(name, options)
    }

    /// A pool may not sit inside another pool's directory or contain one
    fn check_nesting(&self, name: &str) -> Result<()> {
        let mut ancestor = Path::new(name).parent();
        while let Some(p) = ancestor.filter(|p| !p.as_os_str().is_empty()) {
            if self.pool_dir(&p.to_string_lossy()).join(POOL_FILE).exists() {
                return Err(PoolError::IllegalNesting(format!("{} is inside pool {}", name, p.display())));
            }
            ancestor = p.parent();
        }
        let dir = self.pool_dir(name);
        if dir.is_dir() && !dir.join(POOL_FILE).exists() && !find_pools(&dir, &dir)?.is_empty() {
            return Err(PoolError::IllegalNesting(format!("{} would contain other pools", name)));
        }
        Ok(())
    }

    /// Open a hose positioned past the newest protein
    #[instrument(skip(self))]
    pub fn participate(&self, name: &str) -> Result<Hose> {
        let name = self.local(name)?;
        let dir = self.pool_dir(&name);
        if !dir.join(POOL_FILE).exists() {
            return Err(PoolError::NoSuchPool(name));
        }
        let handle = PoolHandle::open(&name, &dir, self.config.spin_limit)?;
        Hose::attach(Arc::new(handle))
    }

    /// Participate, creating the pool first if needed; the flag reports
    /// whether this call created it
    pub fn participate_creatingly(&self, name: &str, options: Option<&PoolOptions>) -> Result<(Hose, bool)> {
        match self.participate(name) {
            Ok(hose) => return Ok((hose, false)),
            Err(PoolError::NoSuchPool(_)) => {}
            Err(e) => return Err(e),
        }
        let created = match self.create(name, options) {
            Ok(()) => true,
            Err(PoolError::PoolExists(_)) => false,
            Err(e) => return Err(e),
        };
        Ok((self.participate(name)?, created))
    }

    /// Remove a pool nobody is attached to
    #[instrument(skip(self))]
    pub fn dispose(&self, name: &str) -> Result<()> {
        let name = self.local(name)?;
        let dir = self.pool_dir(&name);
        remove_pool_dir(&dir).map_err(|e| match e {
            PoolError::NoSuchPool(_) => PoolError::NoSuchPool(name.clone()),
            PoolError::InUse(_) => PoolError::InUse(name.clone()),
            e => e,
        })?;
        self.prune_parents(&dir);
        debug!(pool = %name, "disposed pool");
        Ok(())
    }

    /// Drop directories left empty by a hierarchical pool name
    fn prune_parents(&self, dir: &Path) {
        let mut parent = dir.parent();
        while let Some(p) = parent.filter(|p| p.starts_with(&self.config.pools_dir) && *p != self.config.pools_dir) {
            if fs::remove_dir(p).is_err() {
                break;
            }
            parent = p.parent();
        }
    }

    /// Rename a pool nobody is attached to
    #[instrument(skip(self))]
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (src, dst) = (PoolAddress::parse(from)?, PoolAddress::parse(to)?);
        match (&src, &dst) {
            (PoolAddress::Local(_), PoolAddress::Local(_)) => {}
            (PoolAddress::Remote { .. }, PoolAddress::Remote { .. }) => {
                return Err(PoolError::Unsupported(format!("no transport for remote pool {}", src)));
            }
            _ => return Err(PoolError::ImpossibleRename { from: from.to_string(), to: to.to_string() }),
        }
        let (from_dir, to_dir) = (self.pool_dir(src.name()), self.pool_dir(dst.name()));
        if dst.name().starts_with(&format!("{}/", src.name())) {
            return Err(PoolError::IllegalNesting(format!("{} is inside pool {}", to, from)));
        }
        self.check_nesting(dst.name())?;
        if to_dir.join(POOL_FILE).exists() {
            return Err(PoolError::PoolExists(to.to_string()));
        }
        let _held = region::lock_unused(from_dir.join(POOL_FILE)).map_err(|e| match e {
            PoolError::Io(io) if io.kind() == ErrorKind::NotFound => PoolError::NoSuchPool(from.to_string()),
            PoolError::InUse(_) => PoolError::InUse(from.to_string()),
            e => e,
        })?;
        if let Some(parent) = to_dir.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&from_dir, &to_dir)?;
        self.prune_parents(&from_dir);
        debug!(from, to, "renamed pool");
        Ok(())
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        let name = self.local(name)?;
        Ok(self.pool_dir(&name).join(POOL_FILE).exists())
    }

    /// Names of every pool, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let root = &self.config.pools_dir;
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = find_pools(root, root)?;
        names.sort();
        Ok(names)
    }

    /// `Err(InUse)` while any hose, in any process, is attached
    pub fn check_in_use(&self, name: &str) -> Result<()> {
        let name = self.local(name)?;
        region::check_in_use(self.pool_dir(&name).join(POOL_FILE)).map_err(|e| match e {
            PoolError::Io(io) if io.kind() == ErrorKind::NotFound => PoolError::NoSuchPool(name.clone()),
            PoolError::InUse(_) => PoolError::InUse(name.clone()),
            e => e,
        })
    }

    /// Options a pool was created with
    pub fn options(&self, name: &str) -> Result<PoolOptions> {
        let name = self.local(name)?;
        let dir = self.pool_dir(&name);
        if let Some(options) = read_conf(&dir)? {
            return Ok(options);
        }
        if !dir.join(POOL_FILE).exists() {
            return Err(PoolError::NoSuchPool(name));
        }
        // a bare handle: dropping it never withdraws from the pool
        let handle = PoolHandle::open(&name, &dir, self.config.spin_limit)?;
        let info = handle.engine()?.info(&name)?;
        Ok(PoolOptions {
            size: info.capacity,
            toc_capacity: info.toc_capacity,
            resizable: info.resizable,
            single_file: info.single_file,
            sync: info.sync,
            checksum: info.checksum,
            stop_when_full: info.stop_when_full,
            frozen: info.frozen,
            auto_dispose: info.auto_dispose,
            ..PoolOptions::default()
        })
    }
}

/// A pool directory being made by `create`; unless kept, dropping it
/// removes the directory along with any parents left empty
struct NewPoolDir<'a> {
    pools: &'a Pools,
    dir: PathBuf,
    kept: bool,
}

impl<'a> NewPoolDir<'a> {
    /// Track `dir`; one that already exists is never removed
    fn new(pools: &'a Pools, dir: &Path) -> Self {
        Self { pools, dir: dir.to_path_buf(), kept: dir.exists() }
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for NewPoolDir<'_> {
    fn drop(&mut self) {
        // a racing creator may have linked its pool in here
        if self.kept || !self.dir.is_dir() || self.dir.join(POOL_FILE).exists() {
            return;
        }
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(dir = %self.dir.display(), "removed directory of failed create"),
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "cannot remove directory of failed create"),
        }
        self.pools.prune_parents(&self.dir);
    }
}

/// Pool names below `dir`, relative to `root`; pool directories are not
/// searched further
fn find_pools(root: &Path, dir: &Path) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if path.join(POOL_FILE).exists() {
            if let Ok(rel) = path.strip_prefix(root) {
                let parts: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
                found.push(parts.join("/"));
            }
        } else {
            found.extend(find_pools(root, &path)?);
        }
    }
    Ok(found)
}

/// Remove a pool directory, holding its backing file so nothing can
/// attach meanwhile
pub(crate) fn remove_pool_dir(dir: &Path) -> Result<()> {
    let _held = region::lock_unused(dir.join(POOL_FILE)).map_err(|e| match e {
        PoolError::Io(io) if io.kind() == ErrorKind::NotFound => PoolError::NoSuchPool(dir.display().to_string()),
        e => e,
    })?;
    fs::remove_dir_all(dir)?;
    debug!(dir = %dir.display(), "removed pool directory");
    Ok(())
}

pub(crate) fn write_conf(dir: &Path, options: &PoolOptions) -> Result<()> {
    let json = serde_json::to_string_pretty(options)
        .map_err(|e| PoolError::BadConfig(format!("cannot serialize options: {}", e)))?;
    fs::write(dir.join(CONF_FILE), json)?;
    Ok(())
}

pub(crate) fn read_conf(dir: &Path) -> Result<Option<PoolOptions>> {
    match fs::read_to_string(dir.join(CONF_FILE)) {
        Ok(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| PoolError::BadConfig(format!("{}: {}", CONF_FILE, e))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Rewrite `pool.conf`, if the pool keeps one
pub(crate) fn update_conf(dir: &Path, edit: impl FnOnce(&mut PoolOptions)) -> Result<()> {
    if let Some(mut options) = read_conf(dir)? {
        edit(&mut options);
        write_conf(dir, &options)?;
    }
    Ok(())
}

fn resolve_owner(options: &PoolOptions) -> Result<(Option<Uid>, Option<Gid>)> {
    let uid = match options.owner.as_deref() {
        None => None,
        Some(owner) => Some(match owner.parse::<u32>() {
            Ok(id) => Uid::from_raw(id),
            Err(_) => User::from_name(owner)?
                .map(|u| u.uid)
                .ok_or_else(|| PoolError::BadConfig(format!("unknown owner {:?}", owner)))?,
        }),
    };
    let gid = match options.group.as_deref() {
        None => None,
        Some(group) => Some(match group.parse::<u32>() {
            Ok(id) => Gid::from_raw(id),
            Err(_) => Group::from_name(group)?
                .map(|g| g.gid)
                .ok_or_else(|| PoolError::BadConfig(format!("unknown group {:?}", group)))?,
        }),
    };
    Ok((uid, gid))
}

/// Apply the configured mode and owner; directories get search
/// permission wherever they are readable
fn apply_permissions(path: &Path, mode: Option<u32>, ids: (Option<Uid>, Option<Gid>), dir: bool) -> Result<()> {
    if let Some(mode) = mode {
        let mode = if dir { mode | ((mode & 0o444) >> 2) } else { mode };
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    if ids.0.is_some() || ids.1.is_some() {
        if let Err(e) = chown(path, ids.0, ids.1) {
            warn!(path = %path.display(), error = %e, "cannot change pool file owner");
            return Err(e.into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::PoolOptions;

    fn pools() -> (tempfile::TempDir, Pools) {
        let dir = tempfile::tempdir().unwrap();
        let pools = Pools::in_dir(dir.path());
        (dir, pools)
    }

    fn small() -> PoolOptions {
        PoolOptions::mmap().size(4096).toc_capacity(16)
    }

    #[test]
    fn test_create_and_participate() {
        let (dir, pools) = pools();
        assert!(!pools.exists("p").unwrap());
        assert!(matches!(pools.participate("p"), Err(PoolError::NoSuchPool(_))));
        pools.create("p", Some(&small())).unwrap();
        assert!(pools.exists("p").unwrap());
        assert!(dir.path().join("p").join(CONF_FILE).exists());
        assert!(dir.path().join("p").join(NOTIFICATION_DIR).is_dir());
        assert!(matches!(pools.create("p", Some(&small())), Err(PoolError::PoolExists(_))));
        let hose = pools.participate("p").unwrap();
        assert_eq!(hose.info().unwrap().capacity, 4096);
        assert_eq!(pools.options("p").unwrap(), small());
    }

    #[test]
    fn test_single_file_has_no_conf() {
        let (dir, pools) = pools();
        pools.create("solo", Some(&small().single_file(true).checksum(true))).unwrap();
        assert!(!dir.path().join("solo").join(CONF_FILE).exists());
        let options = pools.options("solo").unwrap();
        assert!(options.single_file && options.checksum);
    }

    #[test]
    fn test_options_query_keeps_auto_dispose_pool() {
        let (dir, pools) = pools();
        pools.create("solo", Some(&small().single_file(true).auto_dispose(true))).unwrap();
        let options = pools.options("solo").unwrap();
        assert!(options.auto_dispose && options.single_file);
        assert!(pools.exists("solo").unwrap());
        assert!(dir.path().join("solo").join(POOL_FILE).exists());
        pools.options("solo").unwrap();
        let hose = pools.participate("solo").unwrap();
        drop(hose);
        assert!(!pools.exists("solo").unwrap());
    }

    #[test]
    fn test_bad_options_change_nothing() {
        let (dir, pools) = pools();
        assert!(matches!(pools.create("tiny", Some(&PoolOptions::mmap().size(10))), Err(PoolError::InvalidSize { .. })));
        assert!(!dir.path().join("tiny").exists());
        assert!(matches!(pools.create("bad/.name", None), Err(PoolError::BadName { .. })));
    }

    #[test]
    fn test_oversized_options_are_rejected() {
        let (dir, pools) = pools();
        let huge_toc = PoolOptions::mmap().size(4096).toc_capacity(u64::MAX);
        assert!(matches!(pools.create("t", Some(&huge_toc)), Err(PoolError::BadConfig(_))));
        let huge_ring = PoolOptions::mmap().size(u64::MAX - 3);
        assert!(matches!(pools.create("s", Some(&huge_ring)), Err(PoolError::InvalidSize { .. })));
        assert!(matches!(pools.recreate("s", Some(&huge_ring)), Err(PoolError::InvalidSize { .. })));
        assert!(!pools.exists("t").unwrap() && !pools.exists("s").unwrap());
        assert!(!dir.path().join("t").exists() && !dir.path().join("s").exists());
        assert!(pools.list().unwrap().is_empty());
    }

    #[test]
    fn test_create_failing_after_mkdir_leaves_nothing() {
        // a pools directory deep enough that the pool directory fits in
        // PATH_MAX but its scratch backing file does not
        let tmp = tempfile::tempdir().unwrap();
        let mut root = tmp.path().to_path_buf();
        while root.as_os_str().len() < 4060 {
            let left = 4060 - root.as_os_str().len() - 1;
            root.push("d".repeat(left.clamp(1, 200)));
        }
        fs::create_dir_all(&root).unwrap();
        let pools = Pools::in_dir(&root);
        assert!(pools.create("p", Some(&small())).is_err());
        assert!(!root.join("p").exists());
        assert!(root.is_dir());
        assert!(!pools.exists("p").unwrap());
        assert!(pools.list().unwrap().is_empty());
    }

    #[test]
    fn test_failed_create_removes_its_directory() {
        let (dir, pools) = pools();
        let target = dir.path().join("deep").join("gone");
        let made = NewPoolDir::new(&pools, &target);
        fs::create_dir_all(target.join(NOTIFICATION_DIR)).unwrap();
        write_conf(&target, &small()).unwrap();
        drop(made);
        assert!(!dir.path().join("deep").exists());
        assert!(!pools.exists("deep/gone").unwrap());
        assert!(pools.list().unwrap().is_empty());

        // directories that were already there, or that hold a pool, stay
        fs::create_dir(dir.path().join("mine")).unwrap();
        drop(NewPoolDir::new(&pools, &dir.path().join("mine")));
        assert!(dir.path().join("mine").is_dir());
        let racing = NewPoolDir::new(&pools, &dir.path().join("raced"));
        pools.create("raced", Some(&small())).unwrap();
        drop(racing);
        assert!(pools.exists("raced").unwrap());

        // a create whose directory cannot be made leaves nothing either
        fs::write(dir.path().join("blocked"), b"").unwrap();
        assert!(pools.create("blocked/p", Some(&small())).is_err());
        assert!(!dir.path().join("blocked").join("p").exists());
        pools.create("gone", Some(&small())).unwrap();
        assert_eq!(pools.list().unwrap(), vec!["gone".to_string(), "raced".to_string()]);
    }

    #[test]
    fn test_nesting() {
        let (_dir, pools) = pools();
        pools.create("a/b", Some(&small())).unwrap();
        assert!(matches!(pools.create("a/b/c", Some(&small())), Err(PoolError::IllegalNesting(_))));
        assert!(matches!(pools.create("a", Some(&small())), Err(PoolError::IllegalNesting(_))));
        pools.create("a/d", Some(&small())).unwrap();
        assert_eq!(pools.list().unwrap(), vec!["a/b".to_string(), "a/d".to_string()]);
    }

    #[test]
    fn test_dispose_and_in_use() {
        let (dir, pools) = pools();
        pools.create("x/y", Some(&small())).unwrap();
        let hose = pools.participate("x/y").unwrap();
        assert!(matches!(pools.check_in_use("x/y"), Err(PoolError::InUse(_))));
        assert!(matches!(pools.dispose("x/y"), Err(PoolError::InUse(_))));
        drop(hose);
        pools.check_in_use("x/y").unwrap();
        pools.dispose("x/y").unwrap();
        assert!(!dir.path().join("x").exists());
        assert!(matches!(pools.dispose("x/y"), Err(PoolError::NoSuchPool(_))));
    }

    #[test]
    fn test_rename() {
        let (_dir, pools) = pools();
        pools.create("old", Some(&small())).unwrap();
        pools.create("taken", Some(&small())).unwrap();
        assert!(matches!(pools.rename("old", "taken"), Err(PoolError::PoolExists(_))));
        assert!(matches!(pools.rename("old", "tcp://host/new"), Err(PoolError::ImpossibleRename { .. })));
        {
            let _hose = pools.participate("old").unwrap();
            assert!(matches!(pools.rename("old", "new"), Err(PoolError::InUse(_))));
        }
        pools.rename("old", "deep/new").unwrap();
        assert!(!pools.exists("old").unwrap());
        assert!(pools.exists("deep/new").unwrap());
        assert!(matches!(pools.rename("missing", "other"), Err(PoolError::NoSuchPool(_))));
    }

    #[test]
    fn test_remote_names_unsupported() {
        let (_dir, pools) = pools();
        Pools::validate_name("tcp://example.com:1234/p").unwrap();
        assert!(matches!(pools.participate("tcp://example.com/p"), Err(PoolError::Unsupported(_))));
        assert!(matches!(pools.create("tcp://example.com/p", None), Err(PoolError::Unsupported(_))));
    }

    #[test]
    fn test_participate_creatingly() {
        let (_dir, pools) = pools();
        let (_a, created) = pools.participate_creatingly("pc", Some(&small())).unwrap();
        assert!(created);
        let (_b, created) = pools.participate_creatingly("pc", Some(&small())).unwrap();
        assert!(!created);
    }

    #[test]
    fn test_recreate_replaces_unused_pool() {
        let (_dir, pools) = pools();
        pools.create("z", Some(&small())).unwrap();
        pools.participate("z").unwrap().deposit(&plasma_slaw::Protein::default()).unwrap();
        pools.recreate("z", Some(&small().size(8192))).unwrap();
        let hose = pools.participate("z").unwrap();
        assert_eq!(hose.info().unwrap().capacity, 8192);
        assert!(matches!(hose.newest_index(), Err(PoolError::NoSuchProtein)));
        assert!(matches!(pools.recreate("z", None), Err(PoolError::InUse(_))));
        drop(hose);
        pools.recreate("fresh", None).unwrap();
        assert!(pools.exists("fresh").unwrap());
    }

    #[test]
    fn test_default_config_reads_env() {
        let config = PoolsConfig::new("/tmp/somewhere").spin_limit(5);
        assert_eq!(config.spin_limit, 5);
        assert_eq!(config.pools_dir, PathBuf::from("/tmp/somewhere"));
        assert_eq!(config.default_options, PoolOptions::default());
    }
}
