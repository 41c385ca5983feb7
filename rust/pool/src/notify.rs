//! Deposit notification over named pipes
//!
//! Every hose that may block registers a fifo under the pool's
//! `notification/` directory. A deposit writes `d` to each of them and a
//! wakeup writes `w` to one; waiters poll their fifo's read end. The
//! waiter also keeps a write end open so the fifo never reports hangup
//! while no depositor has it open.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::Result;

pub(crate) const NOTIFICATION_DIR: &str = "notification";
const DEPOSIT_BYTE: u8 = b'd';
const WAKE_BYTE: u8 = b'w';

/// What a drained fifo had been told
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Drained {
    pub deposited: bool,
    pub woken: bool,
}

fn open_write_nonblocking(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).custom_flags(libc::O_NONBLOCK).open(path)
}

/// Send one byte; a full pipe already has a wakeup pending
fn poke(mut file: &File, byte: u8) -> std::io::Result<()> {
    match file.write(&[byte]) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(e),
    }
}

fn drain_fd(mut file: &File) -> std::io::Result<Drained> {
    let mut drained = Drained::default();
    let mut buf = [0u8; 64];
    loop {
        match file.read(&mut buf) {
            Ok(0) => return Ok(drained),
            Ok(n) => {
                for b in &buf[..n] {
                    match *b {
                        DEPOSIT_BYTE => drained.deposited = true,
                        WAKE_BYTE => drained.woken = true,
                        _ => {}
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(drained),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Block until one of `fds` is readable or `deadline` passes; false on
/// timeout
pub(crate) fn wait_readable(fds: &[RawFd], deadline: Option<Instant>) -> Result<bool> {
    let mut polled: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd { fd, events: libc::POLLIN, revents: 0 })
        .collect();
    loop {
        let timeout_ms = match deadline {
            None => -1,
            Some(d) => {
                let left = d.saturating_duration_since(Instant::now());
                // round up so a sub-millisecond remainder still sleeps
                left.as_micros().div_ceil(1000).min(i32::MAX as u128) as libc::c_int
            }
        };
        let n = unsafe { libc::poll(polled.as_mut_ptr(), polled.len() as libc::nfds_t, timeout_ms) };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }
        if n > 0 {
            return Ok(true);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(false);
        }
    }
}

/// A hose's registered fifo
pub(crate) struct Waiter {
    path: PathBuf,
    reader: File,
    _writer: File,
    enabled: Arc<AtomicBool>,
}

impl Waiter {
    /// Make and open a fresh fifo in `pool_dir`'s notification directory
    pub fn register(pool_dir: &Path) -> Result<Self> {
        let dir = pool_dir.join(NOTIFICATION_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.fifo", Uuid::new_v4().simple()));
        mkfifo(&path, Mode::from_bits_truncate(0o666))?;
        let reader = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)?;
        let writer = open_write_nonblocking(&path)?;
        debug!(fifo = %path.display(), "registered notification fifo");
        Ok(Self { path, reader, _writer: writer, enabled: Arc::new(AtomicBool::new(false)) })
    }

    pub fn fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    pub fn drain(&self) -> Result<Drained> {
        Ok(drain_fd(&self.reader)?)
    }

    /// Let wakers reach this fifo
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn waker(&self) -> Waker {
        Waker { path: self.path.clone(), enabled: Arc::clone(&self.enabled) }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.enabled.store(false, Ordering::Release);
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(fifo = %self.path.display(), error = %e, "failed to remove notification fifo");
            }
        }
    }
}

/// Interrupts a hose's wait from any thread
#[derive(Debug, Clone)]
pub struct Waker {
    path: PathBuf,
    enabled: Arc<AtomicBool>,
}

impl Waker {
    /// Wake the hose's current or next wait; a no-op unless the hose
    /// enabled wakeup, and once it has gone away
    pub fn wake(&self) -> Result<()> {
        if !self.enabled.load(Ordering::Acquire) {
            return Ok(());
        }
        match open_write_nonblocking(&self.path) {
            Ok(f) => Ok(poke(&f, WAKE_BYTE)?),
            Err(e) if e.kind() == ErrorKind::NotFound || e.raw_os_error() == Some(libc::ENXIO) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Tell every waiter on the pool at `pool_dir` that a deposit happened
pub(crate) fn notify_all(pool_dir: &Path) -> Result<()> {
    let dir = pool_dir.join(NOTIFICATION_DIR);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        match open_write_nonblocking(&path) {
            Ok(f) => {
                if let Err(e) = poke(&f, DEPOSIT_BYTE) {
                    warn!(fifo = %path.display(), error = %e, "failed to notify waiter");
                }
                trace!(fifo = %path.display(), "notified");
            }
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                // nobody holds the read end: its hose died without cleanup
                warn!(fifo = %path.display(), "removing stale notification fifo");
                let _ = fs::remove_file(&path);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(fifo = %path.display(), error = %e, "cannot open notification fifo"),
        }
    }
    Ok(())
}

/// In-process wakeup channel for a gang
pub(crate) struct WakePipe {
    reader: std::os::unix::net::UnixStream,
    writer: Arc<std::os::unix::net::UnixStream>,
}

impl WakePipe {
    pub fn new() -> Result<Self> {
        let (reader, writer) = std::os::unix::net::UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self { reader, writer: Arc::new(writer) })
    }

    pub fn fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    /// True if a wakeup was pending
    pub fn drain(&self) -> Result<bool> {
        let mut woken = false;
        let mut buf = [0u8; 64];
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => return Ok(woken),
                Ok(_) => woken = true,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(woken),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn sender(&self) -> Arc<std::os::unix::net::UnixStream> {
        Arc::clone(&self.writer)
    }
}

pub(crate) fn send_wake(writer: &std::os::unix::net::UnixStream) -> Result<()> {
    match (&*writer).write(&[WAKE_BYTE]) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_deposit_notifies_registered_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let waiter = Waiter::register(dir.path()).unwrap();
        assert_eq!(waiter.drain().unwrap(), Drained::default());
        notify_all(dir.path()).unwrap();
        assert!(wait_readable(&[waiter.fd()], Some(Instant::now())).unwrap());
        assert_eq!(waiter.drain().unwrap(), Drained { deposited: true, woken: false });
        assert!(!wait_readable(&[waiter.fd()], Some(Instant::now() + Duration::from_millis(10))).unwrap());
    }

    #[test]
    fn test_waker() {
        let dir = tempfile::tempdir().unwrap();
        let waiter = Waiter::register(dir.path()).unwrap();
        let waker = waiter.waker();
        waker.wake().unwrap();
        assert!(!waiter.drain().unwrap().woken);
        waiter.enable();
        waker.wake().unwrap();
        assert!(waiter.drain().unwrap().woken);
        let path = waiter.path.clone();
        drop(waiter);
        assert!(!path.exists());
        waker.wake().unwrap();
    }

    #[test]
    fn test_stale_fifo_removed() {
        let dir = tempfile::tempdir().unwrap();
        let notif = dir.path().join(NOTIFICATION_DIR);
        fs::create_dir_all(&notif).unwrap();
        let stale = notif.join("dead.fifo");
        mkfifo(&stale, Mode::from_bits_truncate(0o600)).unwrap();
        notify_all(dir.path()).unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_wake_pipe() {
        let pipe = WakePipe::new().unwrap();
        assert!(!pipe.drain().unwrap());
        send_wake(&pipe.sender()).unwrap();
        assert!(wait_readable(&[pipe.fd()], None).unwrap());
        assert!(pipe.drain().unwrap());
    }
}
