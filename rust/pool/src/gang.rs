//! Waiting on several hoses at once

use std::os::unix::net::UnixStream;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Awaited, PoolError, Result, Timeout};
use crate::hose::{Hose, Retrieved};
use crate::notify::{self, WakePipe};

/// A hose that can sit in a gang while its owner keeps using it
pub type SharedHose = Arc<Mutex<Hose>>;

/// Stable handle to a gang member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberId {
    slot: usize,
    generation: u64,
}

struct Slot {
    generation: u64,
    hose: Option<SharedHose>,
}

/// A set of hoses waited on together
///
/// Members live in slots addressed by [`MemberId`]; a wait works from a
/// snapshot of the members, so joining or leaving from another thread is
/// safe but only affects the next wait.
pub struct Gang {
    slots: Mutex<Vec<Slot>>,
    wake: WakePipe,
}

impl Gang {
    pub fn new() -> Result<Self> {
        Ok(Self { slots: Mutex::new(Vec::new()), wake: WakePipe::new()? })
    }

    /// Add `hose`; a hose can belong to a gang only once
    pub fn join(&self, hose: SharedHose) -> Result<MemberId> {
        let mut slots = self.slots.lock();
        if slots
            .iter()
            .any(|s| s.hose.as_ref().is_some_and(|h| Arc::ptr_eq(h, &hose)))
        {
            return Err(PoolError::AlreadyGangMember);
        }
        let id = match slots.iter().position(|s| s.hose.is_none()) {
            Some(slot) => {
                let s = &mut slots[slot];
                s.generation += 1;
                s.hose = Some(hose);
                MemberId { slot, generation: s.generation }
            }
            None => {
                slots.push(Slot { generation: 0, hose: Some(hose) });
                MemberId { slot: slots.len() - 1, generation: 0 }
            }
        };
        debug!(?id, "hose joined gang");
        Ok(id)
    }

    /// Remove a member, handing its hose back
    pub fn leave(&self, id: MemberId) -> Result<SharedHose> {
        let mut slots = self.slots.lock();
        let hose = slots
            .get_mut(id.slot)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.hose.take())
            .ok_or(PoolError::NotAGangMember)?;
        debug!(?id, "hose left gang");
        Ok(hose)
    }

    pub fn member(&self, id: MemberId) -> Option<SharedHose> {
        let slots = self.slots.lock();
        slots
            .get(id.slot)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.hose.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.hose.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<(MemberId, SharedHose)> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| {
                s.hose
                    .as_ref()
                    .map(|h| (MemberId { slot, generation: s.generation }, Arc::clone(h)))
            })
            .collect()
    }

    /// Read the next protein from whichever member has one first
    ///
    /// Data wins over a wakeup: when both are pending the protein is
    /// returned and the wakeup is left for the next wait.
    pub fn await_next_multi(&self, timeout: Timeout) -> Result<Awaited<(MemberId, Retrieved)>> {
        let members = self.snapshot();
        if members.is_empty() {
            return Err(PoolError::EmptyGang);
        }
        let deadline = timeout.deadline();
        loop {
            let gang_woken = self.wake.drain()?;
            let mut woken_members = Vec::new();
            let mut fds = vec![self.wake.fd()];
            let mut ready = None;
            for (id, shared) in &members {
                let mut hose = shared.lock();
                let (fd, drained) = hose.drain_notifications()?;
                if drained.woken {
                    woken_members.push(shared);
                }
                fds.push(fd);
                match hose.next() {
                    Ok(r) => {
                        trace!(?id, index = r.index, "gang member ready");
                        ready = Some((*id, r));
                        break;
                    }
                    Err(PoolError::NoSuchProtein) => {}
                    Err(e) => return Err(e),
                }
            }
            if let Some(ready) = ready {
                if gang_woken {
                    self.wake_up()?;
                }
                for shared in woken_members {
                    shared.lock().wake_up()?;
                }
                return Ok(Awaited::Ready(ready));
            }
            if gang_woken || !woken_members.is_empty() {
                return Ok(Awaited::Woken);
            }
            if timeout == Timeout::NoWait || !notify::wait_readable(&fds, deadline)? {
                return Ok(Awaited::TimedOut);
            }
        }
    }

    /// Interrupt the current or next [`Gang::await_next_multi`]; a wait
    /// that finds a protein ready returns it and keeps the wakeup pending
    pub fn wake_up(&self) -> Result<()> {
        notify::send_wake(&self.wake.sender())
    }

    /// A handle that wakes this gang from another thread
    pub fn waker(&self) -> GangWaker {
        GangWaker { sender: self.wake.sender() }
    }
}

/// Cross-thread wakeup for a [`Gang`]
#[derive(Clone)]
pub struct GangWaker {
    sender: Arc<UnixStream>,
}

impl GangWaker {
    pub fn wake(&self) -> Result<()> {
        notify::send_wake(&self.sender)
    }
}

impl std::fmt::Debug for GangWaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GangWaker").finish_non_exhaustive()
    }
}
