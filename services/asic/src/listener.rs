//! # Listener Registry & Sessions
//!
//! Every open of a device gets a [`Session`] holding its own snapshot of the
//! counters it has already reported. The device keeps a bounded
//! [`ListenerList`] of sessions so detach and fault fan-out can reach them.
//!
//! ## Read protocol
//!
//! A read returns `4 × slots` bytes of native-endian `u32`, one per vector.
//! Slots whose counter moved since the session last looked carry the live
//! counter value; unchanged slots are written as 0. A read with any other
//! length is refused before anything else happens.
//!
//! ## Locking
//!
//! The list lock guards membership only. Counter snapshots and comparisons
//! are lock-free atomic reads.

use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;

use bitflags::bitflags;
use spin::Mutex;

use crate::arena::{SlotArena, SlotId};
use crate::bridge;
use crate::control;
use crate::device::Device;
use crate::error::{AsicError, AsicResult};
use crate::fault::{FaultSignal, Signal};
use crate::host::UserMapping;
use crate::wait::{wait_event, WaitContext};

bitflags! {
    /// Per-call read behaviour.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReadFlags: u32 {
        /// Return `WouldBlock` instead of sleeping
        const NONBLOCK = 1 << 0;
    }
}

/// Size of a session write.
pub const WRITE_LEN: usize = core::mem::size_of::<i32>();

// =============================================================================
// LISTENER LIST
// =============================================================================

/// Back-reference the device keeps for each open session.
struct ListenerEntry {
    fasync: Option<Arc<dyn FaultSignal>>,
}

struct ListenerTable {
    arena: SlotArena<ListenerEntry>,
    /// Set by detach; no new members afterwards
    closed: bool,
}

/// Bounded, lock-guarded set of a device's open sessions.
pub struct ListenerList {
    inner: Mutex<ListenerTable>,
}

impl core::fmt::Debug for ListenerList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ListenerList").field("len", &self.len()).finish()
    }
}

impl ListenerList {
    /// Creates a list with room for `capacity` sessions.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(ListenerTable {
                arena: SlotArena::with_capacity(capacity),
                closed: false,
            }),
        }
    }

    /// Open sessions.
    pub fn len(&self) -> usize {
        self.inner.lock().arena.len()
    }

    /// True with no open sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add(&self) -> AsicResult<SlotId> {
        let mut table = self.inner.lock();
        if table.closed {
            return Err(AsicError::NoDevice);
        }
        table
            .arena
            .insert(ListenerEntry { fasync: None })
            .map_err(|_| AsicError::TooManySessions)
    }

    fn remove(&self, id: SlotId) -> bool {
        self.inner.lock().arena.remove(id).is_some()
    }

    fn set_fasync(&self, id: SlotId, sink: Option<Arc<dyn FaultSignal>>) -> AsicResult<()> {
        let mut table = self.inner.lock();
        let entry = table.arena.get_mut(id).ok_or(AsicError::NoDevice)?;
        entry.fasync = sink;
        Ok(())
    }

    /// Sends `signal` once to every session that registered for it.
    ///
    /// Sinks are collected under the lock and signalled after it is dropped.
    pub fn notify_all(&self, signal: Signal) -> usize {
        let sinks: Vec<Arc<dyn FaultSignal>> = {
            let table = self.inner.lock();
            table
                .arena
                .iter()
                .filter_map(|(_, entry)| entry.fasync.clone())
                .collect()
        };
        for sink in &sinks {
            sink.deliver(signal);
        }
        sinks.len()
    }

    /// Invalidates every session; returns how many there were.
    pub fn detach_all(&self) -> usize {
        let mut table = self.inner.lock();
        table.closed = true;
        table.arena.drain().len()
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// One open of a device.
///
/// Dropping the session closes it. Closing after the device went away is a
/// no-op.
pub struct Session {
    device: Weak<Device>,
    id: SlotId,
    minor: u16,
    last_seen: Vec<u32>,
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("minor", &self.minor)
            .field("slot", &self.id.index())
            .field("last_seen", &self.last_seen)
            .finish()
    }
}

impl Session {
    /// Opens a session, baselining it at the current counter values.
    pub fn open(device: &Arc<Device>) -> AsicResult<Self> {
        device.check_present()?;
        let last_seen = device.counters.snapshot();
        let id = device.listeners.add()?;

        #[cfg(feature = "debug")]
        log::debug!("[asic{}] session {} opened", device.minor(), id.index());

        Ok(Self {
            device: Arc::downgrade(device),
            id,
            minor: device.minor(),
            last_seen,
        })
    }

    /// Minor number of the device this session was opened on.
    pub fn minor(&self) -> u16 {
        self.minor
    }

    /// Counter values this session has already reported.
    pub fn last_seen(&self) -> &[u32] {
        &self.last_seen
    }

    /// The device, if it is still attached.
    pub(crate) fn device(&self) -> AsicResult<Arc<Device>> {
        let device = self.device.upgrade().ok_or(AsicError::NoDevice)?;
        device.check_present()?;
        Ok(device)
    }

    /// Compares every slot against the live counters.
    ///
    /// Moved slots report the live value and advance `last_seen`; the rest
    /// report 0. Returns true if anything moved.
    fn collect(&mut self, device: &Device, out: &mut [u32]) -> bool {
        let mut moved = false;
        for (i, slot) in out.iter_mut().enumerate() {
            let live = device.counters.load(i).unwrap_or(0);
            if live != self.last_seen[i] {
                self.last_seen[i] = live;
                *slot = live;
                moved = true;
            } else {
                *slot = 0;
            }
        }
        moved
    }

    /// Waits for counter movement and reports it into `out`.
    ///
    /// `out` must hold exactly one entry per counter slot. A wait cut short
    /// by a fault fails with [`AsicError::Faulted`] (EIO); one cut short by
    /// detach fails with [`AsicError::NoDevice`] (ENODEV), the same answer
    /// every other operation on a detached device gives.
    pub fn read_counters(
        &mut self,
        out: &mut [u32],
        flags: ReadFlags,
        ctx: &dyn WaitContext,
    ) -> AsicResult<usize> {
        let device = self.device.upgrade().ok_or(AsicError::NoDevice)?;
        let slots = device.negotiation.counter_slots();
        if out.len() != slots {
            return Err(AsicError::BadLength {
                expected: slots,
                actual: out.len(),
            });
        }
        device.check_usable()?;

        wait_event(&device.waitq, ctx, || {
            if !device.is_present() {
                return Some(Err(AsicError::NoDevice));
            }
            if device.fault.is_errored() {
                return Some(Err(AsicError::Faulted));
            }
            if self.collect(&device, out) {
                Some(Ok(slots))
            } else if flags.contains(ReadFlags::NONBLOCK) {
                Some(Err(AsicError::WouldBlock))
            } else {
                None
            }
        })
    }

    /// Byte-level read: `buf` must be exactly [`Device::read_len`] bytes.
    pub fn read(
        &mut self,
        buf: &mut [u8],
        flags: ReadFlags,
        ctx: &dyn WaitContext,
    ) -> AsicResult<usize> {
        let device = self.device.upgrade().ok_or(AsicError::NoDevice)?;
        let expected = device.read_len();
        if buf.len() != expected {
            return Err(AsicError::BadLength {
                expected,
                actual: buf.len(),
            });
        }
        drop(device);

        let mut counters = vec![0u32; expected / 4];
        self.read_counters(&mut counters, flags, ctx)?;
        for (chunk, value) in buf.chunks_exact_mut(4).zip(counters.iter()) {
            chunk.copy_from_slice(&value.to_ne_bytes());
        }
        Ok(expected)
    }

    /// Writes the interrupt enable level: 0 disables, anything else enables.
    ///
    /// A successful write also acknowledges an outstanding fault.
    pub fn write(&mut self, buf: &[u8]) -> AsicResult<usize> {
        let raw: [u8; WRITE_LEN] = buf.try_into().map_err(|_| AsicError::BadLength {
            expected: WRITE_LEN,
            actual: buf.len(),
        })?;
        let value = i32::from_ne_bytes(raw);
        let device = self.device()?;

        device.fault.acknowledge();
        bridge::apply_irq_level(&device, value != 0);
        Ok(WRITE_LEN)
    }

    /// Maps the window selected by `mapping.pgoff` into the caller.
    pub fn mmap(&self, mapping: &UserMapping) -> AsicResult<()> {
        bridge::map_window(&*self.device()?, mapping)
    }

    /// Executes one control request; see [`control`].
    pub fn ioctl(&mut self, cmd: u32, payload: &mut [u8]) -> AsicResult<usize> {
        control::dispatch(&*self.device()?, cmd, payload)
    }

    /// Registers or clears this session's fault notification sink.
    pub fn set_fasync(&mut self, sink: Option<Arc<dyn FaultSignal>>) -> AsicResult<()> {
        self.device()?.listeners.set_fasync(self.id, sink)
    }

    /// Closes the session explicitly.
    pub fn close(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(device) = self.device.upgrade() {
            if device.listeners.remove(self.id) {
                #[cfg(feature = "debug")]
                log::debug!("[asic{}] session {} closed", self.minor, self.id.index());
            }
        }
    }
}
