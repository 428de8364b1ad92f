//! # Wait Queue
//!
//! The single suspension point of S-ASIC: a session waiting for counter
//! movement. Wakers (interrupt handler, fault monitor, detach) only bump a
//! sequence number, so waking never blocks and never allocates.
//!
//! How a task actually sleeps belongs to the host scheduler and is supplied
//! through [`WaitContext`].

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::error::{AsicError, AsicResult};

/// Wake sequence shared by one device's waiters.
#[derive(Debug, Default)]
pub struct WaitQueue {
    seq: AtomicU32,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
        }
    }

    /// Takes a ticket. Must happen before the condition is checked.
    #[inline]
    pub fn prepare(&self) -> u32 {
        self.seq.load(Ordering::Acquire)
    }

    /// True once anything woke the queue after `ticket` was taken.
    #[inline]
    pub fn changed_since(&self, ticket: u32) -> bool {
        self.seq.load(Ordering::Acquire) != ticket
    }

    /// Wakes every waiter. Safe from interrupt context.
    #[inline]
    pub fn wake_all(&self) {
        self.seq.fetch_add(1, Ordering::Release);
    }
}

/// Scheduler services for the calling task.
pub trait WaitContext {
    /// True when the task has a signal to handle.
    fn signal_pending(&self) -> bool;

    /// Suspends until `queue` moves past `ticket` or a signal arrives.
    /// Spurious returns are allowed.
    fn wait(&self, queue: &WaitQueue, ticket: u32);
}

/// Busy-waiting context for hosts without a scheduler hook.
#[derive(Debug)]
pub struct SpinWait<'a> {
    cancel: &'a AtomicBool,
}

impl<'a> SpinWait<'a> {
    /// `cancel` plays the role of the task's pending-signal bit.
    pub fn new(cancel: &'a AtomicBool) -> Self {
        Self { cancel }
    }
}

impl WaitContext for SpinWait<'_> {
    fn signal_pending(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn wait(&self, queue: &WaitQueue, ticket: u32) {
        while !queue.changed_since(ticket) && !self.signal_pending() {
            core::hint::spin_loop();
        }
    }
}

/// Sleeps on `queue` until `poll` yields a result.
///
/// `poll` is re-evaluated after every wake. A pending signal ends the wait
/// with [`AsicError::Interrupted`].
pub fn wait_event<T, F>(queue: &WaitQueue, ctx: &dyn WaitContext, mut poll: F) -> AsicResult<T>
where
    F: FnMut() -> Option<AsicResult<T>>,
{
    loop {
        let ticket = queue.prepare();
        if let Some(result) = poll() {
            return result;
        }
        if ctx.signal_pending() {
            return Err(AsicError::Interrupted);
        }
        ctx.wait(queue, ticket);
    }
}
