//! # Fault Monitor
//!
//! Reacts to bus errors reported by the host without tearing the device
//! down.
//!
//! ```text
//! Normal ──error_detected──▶ Errored ──acknowledge (session write)──▶ Normal
//! ```
//!
//! While errored, register reads are suppressed, interrupts are acknowledged
//! but not counted, and every session that asked for asynchronous
//! notification receives one `SIGIO` per transition. The monitor never asks
//! the host for a link reset; recovery is an operator decision.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{AsicError, AsicResult};
use crate::host::{ChannelState, ErsResult};

/// Signal number type, POSIX numbering.
pub type Signal = u8;

/// I/O possible; sent on fault transitions.
pub const SIGIO: Signal = 29;

/// Receiver of asynchronous fault notifications for one session.
pub trait FaultSignal: Send + Sync {
    /// Queues `signal` to the owning process. Must not block.
    fn deliver(&self, signal: Signal);
}

/// Sticky bus-error flag plus recovery bookkeeping.
#[derive(Debug, Default)]
pub struct FaultMonitor {
    errored: AtomicBool,
    transitions: AtomicU64,
}

impl FaultMonitor {
    pub const fn new() -> Self {
        Self {
            errored: AtomicBool::new(false),
            transitions: AtomicU64::new(0),
        }
    }

    /// True while register access is unsafe.
    #[inline]
    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    /// Fails with [`AsicError::Faulted`] while errored.
    #[inline]
    pub fn check(&self) -> AsicResult<()> {
        if self.is_errored() {
            Err(AsicError::Faulted)
        } else {
            Ok(())
        }
    }

    /// Number of Normal → Errored transitions seen.
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    /// Host reported a bus error.
    ///
    /// Returns the verdict for the host and whether this call moved the
    /// monitor out of Normal; only that edge fans out notifications.
    pub fn error_detected(&self, state: ChannelState) -> (ErsResult, bool) {
        let entered = !self.errored.swap(true, Ordering::AcqRel);
        if entered {
            self.transitions.fetch_add(1, Ordering::Relaxed);
            log::error!("[asic] bus error detected ({:?}), device access frozen", state);
        } else {
            log::warn!("[asic] bus error detected ({:?}) while already errored", state);
        }

        let verdict = match state {
            ChannelState::PermanentFailure => ErsResult::Disconnect,
            ChannelState::Normal | ChannelState::Frozen => ErsResult::CanRecover,
        };
        (verdict, entered)
    }

    /// Host re-enabled MMIO. The flag stays set until acknowledged.
    pub fn mmio_enabled(&self) -> ErsResult {
        log::info!("[asic] mmio re-enabled, awaiting acknowledgment");
        ErsResult::Recovered
    }

    /// Host reset the slot. The flag stays set until acknowledged.
    pub fn slot_reset(&self) -> ErsResult {
        log::info!("[asic] slot reset by host, awaiting acknowledgment");
        ErsResult::Recovered
    }

    /// Host finished recovery.
    pub fn resume(&self) {
        log::info!("[asic] host recovery complete, errored={}", self.is_errored());
    }

    /// Operator acknowledged the fault. Returns true if it was set.
    pub fn acknowledge(&self) -> bool {
        let was = self.errored.swap(false, Ordering::AcqRel);
        if was {
            log::info!("[asic] fault acknowledged, resuming device access");
        }
        was
    }
}
