//! # ASIC Device Record
//!
//! One attached PCI function: its windows, its negotiated interrupt mode,
//! the counter bank the interrupt handler feeds, the open sessions and the
//! fault flag.
//!
//! ## Execution contexts
//!
//! - [`Device::handle_interrupt`] runs in interrupt context. It only touches
//!   atomics, the host's INTx check and a `try_read` of the packet consumer
//!   slot; it never sleeps and never takes a blocking lock.
//! - Everything else runs in the context of a calling task. The only place a
//!   task may suspend is a session read.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use spin::RwLock;

use crate::config::{AsicConfig, DeviceProfile};
use crate::counters::EventCounterBank;
use crate::error::{AsicError, AsicResult};
use crate::fault::{FaultMonitor, SIGIO};
use crate::host::{ChannelState, ErsResult, IrqReturn, PciHost};
use crate::listener::ListenerList;
use crate::negotiate::{negotiate, InterruptMode, Negotiation};
use crate::resource::ResourceTable;
use crate::wait::WaitQueue;

/// Sentinel for "no packet vector configured".
const NO_VECTOR: u32 = u32::MAX;

/// In-kernel packet engine that wants one vector delivered directly.
pub trait PacketConsumer: Send + Sync {
    /// Called from interrupt context for the configured vector.
    fn on_interrupt(&self, vector: u16);
}

/// Per-device interrupt statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Interrupts counted into the bank
    pub accepted: u64,
    /// Shared-line interrupts raised by someone else
    pub not_ours: u64,
    /// Interrupts acknowledged while errored
    pub ignored_errored: u64,
    /// Deliveries to the packet consumer
    pub packet_deliveries: u64,
    /// Normal → Errored transitions
    pub faults: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    accepted: AtomicU64,
    not_ours: AtomicU64,
    ignored_errored: AtomicU64,
    packet_deliveries: AtomicU64,
}

/// Summary returned by the device info query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Minor number
    pub minor: u16,
    /// Family constants
    pub profile: DeviceProfile,
    /// Negotiated mode
    pub mode: InterruptMode,
    /// Bound vectors
    pub vectors: u16,
    /// DMA addressing width in bits
    pub dma_bits: u8,
    /// Windows with memory behind them
    pub windows: usize,
    /// Open sessions
    pub sessions: usize,
    /// Fault flag
    pub errored: bool,
}

/// An attached ASIC.
pub struct Device {
    minor: u16,
    profile: DeviceProfile,
    dma_bits: u8,
    pub(crate) host: Arc<dyn PciHost>,
    pub(crate) resources: RwLock<ResourceTable>,
    pub(crate) negotiation: Negotiation,
    pub(crate) counters: EventCounterBank,
    pub(crate) listeners: ListenerList,
    pub(crate) waitq: WaitQueue,
    pub(crate) fault: FaultMonitor,
    present: AtomicBool,
    pub(crate) irq_enabled: AtomicBool,
    packet_vector: AtomicU32,
    packet_consumer: RwLock<Option<Arc<dyn PacketConsumer>>>,
    stats: StatCounters,
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("minor", &self.minor)
            .field("profile", &self.profile.name)
            .field("mode", &self.negotiation.mode)
            .field("vectors", &self.negotiation.vectors)
            .field("present", &self.is_present())
            .field("errored", &self.fault.is_errored())
            .finish()
    }
}

impl Device {
    /// Brings a freshly enumerated function under S-ASIC control.
    ///
    /// Windows are reserved first, then the interrupt mode is negotiated.
    /// Failing to get any interrupt mode is not fatal.
    pub fn attach(
        minor: u16,
        host: Arc<dyn PciHost>,
        profile: DeviceProfile,
        config: &AsicConfig,
    ) -> AsicResult<Arc<Self>> {
        if !profile.is_valid() {
            return Err(AsicError::InvalidArgument);
        }

        let dma_bits = if host.set_dma_mask(config.dma_mask_bits).is_ok() {
            config.dma_mask_bits
        } else if host.set_dma_mask(32).is_ok() {
            log::warn!("[asic{}] falling back to 32-bit DMA", minor);
            32
        } else {
            log::error!("[asic{}] no usable DMA mask", minor);
            return Err(AsicError::ResourceUnavailable);
        };

        let resources = ResourceTable::populate(host.as_ref(), profile.name)?;
        let negotiation = negotiate(host.as_ref(), &profile, config.irq_mode.allowed());
        let counters = EventCounterBank::new(negotiation.counter_slots());

        log::info!(
            "[asic{}] {} attached: {} window(s), irq {} x{}, dma {}-bit",
            minor,
            profile.name,
            resources.populated(),
            negotiation.mode.name(),
            negotiation.vectors,
            dma_bits
        );

        Ok(Arc::new(Self {
            minor,
            profile,
            dma_bits,
            host,
            resources: RwLock::new(resources),
            negotiation,
            counters,
            listeners: ListenerList::new(config.max_sessions),
            waitq: WaitQueue::new(),
            fault: FaultMonitor::new(),
            present: AtomicBool::new(true),
            irq_enabled: AtomicBool::new(true),
            packet_vector: AtomicU32::new(NO_VECTOR),
            packet_consumer: RwLock::new(None),
            stats: StatCounters::default(),
        }))
    }

    /// Tears the device down: sessions first, then vectors and windows.
    ///
    /// Blocked readers wake with [`AsicError::NoDevice`]; later session
    /// operations fail the same way and closing them is a no-op.
    pub fn detach(&self) {
        if !self.present.swap(false, Ordering::AcqRel) {
            return;
        }

        self.waitq.wake_all();
        let dropped = self.listeners.detach_all();
        *self.packet_consumer.write() = None;

        let mut negotiation = self.negotiation;
        negotiation.release(self.host.as_ref());
        self.resources.write().release(self.host.as_ref());

        log::info!("[asic{}] detached, {} session(s) invalidated", self.minor, dropped);
    }

    /// Minor number.
    pub fn minor(&self) -> u16 {
        self.minor
    }

    /// Family constants.
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// True until [`Device::detach`].
    #[inline]
    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    /// Fails with [`AsicError::NoDevice`] after detach.
    #[inline]
    pub(crate) fn check_present(&self) -> AsicResult<()> {
        if self.is_present() {
            Ok(())
        } else {
            Err(AsicError::NoDevice)
        }
    }

    /// Present and not errored; the gate for every data-path operation.
    #[inline]
    pub(crate) fn check_usable(&self) -> AsicResult<()> {
        self.check_present()?;
        self.fault.check()
    }

    /// Negotiated mode and vector count.
    pub fn negotiation(&self) -> Negotiation {
        self.negotiation
    }

    /// Exact byte length of a session read.
    pub fn read_len(&self) -> usize {
        self.negotiation.read_len()
    }

    /// True while the fault flag is set.
    pub fn is_errored(&self) -> bool {
        self.fault.is_errored()
    }

    // =========================================================================
    // Interrupt context
    // =========================================================================

    /// Handler entry point bound to every granted vector.
    pub fn handle_interrupt(&self, vector: u16) -> IrqReturn {
        if !self.is_present() {
            return IrqReturn::None;
        }

        let mode = self.negotiation.mode;

        // After a bus error no device register may be read, including INTx
        // status. A shared line is masked in config space instead so it
        // cannot keep asserting; the acknowledging write unmasks it.
        if self.fault.is_errored() {
            self.stats.ignored_errored.fetch_add(1, Ordering::Relaxed);
            return match mode {
                InterruptMode::None => IrqReturn::None,
                InterruptMode::Legacy => {
                    self.host.set_intx_masked(true);
                    IrqReturn::Handled
                }
                InterruptMode::Msi | InterruptMode::Msix => IrqReturn::Handled,
            };
        }

        match mode {
            InterruptMode::None => return IrqReturn::None,
            InterruptMode::Legacy => {
                if !self.host.intx_check_and_mask() {
                    self.stats.not_ours.fetch_add(1, Ordering::Relaxed);
                    return IrqReturn::None;
                }
            }
            InterruptMode::Msi | InterruptMode::Msix => {}
        }

        if u32::from(vector) == self.packet_vector.load(Ordering::Acquire) {
            // A writer holding the slot means registration is in flight
            if let Some(slot) = self.packet_consumer.try_read() {
                if let Some(consumer) = slot.as_ref() {
                    consumer.on_interrupt(vector);
                    self.stats.packet_deliveries.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if !self.counters.increment(vector as usize) {
            return IrqReturn::None;
        }
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        self.waitq.wake_all();

        #[cfg(feature = "debug")]
        log::trace!("[asic{}] irq vector {}", self.minor, vector);

        IrqReturn::Handled
    }

    // =========================================================================
    // Packet side channel
    // =========================================================================

    /// Installs or removes the packet engine callback.
    pub fn set_packet_consumer(&self, consumer: Option<Arc<dyn PacketConsumer>>) -> AsicResult<()> {
        self.check_present()?;
        if !self.profile.packet_vector {
            return Err(AsicError::NotSupported);
        }
        *self.packet_consumer.write() = consumer;
        Ok(())
    }

    /// Vector routed to the packet consumer, if any.
    pub fn packet_vector(&self) -> Option<u16> {
        match self.packet_vector.load(Ordering::Acquire) {
            NO_VECTOR => None,
            v => Some(v as u16),
        }
    }

    pub(crate) fn store_packet_vector(&self, vector: u16) {
        self.packet_vector.store(u32::from(vector), Ordering::Release);
    }

    // =========================================================================
    // Error recovery callbacks
    // =========================================================================

    /// Host reported a bus error on this function.
    pub fn error_detected(&self, state: ChannelState) -> ErsResult {
        let (verdict, entered) = self.fault.error_detected(state);
        if entered {
            self.waitq.wake_all();
            let notified = self.listeners.notify_all(SIGIO);
            log::warn!("[asic{}] fault signalled to {} session(s)", self.minor, notified);
        }
        verdict
    }

    /// Host re-enabled MMIO after an error.
    pub fn mmio_enabled(&self) -> ErsResult {
        self.fault.mmio_enabled()
    }

    /// Host reset the slot after an error.
    pub fn slot_reset(&self) -> ErsResult {
        self.fault.slot_reset()
    }

    /// Host finished error recovery.
    pub fn resume(&self) {
        self.fault.resume()
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Statistics snapshot.
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            not_ours: self.stats.not_ours.load(Ordering::Relaxed),
            ignored_errored: self.stats.ignored_errored.load(Ordering::Relaxed),
            packet_deliveries: self.stats.packet_deliveries.load(Ordering::Relaxed),
            faults: self.fault.transitions(),
        }
    }

    /// Summary for diagnostics tools.
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            minor: self.minor,
            profile: self.profile,
            mode: self.negotiation.mode,
            vectors: self.negotiation.vectors,
            dma_bits: self.dma_bits,
            windows: self.resources.read().populated(),
            sessions: self.listeners.len(),
            errored: self.fault.is_errored(),
        }
    }
}
