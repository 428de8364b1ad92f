//! Scriptable host bus used by the unit tests.

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};

use spin::Mutex;

use crate::config::MAX_VECTORS;
use crate::host::{BarInfo, HostError, PciHost, UserMapping, MAX_WINDOWS};

pub struct MockHost {
    bars: [Option<BarInfo>; MAX_WINDOWS],
    fail_map: Option<usize>,
    mapped: Mutex<[bool; MAX_WINDOWS]>,
    msix_available: u16,
    msi_available: u16,
    legacy: bool,
    dma_mask_limit: u8,
    dma_budget: usize,
    msix_enabled: AtomicU16,
    msi_enabled: AtomicU16,
    irqs: Mutex<Vec<u16>>,
    intx_pending: AtomicBool,
    intx_masked: AtomicBool,
    msix_masked: Mutex<Vec<bool>>,
    next_bus: AtomicU64,
    live_dma: Mutex<Vec<(u64, u64)>>,
    remaps: Mutex<Vec<(UserMapping, u64, u64)>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            bars: [None; MAX_WINDOWS],
            fail_map: None,
            mapped: Mutex::new([false; MAX_WINDOWS]),
            msix_available: 0,
            msi_available: 0,
            legacy: false,
            dma_mask_limit: 64,
            dma_budget: usize::MAX,
            msix_enabled: AtomicU16::new(0),
            msi_enabled: AtomicU16::new(0),
            irqs: Mutex::new(Vec::new()),
            intx_pending: AtomicBool::new(false),
            intx_masked: AtomicBool::new(false),
            msix_masked: Mutex::new(vec![false; MAX_VECTORS as usize]),
            next_bus: AtomicU64::new(0x1_0000_0000),
            live_dma: Mutex::new(Vec::new()),
            remaps: Mutex::new(Vec::new()),
        }
    }

    pub fn with_bar(mut self, index: usize, base: u64, size: u64) -> Self {
        self.bars[index] = Some(BarInfo { base, size });
        self
    }

    pub fn fail_map_bar(mut self, index: usize) -> Self {
        self.fail_map = Some(index);
        self
    }

    pub fn with_msix(mut self, available: u16) -> Self {
        self.msix_available = available;
        self
    }

    pub fn with_msi(mut self, available: u16) -> Self {
        self.msi_available = available;
        self
    }

    pub fn with_legacy(mut self, usable: bool) -> Self {
        self.legacy = usable;
        self
    }

    pub fn with_dma_mask_limit(mut self, bits: u8) -> Self {
        self.dma_mask_limit = bits;
        self
    }

    pub fn with_dma_budget(mut self, translations: usize) -> Self {
        self.dma_budget = translations;
        self
    }

    pub fn mapped_bars(&self) -> usize {
        self.mapped.lock().iter().filter(|m| **m).count()
    }

    pub fn msix_enabled(&self) -> u16 {
        self.msix_enabled.load(Ordering::SeqCst)
    }

    pub fn msi_enabled(&self) -> u16 {
        self.msi_enabled.load(Ordering::SeqCst)
    }

    pub fn bound_irqs(&self) -> Vec<u16> {
        self.irqs.lock().clone()
    }

    /// Asserts the INTx status bit as if the device pulled the line.
    pub fn raise_intx(&self) {
        self.intx_pending.store(true, Ordering::SeqCst);
    }

    pub fn intx_masked(&self) -> bool {
        self.intx_masked.load(Ordering::SeqCst)
    }

    pub fn msix_masked(&self, vector: u16) -> bool {
        self.msix_masked.lock()[vector as usize]
    }

    pub fn live_dma(&self) -> usize {
        self.live_dma.lock().len()
    }

    pub fn remaps(&self) -> Vec<(UserMapping, u64, u64)> {
        self.remaps.lock().clone()
    }
}

impl PciHost for MockHost {
    fn bar(&self, index: usize) -> Option<BarInfo> {
        self.bars.get(index).copied().flatten()
    }

    fn map_bar(&self, index: usize, _name: &str) -> Result<u64, HostError> {
        if self.fail_map == Some(index) {
            return Err(HostError::Busy);
        }
        self.mapped.lock()[index] = true;
        Ok(0xffff_c000_0000_0000 + ((index as u64) << 32))
    }

    fn unmap_bar(&self, index: usize) {
        self.mapped.lock()[index] = false;
    }

    fn set_dma_mask(&self, bits: u8) -> Result<(), HostError> {
        if bits > self.dma_mask_limit {
            return Err(HostError::Unsupported);
        }
        Ok(())
    }

    fn enable_msix(&self, count: u16) -> Result<u16, HostError> {
        if self.msix_available == 0 {
            return Err(HostError::NoVectors);
        }
        let granted = count.min(self.msix_available);
        self.msix_enabled.store(granted, Ordering::SeqCst);
        Ok(granted)
    }

    fn disable_msix(&self) {
        self.msix_enabled.store(0, Ordering::SeqCst);
    }

    fn enable_msi(&self, count: u16) -> Result<u16, HostError> {
        if self.msi_available == 0 {
            return Err(HostError::NoVectors);
        }
        let granted = count.min(self.msi_available);
        self.msi_enabled.store(granted, Ordering::SeqCst);
        Ok(granted)
    }

    fn disable_msi(&self) {
        self.msi_enabled.store(0, Ordering::SeqCst);
    }

    fn legacy_irq_usable(&self) -> bool {
        self.legacy
    }

    fn request_irq(&self, vector: u16) -> Result<(), HostError> {
        self.irqs.lock().push(vector);
        Ok(())
    }

    fn free_irq(&self, vector: u16) {
        self.irqs.lock().retain(|v| *v != vector);
    }

    fn intx_check_and_mask(&self) -> bool {
        if self.intx_pending.swap(false, Ordering::SeqCst) {
            self.intx_masked.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn set_intx_masked(&self, masked: bool) {
        self.intx_masked.store(masked, Ordering::SeqCst);
    }

    fn set_msix_vector_masked(&self, vector: u16, masked: bool) {
        self.msix_masked.lock()[vector as usize] = masked;
    }

    fn dma_map(&self, _phys: u64, size: u64) -> Result<u64, HostError> {
        let mut live = self.live_dma.lock();
        if live.len() >= self.dma_budget {
            return Err(HostError::AddressSpaceExhausted);
        }
        let bus = self.next_bus.fetch_add(size.max(4096), Ordering::SeqCst);
        live.push((bus, size));
        Ok(bus)
    }

    fn dma_unmap(&self, bus: u64, size: u64) {
        self.live_dma.lock().retain(|&(b, s)| !(b == bus && s == size));
    }

    fn remap_uncached(&self, mapping: &UserMapping, phys: u64, len: u64) -> Result<(), HostError> {
        self.remaps.lock().push((*mapping, phys, len));
        Ok(())
    }
}
