//! # Host Bus Boundary
//!
//! S-ASIC does not enumerate the bus. The hosting kernel's PCI layer has
//! already discovered BARs, negotiated DMA capability and owns the vector
//! allocator; this module describes what S-ASIC asks of it.

/// Maximum number of memory windows (BARs) per device.
pub const MAX_WINDOWS: usize = 6;

/// Page size used for window selectors and size rounding.
pub const PAGE_SIZE: u64 = 4096;

/// Errors reported by the host bus layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostError {
    /// Not enough interrupt vectors
    NoVectors,
    /// Allocation failure
    NoMemory,
    /// IOVA / bounce space exhausted
    AddressSpaceExhausted,
    /// Region already claimed
    Busy,
    /// Bad parameter
    InvalidArgument,
    /// Capability absent on this platform
    Unsupported,
    /// Bus transaction failed
    Io,
}

/// Window information as discovered by bus enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarInfo {
    /// Bus base address
    pub base: u64,
    /// Size in bytes
    pub size: u64,
}

/// Channel state reported with a bus error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// I/O still possible
    Normal,
    /// I/O blocked until the link is reset
    Frozen,
    /// Device is gone for good
    PermanentFailure,
}

/// Answer to the host's error-recovery callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErsResult {
    /// Driver handles it without a link reset
    CanRecover,
    /// Driver considers the step complete
    Recovered,
    /// Driver gives up on the device
    Disconnect,
}

/// Disposition of one interrupt occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Interrupt was not raised by this device
    None,
    /// Interrupt was consumed
    Handled,
}

/// A user address range about to be backed by device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserMapping {
    /// User virtual start address
    pub start: u64,
    /// Length in bytes
    pub len: u64,
    /// Offset in pages; selects the window index, not a byte offset
    pub pgoff: u64,
}

impl UserMapping {
    /// Creates a mapping request for window `index`.
    pub const fn for_window(start: u64, len: u64, index: usize) -> Self {
        Self {
            start,
            len,
            pgoff: index as u64,
        }
    }
}

/// Operations the hosting bus layer provides for one PCI function.
///
/// Methods on the interrupt path (`intx_check_and_mask`) are called from
/// interrupt context and must not sleep.
pub trait PciHost: Send + Sync {
    /// Returns the window at `index` if the function implements it.
    fn bar(&self, index: usize) -> Option<BarInfo>;

    /// Reserves and maps window `index`; returns the mapped address.
    fn map_bar(&self, index: usize, name: &str) -> Result<u64, HostError>;

    /// Unmaps and releases window `index`.
    fn unmap_bar(&self, index: usize);

    /// Restricts the device to `bits` of DMA addressing.
    fn set_dma_mask(&self, bits: u8) -> Result<(), HostError>;

    /// Requests up to `count` MSI-X vectors; returns how many were granted.
    fn enable_msix(&self, count: u16) -> Result<u16, HostError>;

    /// Releases all MSI-X vectors.
    fn disable_msix(&self);

    /// Requests up to `count` MSI vectors; returns how many were granted.
    fn enable_msi(&self, count: u16) -> Result<u16, HostError>;

    /// Releases all MSI vectors.
    fn disable_msi(&self);

    /// True when the platform routed a usable INTx line.
    fn legacy_irq_usable(&self) -> bool;

    /// Binds the S-ASIC handler entry point to `vector`.
    fn request_irq(&self, vector: u16) -> Result<(), HostError>;

    /// Unbinds the handler from `vector`.
    fn free_irq(&self, vector: u16);

    /// Checks the INTx status bit and masks the line if it is ours.
    fn intx_check_and_mask(&self) -> bool;

    /// Masks or unmasks the INTx line.
    fn set_intx_masked(&self, masked: bool);

    /// Sets or clears the mask bit of one MSI-X table entry.
    fn set_msix_vector_masked(&self, vector: u16, masked: bool);

    /// Produces a bus address for a caller-owned physical buffer.
    fn dma_map(&self, phys: u64, size: u64) -> Result<u64, HostError>;

    /// Releases a translation produced by [`PciHost::dma_map`].
    fn dma_unmap(&self, bus: u64, size: u64);

    /// Maps `len` bytes at physical `phys` into the caller, uncached.
    fn remap_uncached(&self, mapping: &UserMapping, phys: u64, len: u64) -> Result<(), HostError>;
}

/// Rounds `size` up to the next page boundary.
pub const fn page_align(size: u64) -> u64 {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}
