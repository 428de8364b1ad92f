//! # S-ASIC Configuration
//!
//! Administrative knobs, set once before devices attach, and the per-type
//! constants each supported ASIC family carries.

use core::str::FromStr;

use bitflags::bitflags;

/// Hardware ceiling on MSI-X table entries S-ASIC will ever bind.
pub const MAX_VECTORS: u16 = 64;

bitflags! {
    /// Interrupt modes the negotiator is allowed to try.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModeMask: u8 {
        const MSIX = 1 << 0;
        const MSI = 1 << 1;
        const LEGACY = 1 << 2;
    }
}

/// Administrative interrupt mode request.
///
/// A request names the highest mode worth trying; lower modes remain
/// available as fallbacks. `None` disables event notification entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IrqModeRequest {
    /// Best available
    #[default]
    Auto,
    /// Start at MSI-X
    Msix,
    /// Start at MSI
    Msi,
    /// Shared line only
    Legacy,
    /// No interrupts
    None,
}

impl IrqModeRequest {
    /// Modes the negotiator may attempt for this request.
    pub fn allowed(&self) -> ModeMask {
        match self {
            IrqModeRequest::Auto | IrqModeRequest::Msix => ModeMask::all(),
            IrqModeRequest::Msi => ModeMask::MSI | ModeMask::LEGACY,
            IrqModeRequest::Legacy => ModeMask::LEGACY,
            IrqModeRequest::None => ModeMask::empty(),
        }
    }
}

impl FromStr for IrqModeRequest {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "auto" => Ok(IrqModeRequest::Auto),
            "msix" | "msi-x" => Ok(IrqModeRequest::Msix),
            "msi" => Ok(IrqModeRequest::Msi),
            "legacy" | "intx" => Ok(IrqModeRequest::Legacy),
            "none" => Ok(IrqModeRequest::None),
            _ => Err(()),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AsicConfig {
    /// Interrupt mode request applied to every attach
    pub irq_mode: IrqModeRequest,
    /// Capacity of the device table (minor numbers)
    pub max_devices: usize,
    /// Capacity of each device's session table
    pub max_sessions: usize,
    /// Preferred DMA addressing width; 32 is the fallback
    pub dma_mask_bits: u8,
}

impl Default for AsicConfig {
    fn default() -> Self {
        Self {
            irq_mode: IrqModeRequest::Auto,
            max_devices: 16,
            max_sessions: 64,
            dma_mask_bits: 64,
        }
    }
}

/// Per-family constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Family name, used in region names and logs
    pub name: &'static str,
    /// MSI-X vectors the family requires; partial grants are refused
    pub msix_vectors: u16,
    /// MSI vectors requested on MSI-X failure
    pub msi_vectors: u16,
    /// Whether the packet side channel may be pointed at a vector
    pub packet_vector: bool,
}

impl DeviceProfile {
    /// Switching ASIC with an attached packet engine.
    pub const SWITCH: DeviceProfile = DeviceProfile {
        name: "asic-sw",
        msix_vectors: 32,
        msi_vectors: 2,
        packet_vector: true,
    };

    /// Fabric ASIC; no packet engine.
    pub const FABRIC: DeviceProfile = DeviceProfile {
        name: "asic-fab",
        msix_vectors: 16,
        msi_vectors: 2,
        packet_vector: false,
    };

    /// Checks the constants against the hardware ceiling.
    pub fn is_valid(&self) -> bool {
        self.msix_vectors > 0
            && self.msix_vectors <= MAX_VECTORS
            && self.msi_vectors > 0
            && self.msi_vectors < self.msix_vectors
    }
}
