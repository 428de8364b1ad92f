//! # Memory/DMA Bridge
//!
//! Direct user access to device windows, stateless DMA address translation
//! and the interrupt mask level.
//!
//! Every operation re-validates the device before touching the host: a
//! detached device fails with [`AsicError::NoDevice`], an errored one with
//! [`AsicError::Faulted`]. Nothing is retried internally.

use core::sync::atomic::Ordering;

use crate::device::Device;
use crate::error::{AsicError, AsicResult};
use crate::host::{UserMapping, MAX_WINDOWS};
use crate::negotiate::InterruptMode;

/// Result of a DMA translation. The bridge keeps no record of it; the
/// caller hands `bus` and `size` back to [`release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaMapping {
    /// Caller-owned physical address
    pub phys: u64,
    /// Address the device uses
    pub bus: u64,
    /// Length in bytes
    pub size: u64,
}

/// Maps the window selected by `mapping.pgoff` into user space, uncached.
///
/// The page offset is a window index, never a byte offset.
pub fn map_window(dev: &Device, mapping: &UserMapping) -> AsicResult<()> {
    dev.check_usable()?;

    let index = usize::try_from(mapping.pgoff).map_err(|_| AsicError::InvalidWindow)?;
    if index >= MAX_WINDOWS {
        return Err(AsicError::InvalidWindow);
    }

    let (base, limit) = {
        let table = dev.resources.read();
        let window = table.window(index)?;
        (window.bus_base, window.mappable_len())
    };
    if mapping.len == 0 || mapping.len > limit {
        return Err(AsicError::MappingTooLarge);
    }

    dev.host
        .remap_uncached(mapping, base, mapping.len)
        .map_err(|err| {
            log::warn!("[asic{}] window {} remap failed: {:?}", dev.minor(), index, err);
            AsicError::MapFailed
        })
}

/// Produces a bus address for a caller buffer.
pub fn translate(dev: &Device, phys: u64, size: u64) -> AsicResult<DmaMapping> {
    if phys == 0 || size == 0 {
        return Err(AsicError::InvalidDmaRequest);
    }
    dev.check_usable()?;

    let bus = dev.host.dma_map(phys, size).map_err(|err| {
        log::warn!(
            "[asic{}] dma translation of {:#x}+{:#x} failed: {:?}",
            dev.minor(),
            phys,
            size,
            err
        );
        AsicError::TranslationFailed
    })?;
    Ok(DmaMapping { phys, bus, size })
}

/// Drops a translation obtained from [`translate`].
pub fn release(dev: &Device, bus: u64, size: u64) -> AsicResult<()> {
    if bus == 0 || size == 0 {
        return Err(AsicError::InvalidDmaRequest);
    }
    dev.check_usable()?;
    dev.host.dma_unmap(bus, size);
    Ok(())
}

/// Programs the mask level for the negotiated mode. A level, not an edge:
/// repeating a call changes nothing.
pub(crate) fn apply_irq_level(dev: &Device, enabled: bool) {
    let negotiation = dev.negotiation;
    match negotiation.mode {
        InterruptMode::Legacy => dev.host.set_intx_masked(!enabled),
        InterruptMode::Msix => {
            for vector in 0..negotiation.vectors {
                dev.host.set_msix_vector_masked(vector, !enabled);
            }
        }
        // MSI has no per-vector mask on this hardware
        InterruptMode::Msi | InterruptMode::None => {}
    }
    dev.irq_enabled.store(enabled, Ordering::Release);
}

/// Enables or disables interrupt delivery. Succeeds whenever the device is
/// present, errored or not.
pub fn set_interrupts(dev: &Device, enabled: bool) -> AsicResult<()> {
    dev.check_present()?;
    apply_irq_level(dev, enabled);
    Ok(())
}

/// Current mask level.
pub fn interrupts_enabled(dev: &Device) -> bool {
    dev.irq_enabled.load(Ordering::Acquire)
}

/// Negotiated interrupt mode.
pub fn interrupt_mode(dev: &Device) -> AsicResult<InterruptMode> {
    dev.check_usable()?;
    Ok(dev.negotiation.mode)
}

/// Routes `vector` to the packet consumer.
pub fn set_packet_vector(dev: &Device, vector: u32) -> AsicResult<()> {
    dev.check_usable()?;
    if !dev.profile().packet_vector {
        return Err(AsicError::NotSupported);
    }
    if vector as usize >= dev.negotiation.counter_slots() {
        return Err(AsicError::InvalidVector);
    }
    dev.store_packet_vector(vector as u16);
    log::info!("[asic{}] packet vector set to {}", dev.minor(), vector);
    Ok(())
}
