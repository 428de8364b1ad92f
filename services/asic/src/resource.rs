//! # Resource Table
//!
//! Per-device record of the memory windows found at attach time.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{AsicError, AsicResult};
use crate::host::{page_align, PciHost, MAX_WINDOWS};

/// One memory window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResource {
    /// Window index (0-5)
    pub index: usize,
    /// Region name used for the reservation
    pub name: String,
    /// Bus base address
    pub bus_base: u64,
    /// Kernel mapping; `Some` iff the window was reserved and mapped
    pub mapped: Option<u64>,
    /// Size in bytes, 0 when the window is not implemented
    pub size: u64,
}

impl DeviceResource {
    fn absent(index: usize, name: String) -> Self {
        Self {
            index,
            name,
            bus_base: 0,
            mapped: None,
            size: 0,
        }
    }

    /// Size rounded up to whole pages.
    pub fn mappable_len(&self) -> u64 {
        page_align(self.size)
    }
}

/// All windows of one device, indexed 0..MAX_WINDOWS.
#[derive(Debug, Clone)]
pub struct ResourceTable {
    windows: Vec<DeviceResource>,
}

impl ResourceTable {
    /// Reserves and maps every implemented window.
    ///
    /// Either every non-empty window ends up mapped or none stays mapped.
    pub fn populate(host: &dyn PciHost, family: &str) -> AsicResult<Self> {
        let mut table = Self {
            windows: Vec::with_capacity(MAX_WINDOWS),
        };

        for index in 0..MAX_WINDOWS {
            let name = format!("{}-bar{}", family, index);
            let Some(bar) = host.bar(index).filter(|b| b.size > 0) else {
                table.windows.push(DeviceResource::absent(index, name));
                continue;
            };

            match host.map_bar(index, &name) {
                Ok(mapped) => {
                    log::debug!(
                        "[asic] {} base={:#x} size={:#x} mapped at {:#x}",
                        name,
                        bar.base,
                        bar.size,
                        mapped
                    );
                    table.windows.push(DeviceResource {
                        index,
                        name,
                        bus_base: bar.base,
                        mapped: Some(mapped),
                        size: bar.size,
                    });
                }
                Err(err) => {
                    log::warn!("[asic] cannot reserve {}: {:?}", name, err);
                    table.release(host);
                    return Err(AsicError::ResourceUnavailable);
                }
            }
        }

        Ok(table)
    }

    /// Unmaps every mapped window.
    pub fn release(&mut self, host: &dyn PciHost) {
        for window in &mut self.windows {
            if window.mapped.take().is_some() {
                host.unmap_bar(window.index);
            }
        }
    }

    /// Returns window `index` if it exists and has memory behind it.
    pub fn window(&self, index: usize) -> AsicResult<&DeviceResource> {
        let window = self.windows.get(index).ok_or(AsicError::InvalidWindow)?;
        if window.size == 0 {
            return Err(AsicError::EmptyWindow);
        }
        Ok(window)
    }

    /// All windows, including empty ones.
    pub fn windows(&self) -> &[DeviceResource] {
        &self.windows
    }

    /// Number of windows with memory behind them.
    pub fn populated(&self) -> usize {
        self.windows.iter().filter(|w| w.size > 0).count()
    }
}
