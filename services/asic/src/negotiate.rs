//! # Interrupt Mode Negotiation
//!
//! Picks exactly one delivery mode for a freshly attached device by walking
//! a fixed fallback chain:
//!
//! ```text
//! MSI-X (exact preferred count) ─fail→ MSI (preferred count) ─fail→ INTx ─fail→ None
//! ```
//!
//! A failed step is not an error; it only moves the chain along. Every
//! granted vector is bound to the same handler entry point with its own
//! index as context.

use crate::config::{DeviceProfile, ModeMask};
use crate::host::{HostError, PciHost};

/// Interrupt delivery mode. Discriminants are part of the control protocol.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptMode {
    /// No event notification
    #[default]
    None = 0,
    /// Shared INTx line
    Legacy = 1,
    /// Message signaled
    Msi = 2,
    /// Message signaled, extended
    Msix = 3,
}

impl InterruptMode {
    /// Decodes a wire value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(InterruptMode::None),
            1 => Some(InterruptMode::Legacy),
            2 => Some(InterruptMode::Msi),
            3 => Some(InterruptMode::Msix),
            _ => None,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            InterruptMode::None => "none",
            InterruptMode::Legacy => "legacy",
            InterruptMode::Msi => "msi",
            InterruptMode::Msix => "msix",
        }
    }

    /// True when each vector has an exclusive binding.
    pub fn is_message_signaled(&self) -> bool {
        matches!(self, InterruptMode::Msi | InterruptMode::Msix)
    }
}

/// Outcome of negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    /// Chosen mode
    pub mode: InterruptMode,
    /// Vectors bound to the handler; 0 for `None`
    pub vectors: u16,
}

impl Negotiation {
    /// Reduced-functionality outcome.
    pub const fn none() -> Self {
        Self {
            mode: InterruptMode::None,
            vectors: 0,
        }
    }

    /// Counter slots the device exposes; at least one in every mode.
    pub fn counter_slots(&self) -> usize {
        match self.mode {
            InterruptMode::None | InterruptMode::Legacy => 1,
            InterruptMode::Msi | InterruptMode::Msix => self.vectors as usize,
        }
    }

    /// Byte length of a wait-for-event read in this mode.
    pub fn read_len(&self) -> usize {
        self.counter_slots() * core::mem::size_of::<u32>()
    }

    /// Unbinds every vector and returns the device to mode `None`.
    pub fn release(&mut self, host: &dyn PciHost) {
        for vector in 0..self.vectors {
            host.free_irq(vector);
        }
        match self.mode {
            InterruptMode::Msix => host.disable_msix(),
            InterruptMode::Msi => host.disable_msi(),
            InterruptMode::Legacy | InterruptMode::None => {}
        }
        *self = Negotiation::none();
    }
}

/// One link of the fallback chain.
struct NegotiationStep {
    mode: InterruptMode,
    gate: ModeMask,
    /// Enables the mode and returns the vector count, or fails the step
    attempt: fn(&dyn PciHost, &DeviceProfile) -> Result<u16, HostError>,
    /// Undoes `attempt` when binding handlers fails
    undo: fn(&dyn PciHost),
}

const FALLBACK_CHAIN: [NegotiationStep; 3] = [
    NegotiationStep {
        mode: InterruptMode::Msix,
        gate: ModeMask::MSIX,
        attempt: attempt_msix,
        undo: undo_msix,
    },
    NegotiationStep {
        mode: InterruptMode::Msi,
        gate: ModeMask::MSI,
        attempt: attempt_msi,
        undo: undo_msi,
    },
    NegotiationStep {
        mode: InterruptMode::Legacy,
        gate: ModeMask::LEGACY,
        attempt: attempt_legacy,
        undo: undo_legacy,
    },
];

fn attempt_msix(host: &dyn PciHost, profile: &DeviceProfile) -> Result<u16, HostError> {
    let granted = host.enable_msix(profile.msix_vectors)?;
    if granted != profile.msix_vectors {
        log::info!(
            "[asic] msix granted {} of {} vectors, refusing partial grant",
            granted,
            profile.msix_vectors
        );
        host.disable_msix();
        return Err(HostError::NoVectors);
    }
    Ok(granted)
}

fn undo_msix(host: &dyn PciHost) {
    host.disable_msix();
}

fn attempt_msi(host: &dyn PciHost, profile: &DeviceProfile) -> Result<u16, HostError> {
    match host.enable_msi(profile.msi_vectors)? {
        0 => {
            host.disable_msi();
            Err(HostError::NoVectors)
        }
        granted => Ok(granted),
    }
}

fn undo_msi(host: &dyn PciHost) {
    host.disable_msi();
}

fn attempt_legacy(host: &dyn PciHost, _profile: &DeviceProfile) -> Result<u16, HostError> {
    if host.legacy_irq_usable() {
        Ok(1)
    } else {
        Err(HostError::Unsupported)
    }
}

fn undo_legacy(_host: &dyn PciHost) {}

/// Binds the handler to vectors `0..count`, unwinding on failure.
fn bind_vectors(host: &dyn PciHost, count: u16) -> Result<(), HostError> {
    for vector in 0..count {
        if let Err(err) = host.request_irq(vector) {
            for bound in 0..vector {
                host.free_irq(bound);
            }
            return Err(err);
        }
    }
    Ok(())
}

/// Modes in the order they are attempted.
pub fn fallback_order() -> [InterruptMode; 3] {
    [
        FALLBACK_CHAIN[0].mode,
        FALLBACK_CHAIN[1].mode,
        FALLBACK_CHAIN[2].mode,
    ]
}

/// Runs the fallback chain once.
pub fn negotiate(host: &dyn PciHost, profile: &DeviceProfile, allowed: ModeMask) -> Negotiation {
    for step in FALLBACK_CHAIN.iter() {
        if !allowed.contains(step.gate) {
            log::debug!("[asic] {} disabled by configuration", step.mode.name());
            continue;
        }

        let vectors = match (step.attempt)(host, profile) {
            Ok(vectors) => vectors,
            Err(err) => {
                log::info!("[asic] {} unavailable ({:?}), falling back", step.mode.name(), err);
                continue;
            }
        };

        if let Err(err) = bind_vectors(host, vectors) {
            log::warn!("[asic] cannot bind {} handlers: {:?}", step.mode.name(), err);
            (step.undo)(host);
            continue;
        }

        log::info!("[asic] interrupt mode {} with {} vector(s)", step.mode.name(), vectors);
        return Negotiation {
            mode: step.mode,
            vectors,
        };
    }

    log::warn!("[asic] no interrupt delivery; event notification disabled");
    Negotiation::none()
}
