//! # S-ASIC: Splax OS ASIC Device Control Core
//!
//! S-ASIC drives PCI-attached switching and fabric ASICs. It negotiates how
//! the device delivers interrupts, turns every interrupt vector into a
//! counter that user sessions can wait on, lets sessions map device windows
//! and translate DMA buffers, and keeps the device alive across bus errors
//! until an operator acknowledges them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      USER SESSIONS                          │
//! │   read (wait)   write (mask/ack)   mmap   ioctl   fasync    │
//! ├─────────────────────────────────────────────────────────────┤
//! │ ┌──────────────────┐  ┌──────────────────┐  ┌────────────┐  │
//! │ │ Listener Registry│  │ Memory/DMA Bridge│  │  Control   │  │
//! │ │  - sessions      │  │  - window mapping│  │  requests  │  │
//! │ │  - last_seen     │  │  - translation   │  │            │  │
//! │ └────────┬─────────┘  └────────┬─────────┘  └─────┬──────┘  │
//! │          │  wait queue         │                  │         │
//! │ ┌────────┴─────────┐  ┌────────┴─────────┐  ┌─────┴──────┐  │
//! │ │ Event Counter    │◀─│ Interrupt Handler│  │   Fault    │  │
//! │ │ Bank (atomics)   │  │ (never sleeps)   │  │  Monitor   │  │
//! │ └──────────────────┘  └────────┬─────────┘  └─────┬──────┘  │
//! │ ┌──────────────────┐  ┌────────┴─────────┐        │         │
//! │ │ Resource Table   │  │ Mode Negotiator  │        │         │
//! │ └──────────────────┘  └──────────────────┘        │         │
//! ├───────────────────────────────────────────────────┴─────────┤
//! │                HOST PCI BUS LAYER (PciHost)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Device lifecycle
//!
//! 1. [`AsicDriver::bind`] reserves a minor number, the device's windows
//!    and its interrupt vectors.
//! 2. Sessions open through [`AsicDriver::open`] and use the
//!    [`listener::Session`] protocol.
//! 3. Bus errors arrive through [`device::Device::error_detected`].
//! 4. [`AsicDriver::remove`] wakes and invalidates every session, then gives
//!    everything back to the host.

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod arena;
pub mod bridge;
pub mod config;
pub mod control;
pub mod counters;
pub mod device;
pub mod error;
pub mod fault;
pub mod host;
pub mod listener;
pub mod negotiate;
pub mod resource;
pub mod wait;

#[cfg(test)]
mod mock;

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

pub use config::{AsicConfig, DeviceProfile, IrqModeRequest, ModeMask};
pub use device::{Device, DeviceInfo, DeviceStats, PacketConsumer};
pub use error::{AsicError, AsicResult, ErrorClass};
pub use host::{ChannelState, ErsResult, IrqReturn, PciHost, UserMapping};
pub use listener::{ReadFlags, Session};
pub use negotiate::InterruptMode;
pub use wait::{SpinWait, WaitContext};

use arena::SlotArena;

/// S-ASIC service version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Table of attached devices, indexed by minor number.
///
/// A `None` entry is a minor reserved by a bind still in progress.
pub struct AsicDriver {
    config: AsicConfig,
    devices: Mutex<SlotArena<Option<Arc<Device>>>>,
}

impl AsicDriver {
    /// Creates an empty driver.
    pub fn new(config: AsicConfig) -> Self {
        let devices = Mutex::new(SlotArena::with_capacity(config.max_devices));
        Self { config, devices }
    }

    /// Active configuration.
    pub fn config(&self) -> &AsicConfig {
        &self.config
    }

    /// Attaches a newly discovered function; returns its minor number.
    pub fn bind(&self, host: Arc<dyn PciHost>, profile: DeviceProfile) -> AsicResult<u16> {
        let id = self
            .devices
            .lock()
            .insert(None)
            .map_err(|_| AsicError::NoMinor)?;
        let minor = id.index() as u16;

        // The table lock is not held across attach
        match Device::attach(minor, host, profile, &self.config) {
            Ok(device) => {
                if let Some(slot) = self.devices.lock().get_mut(id) {
                    *slot = Some(device);
                }
                Ok(minor)
            }
            Err(err) => {
                log::error!("[asic] bind of {} failed: {}", profile.name, err);
                self.devices.lock().remove(id);
                Err(err)
            }
        }
    }

    /// Detaches the device at `minor` and frees the minor number.
    pub fn remove(&self, minor: u16) -> AsicResult<()> {
        let device = {
            let mut devices = self.devices.lock();
            let (id, device) = devices.at(minor as usize).ok_or(AsicError::NoDevice)?;
            if device.is_none() {
                return Err(AsicError::Busy);
            }
            devices.remove(id).flatten().ok_or(AsicError::NoDevice)?
        };
        device.detach();
        Ok(())
    }

    /// The device at `minor`, if attached.
    pub fn device(&self, minor: u16) -> Option<Arc<Device>> {
        self.devices
            .lock()
            .at(minor as usize)
            .and_then(|(_, device)| device.clone())
    }

    /// Opens a new session on the device at `minor`.
    pub fn open(&self, minor: u16) -> AsicResult<Session> {
        let device = self.device(minor).ok_or(AsicError::NoDevice)?;
        Session::open(&device)
    }

    /// Every attached device, by minor.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices
            .lock()
            .iter()
            .filter_map(|(_, device)| device.clone())
            .collect()
    }

    /// Number of attached devices.
    pub fn len(&self) -> usize {
        self.devices().len()
    }

    /// True when nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Global driver instance.
static DRIVER: spin::Once<AsicDriver> = spin::Once::new();

/// Initializes the global driver. Later calls return the first instance.
pub fn init(config: AsicConfig) -> &'static AsicDriver {
    DRIVER.call_once(|| {
        log::info!(
            "[asic] S-ASIC v{} up: irq mode {:?}, {} minor(s)",
            VERSION,
            config.irq_mode,
            config.max_devices
        );
        AsicDriver::new(config)
    })
}

/// Gets the global driver, if initialized.
pub fn driver() -> Option<&'static AsicDriver> {
    DRIVER.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHost;
    use alloc::vec;
    use core::sync::atomic::AtomicBool;

    fn nonblock(session: &mut Session, slots: usize) -> AsicResult<Vec<u32>> {
        let cancel = AtomicBool::new(false);
        let mut out = vec![0u32; slots];
        session.read_counters(&mut out, ReadFlags::NONBLOCK, &SpinWait::new(&cancel))?;
        Ok(out)
    }

    #[test]
    fn test_partial_msix_grant_falls_back_to_msi() {
        let drv = AsicDriver::new(AsicConfig::default());
        let host = Arc::new(MockHost::new().with_msix(8).with_msi(2));
        let minor = drv.bind(host.clone(), DeviceProfile::SWITCH).unwrap();

        let dev = drv.device(minor).unwrap();
        assert_eq!(dev.negotiation().mode, InterruptMode::Msi);
        assert_eq!(dev.negotiation().vectors, 2);
        assert_eq!(host.msix_enabled(), 0);

        let mut session = drv.open(minor).unwrap();
        let cancel = AtomicBool::new(false);
        let mut short = [0u8; 4];
        assert_eq!(
            session.read(&mut short, ReadFlags::NONBLOCK, &SpinWait::new(&cancel)),
            Err(AsicError::BadLength {
                expected: 8,
                actual: 4
            })
        );
        let mut exact = [0u8; 8];
        assert_eq!(
            session.read(&mut exact, ReadFlags::NONBLOCK, &SpinWait::new(&cancel)),
            Err(AsicError::WouldBlock)
        );
    }

    #[test]
    fn test_independent_listener_baselines() {
        let drv = AsicDriver::new(AsicConfig::default());
        let minor = drv
            .bind(Arc::new(MockHost::new().with_msi(2)), DeviceProfile::FABRIC)
            .unwrap();
        let dev = drv.device(minor).unwrap();

        let mut l1 = drv.open(minor).unwrap();
        let mut l2 = drv.open(minor).unwrap();
        for _ in 0..3 {
            dev.handle_interrupt(0);
        }
        assert_eq!(nonblock(&mut l1, 2), Ok(vec![3, 0]));

        dev.handle_interrupt(0);
        // L2 still measures from the snapshot taken at open
        assert_eq!(nonblock(&mut l2, 2), Ok(vec![4, 0]));

        let before = l1.last_seen()[0];
        let out = nonblock(&mut l1, 2).unwrap();
        assert_eq!(out[0].wrapping_sub(before), 1);
    }

    #[test]
    fn test_map_empty_window_end_to_end() {
        let drv = AsicDriver::new(AsicConfig::default());
        let host = Arc::new(MockHost::new().with_bar(0, 0x8000_0000, 0x10000));
        let minor = drv.bind(host.clone(), DeviceProfile::FABRIC).unwrap();
        let session = drv.open(minor).unwrap();

        let mapping = UserMapping::for_window(0x7000_0000, 0x1000, 1);
        let err = session.mmap(&mapping).unwrap_err();
        assert_eq!(err, AsicError::EmptyWindow);
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(host.remaps().is_empty());
    }

    #[test]
    fn test_fault_blocks_data_path() {
        let drv = AsicDriver::new(AsicConfig::default());
        let host = Arc::new(
            MockHost::new()
                .with_bar(0, 0x8000_0000, 0x10000)
                .with_msi(2),
        );
        let minor = drv.bind(host.clone(), DeviceProfile::FABRIC).unwrap();
        let dev = drv.device(minor).unwrap();
        let mut session = drv.open(minor).unwrap();

        assert_eq!(dev.error_detected(ChannelState::Frozen), ErsResult::CanRecover);

        let mapping = UserMapping::for_window(0x7000_0000, 0x1000, 0);
        assert_eq!(session.mmap(&mapping), Err(AsicError::Faulted));
        assert_eq!(bridge::translate(&dev, 0x1000, 0x1000), Err(AsicError::Faulted));
        assert_eq!(nonblock(&mut session, 2), Err(AsicError::Faulted));
        assert!(host.remaps().is_empty());

        // Host recovery alone does not resume access
        dev.slot_reset();
        dev.resume();
        assert_eq!(nonblock(&mut session, 2), Err(AsicError::Faulted));

        session.write(&1i32.to_ne_bytes()).unwrap();
        assert!(session.mmap(&mapping).is_ok());
    }

    #[test]
    fn test_minor_exhaustion_and_reuse() {
        let drv = AsicDriver::new(AsicConfig {
            max_devices: 2,
            ..AsicConfig::default()
        });
        let a = drv.bind(Arc::new(MockHost::new()), DeviceProfile::FABRIC).unwrap();
        let b = drv.bind(Arc::new(MockHost::new()), DeviceProfile::FABRIC).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(
            drv.bind(Arc::new(MockHost::new()), DeviceProfile::FABRIC),
            Err(AsicError::NoMinor)
        );

        drv.remove(a).unwrap();
        assert_eq!(drv.remove(a), Err(AsicError::NoDevice));
        assert_eq!(
            drv.bind(Arc::new(MockHost::new()), DeviceProfile::FABRIC),
            Ok(0)
        );
        assert_eq!(drv.len(), 2);
    }

    #[test]
    fn test_failed_bind_frees_minor() {
        let drv = AsicDriver::new(AsicConfig {
            max_devices: 1,
            ..AsicConfig::default()
        });
        let host = Arc::new(
            MockHost::new()
                .with_bar(0, 0x8000_0000, 0x1000)
                .with_bar(1, 0x9000_0000, 0x1000)
                .fail_map_bar(1),
        );
        assert_eq!(
            drv.bind(host.clone(), DeviceProfile::FABRIC),
            Err(AsicError::ResourceUnavailable)
        );
        assert_eq!(host.mapped_bars(), 0);
        assert!(drv.is_empty());
        assert!(drv.bind(Arc::new(MockHost::new()), DeviceProfile::FABRIC).is_ok());
    }

    #[test]
    fn test_remove_invalidates_sessions() {
        let drv = AsicDriver::new(AsicConfig::default());
        let minor = drv
            .bind(Arc::new(MockHost::new().with_msi(2)), DeviceProfile::FABRIC)
            .unwrap();
        let mut session = drv.open(minor).unwrap();
        drv.remove(minor).unwrap();

        assert_eq!(nonblock(&mut session, 2), Err(AsicError::NoDevice));
        assert_eq!(session.write(&0i32.to_ne_bytes()), Err(AsicError::NoDevice));
        assert_eq!(drv.open(minor).map(|_| ()), Err(AsicError::NoDevice));
        drop(session);
    }

    #[test]
    fn test_global_driver() {
        let drv = init(AsicConfig::default());
        assert!(core::ptr::eq(drv, driver().unwrap()));
        assert_eq!(drv.config().max_devices, 16);
    }
}
