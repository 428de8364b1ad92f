//! # Control Requests
//!
//! Discrete requests issued on an open session. Each command carries a
//! fixed-size payload of native-endian fields; the payload size is encoded
//! in the command number and checked before anything is decoded.
//!
//! ```text
//!  31 30 29          16 15      8 7       0
//! ┌─────┬──────────────┬─────────┬─────────┐
//! │ dir │ payload size │  magic  │ number  │
//! └─────┴──────────────┴─────────┴─────────┘
//! ```
//!
//! | Command             | In                  | Out          |
//! |---------------------|---------------------|--------------|
//! | `Translate`         | `{phys: u64, size: u64}` | `{bus: u64, size: u64}` |
//! | `Release`           | `{bus: u64, size: u64}`  | -            |
//! | `GetMode`           | -                   | `mode: u32`  |
//! | `SetPacketVector`   | `vector: u32`       | -            |

use crate::bridge;
use crate::device::Device;
use crate::error::{AsicError, AsicResult};

/// Command type byte.
pub const MAGIC: u8 = b'A';

const DIR_WRITE: u32 = 1;
const DIR_READ: u32 = 2;

const fn encode(dir: u32, nr: u8, size: usize) -> u32 {
    (dir << 30) | ((size as u32 & 0x3fff) << 16) | ((MAGIC as u32) << 8) | nr as u32
}

/// Payload of the DMA commands: an address and a length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaRequest {
    /// Physical address going in, bus address coming out of `Translate`
    pub addr: u64,
    /// Length in bytes
    pub size: u64,
}

impl DmaRequest {
    pub const LEN: usize = 16;

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let addr = u64::from_ne_bytes(bytes[0..8].try_into().ok()?);
        let size = u64::from_ne_bytes(bytes[8..16].try_into().ok()?);
        Some(Self { addr, size })
    }

    pub fn encode(&self, out: &mut [u8]) -> AsicResult<()> {
        if out.len() != Self::LEN {
            return Err(AsicError::BadLength {
                expected: Self::LEN,
                actual: out.len(),
            });
        }
        out[0..8].copy_from_slice(&self.addr.to_ne_bytes());
        out[8..16].copy_from_slice(&self.size.to_ne_bytes());
        Ok(())
    }
}

/// Control command numbers.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Translate = encode(DIR_READ | DIR_WRITE, 1, DmaRequest::LEN),
    Release = encode(DIR_WRITE, 2, DmaRequest::LEN),
    GetMode = encode(DIR_READ, 3, 4),
    SetPacketVector = encode(DIR_WRITE, 4, 4),
}

impl ControlCommand {
    pub fn from_raw(raw: u32) -> Option<Self> {
        [
            Self::Translate,
            Self::Release,
            Self::GetMode,
            Self::SetPacketVector,
        ]
        .into_iter()
        .find(|cmd| (*cmd as u32) == raw)
    }

    /// Exact payload size this command expects.
    pub const fn payload_len(self) -> usize {
        (((self as u32) >> 16) & 0x3fff) as usize
    }
}

fn read_u32(payload: &[u8]) -> AsicResult<u32> {
    let raw: [u8; 4] = payload.try_into().map_err(|_| AsicError::InvalidArgument)?;
    Ok(u32::from_ne_bytes(raw))
}

/// Decodes and executes one request against `dev`.
///
/// Returns the number of payload bytes written back.
pub fn dispatch(dev: &Device, cmd: u32, payload: &mut [u8]) -> AsicResult<usize> {
    let command = ControlCommand::from_raw(cmd).ok_or(AsicError::UnknownCommand(cmd))?;
    let expected = command.payload_len();
    if payload.len() != expected {
        return Err(AsicError::BadLength {
            expected,
            actual: payload.len(),
        });
    }

    match command {
        ControlCommand::Translate => {
            let req = DmaRequest::decode(payload).ok_or(AsicError::InvalidArgument)?;
            let mapping = bridge::translate(dev, req.addr, req.size)?;
            DmaRequest {
                addr: mapping.bus,
                size: mapping.size,
            }
            .encode(payload)?;
            Ok(DmaRequest::LEN)
        }
        ControlCommand::Release => {
            let req = DmaRequest::decode(payload).ok_or(AsicError::InvalidArgument)?;
            bridge::release(dev, req.addr, req.size)?;
            Ok(0)
        }
        ControlCommand::GetMode => {
            let mode = bridge::interrupt_mode(dev)?;
            payload.copy_from_slice(&(mode as u32).to_ne_bytes());
            Ok(4)
        }
        ControlCommand::SetPacketVector => {
            bridge::set_packet_vector(dev, read_u32(payload)?)?;
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AsicConfig, DeviceProfile};
    use crate::listener::Session;
    use crate::mock::MockHost;
    use crate::negotiate::InterruptMode;
    use alloc::sync::Arc;

    fn attach(host: MockHost, profile: DeviceProfile) -> (Arc<MockHost>, Arc<Device>) {
        let host = Arc::new(host);
        let dev = Device::attach(0, host.clone(), profile, &AsicConfig::default()).expect("attach");
        (host, dev)
    }

    #[test]
    fn test_command_encoding() {
        assert_eq!(ControlCommand::Translate.payload_len(), 16);
        assert_eq!(ControlCommand::GetMode.payload_len(), 4);
        assert_eq!(((ControlCommand::GetMode as u32) >> 8) & 0xff, MAGIC as u32);
        assert_eq!(
            ControlCommand::from_raw(ControlCommand::Release as u32),
            Some(ControlCommand::Release)
        );
        assert_eq!(ControlCommand::from_raw(0), None);
    }

    #[test]
    fn test_translate_and_release_over_session() {
        let (host, dev) = attach(MockHost::new(), DeviceProfile::FABRIC);
        let mut session = Session::open(&dev).unwrap();

        let mut payload = [0u8; DmaRequest::LEN];
        DmaRequest {
            addr: 0x4000_0000,
            size: 0x2000,
        }
        .encode(&mut payload)
        .unwrap();
        let n = session
            .ioctl(ControlCommand::Translate as u32, &mut payload)
            .unwrap();
        assert_eq!(n, DmaRequest::LEN);
        let out = DmaRequest::decode(&payload).unwrap();
        assert_ne!(out.addr, 0);
        assert_eq!(out.size, 0x2000);
        assert_eq!(host.live_dma(), 1);

        assert_eq!(
            session.ioctl(ControlCommand::Release as u32, &mut payload),
            Ok(0)
        );
        assert_eq!(host.live_dma(), 0);
    }

    #[test]
    fn test_dma_request_buffer_size() {
        let req = DmaRequest {
            addr: 0x1000,
            size: 0x1000,
        };
        let mut short = [0u8; 8];
        assert_eq!(
            req.encode(&mut short),
            Err(AsicError::BadLength {
                expected: 16,
                actual: 8
            })
        );
        assert_eq!(DmaRequest::decode(&short), None);

        let mut exact = [0u8; DmaRequest::LEN];
        req.encode(&mut exact).unwrap();
        assert_eq!(DmaRequest::decode(&exact), Some(req));
    }

    #[test]
    fn test_get_mode() {
        let (_, dev) = attach(MockHost::new().with_msi(2), DeviceProfile::FABRIC);
        let mut payload = [0u8; 4];
        assert_eq!(dispatch(&dev, ControlCommand::GetMode as u32, &mut payload), Ok(4));
        assert_eq!(
            InterruptMode::from_raw(u32::from_ne_bytes(payload)),
            Some(InterruptMode::Msi)
        );
    }

    #[test]
    fn test_set_packet_vector() {
        let (_, dev) = attach(MockHost::new().with_msix(64), DeviceProfile::SWITCH);
        let mut payload = 3u32.to_ne_bytes();
        assert_eq!(
            dispatch(&dev, ControlCommand::SetPacketVector as u32, &mut payload),
            Ok(0)
        );
        assert_eq!(dev.packet_vector(), Some(3));
    }

    #[test]
    fn test_bad_requests() {
        let (_, dev) = attach(MockHost::new(), DeviceProfile::FABRIC);
        let mut short = [0u8; 8];
        assert_eq!(
            dispatch(&dev, ControlCommand::Translate as u32, &mut short),
            Err(AsicError::BadLength {
                expected: 16,
                actual: 8
            })
        );
        assert_eq!(
            dispatch(&dev, 0xdead_beef, &mut short),
            Err(AsicError::UnknownCommand(0xdead_beef))
        );

        let mut zero = [0u8; DmaRequest::LEN];
        assert_eq!(
            dispatch(&dev, ControlCommand::Translate as u32, &mut zero),
            Err(AsicError::InvalidDmaRequest)
        );
    }
}
