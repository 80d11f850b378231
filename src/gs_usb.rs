/*!
 * GS-USB (candleLight firmware) adapter driver over libusb
 */

use std::fmt;
use std::time::Duration;

use log::{debug, info, trace};
use rusb::{Device, DeviceHandle, GlobalContext};

use crate::adapter::{AdapterMode, CanAdapter};
use crate::can_frame::{CanFrame, CAN_MAX_DLEN};
use crate::errors::{AdapterError, DiscoveryError};

/// Known GS-USB vendor/product pairs: GS-USB, candleLight, CES CANext FD,
/// ABE CANdebugger FD.
pub const GS_USB_DEVICES: [(u16, u16); 4] = [
    (0x1D50, 0x606F),
    (0x1209, 0x2323),
    (0x1CD2, 0x606F),
    (0x16D0, 0x10B8),
];

// Control requests
const GS_USB_BREQ_BITTIMING: u8 = 1;
const GS_USB_BREQ_MODE: u8 = 2;
const GS_USB_BREQ_BT_CONST: u8 = 4;

// Host to device | vendor | interface, and the reverse
const GS_USB_REQ_OUT: u8 = 0x41;
const GS_USB_REQ_IN: u8 = 0xC1;

const GS_USB_ENDPOINT_OUT: u8 = 0x02;
const GS_USB_ENDPOINT_IN: u8 = 0x81;

const GS_CAN_MODE_RESET: u32 = 0;
const GS_CAN_MODE_START: u32 = 1;

pub const GS_CAN_MODE_NORMAL: u32 = 0;
pub const GS_CAN_MODE_LISTEN_ONLY: u32 = 1 << 0;
pub const GS_CAN_MODE_LOOP_BACK: u32 = 1 << 1;

pub const GS_CAN_FEATURE_LISTEN_ONLY: u32 = 1 << 0;
pub const GS_CAN_FEATURE_LOOP_BACK: u32 = 1 << 1;

const GS_USB_ECHO_ID: u32 = 0;
/// Echo id of frames that came from the bus rather than from our own TX
pub const GS_USB_RX_ECHO_ID: u32 = 0xFFFF_FFFF;

pub const GS_USB_FRAME_SIZE: usize = 20;
const GS_USB_FRAME_SIZE_HW_TIMESTAMP: usize = 24;

const BT_CONST_SIZE: usize = 40;
const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);
const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Sample point targeted by the bit timing search.
const SAMPLE_POINT: f64 = 0.875;

fn le_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

/// Bit timing limits and features reported by `BT_CONST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapability {
    pub feature: u32,
    /// CAN controller clock in Hz
    pub fclk_can: u32,
    pub tseg1_min: u32,
    pub tseg1_max: u32,
    pub tseg2_min: u32,
    pub tseg2_max: u32,
    pub sjw_max: u32,
    pub brp_min: u32,
    pub brp_max: u32,
    pub brp_inc: u32,
}

impl DeviceCapability {
    pub fn from_bytes(data: &[u8]) -> Result<Self, AdapterError> {
        if data.len() < BT_CONST_SIZE {
            return Err(AdapterError::ShortTransfer {
                expected: BT_CONST_SIZE,
                actual: data.len(),
            });
        }
        Ok(DeviceCapability {
            feature: le_u32(data, 0),
            fclk_can: le_u32(data, 4),
            tseg1_min: le_u32(data, 8),
            tseg1_max: le_u32(data, 12),
            tseg2_min: le_u32(data, 16),
            tseg2_max: le_u32(data, 20),
            sjw_max: le_u32(data, 24),
            brp_min: le_u32(data, 28),
            brp_max: le_u32(data, 32),
            brp_inc: le_u32(data, 36),
        })
    }

    /// Mode flags to request for `mode`, if the device can do it.
    pub fn mode_flags(&self, mode: AdapterMode) -> Option<u32> {
        match mode {
            AdapterMode::Normal => Some(GS_CAN_MODE_NORMAL),
            AdapterMode::LoopBack if self.feature & GS_CAN_FEATURE_LOOP_BACK != 0 => Some(GS_CAN_MODE_LOOP_BACK),
            AdapterMode::ListenOnly if self.feature & GS_CAN_FEATURE_LISTEN_ONLY != 0 => {
                Some(GS_CAN_MODE_LISTEN_ONLY)
            }
            _ => None,
        }
    }
}

/// Payload of the `BITTIMING` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    pub prop_seg: u32,
    pub phase_seg1: u32,
    pub phase_seg2: u32,
    pub sjw: u32,
    pub brp: u32,
}

impl BitTiming {
    /// Pick a timing for `bitrate` with the sample point near 87.5 %.
    ///
    /// Prescalers are tried from the smallest up; the first one giving a
    /// whole number of 8 to 25 time quanta that fits the segment limits wins.
    pub fn for_bitrate(cap: &DeviceCapability, bitrate: u32) -> Option<BitTiming> {
        if bitrate == 0 {
            return None;
        }
        let clock = cap.fclk_can as u64;
        let step = cap.brp_inc.max(1);
        let mut brp = cap.brp_min.max(1);
        while brp <= cap.brp_max {
            let divisor = bitrate as u64 * brp as u64;
            if clock % divisor == 0 {
                let tq = clock / divisor;
                if (8..=25).contains(&tq) {
                    let tseg1 = (tq as f64 * SAMPLE_POINT).round() as u64 - 1;
                    let tseg2 = tq - 1 - tseg1;
                    let fits = tseg1 >= 2
                        && (cap.tseg1_min as u64..=cap.tseg1_max as u64).contains(&tseg1)
                        && (cap.tseg2_min as u64..=cap.tseg2_max as u64).contains(&tseg2);
                    if fits {
                        return Some(BitTiming {
                            prop_seg: 1,
                            phase_seg1: tseg1 as u32 - 1,
                            phase_seg2: tseg2 as u32,
                            sjw: 1,
                            brp,
                        });
                    }
                }
            }
            brp += step;
        }
        None
    }

    pub fn to_bytes(&self) -> [u8; 20] {
        let mut buf = [0u8; 20];
        buf[0..4].copy_from_slice(&self.prop_seg.to_le_bytes());
        buf[4..8].copy_from_slice(&self.phase_seg1.to_le_bytes());
        buf[8..12].copy_from_slice(&self.phase_seg2.to_le_bytes());
        buf[12..16].copy_from_slice(&self.sjw.to_le_bytes());
        buf[16..20].copy_from_slice(&self.brp.to_le_bytes());
        buf
    }
}

fn mode_bytes(mode: u32, flags: u32) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&mode.to_le_bytes());
    buf[4..8].copy_from_slice(&flags.to_le_bytes());
    buf
}

/// A classic CAN frame as it crosses the bulk endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostFrame {
    pub echo_id: u32,
    pub can_id: u32,
    pub can_dlc: u8,
    pub channel: u8,
    pub flags: u8,
    pub data: [u8; CAN_MAX_DLEN],
}

impl HostFrame {
    pub fn from_frame(frame: &CanFrame, channel: u8) -> Self {
        HostFrame {
            echo_id: GS_USB_ECHO_ID,
            can_id: frame.can_id,
            can_dlc: frame.len,
            channel,
            flags: 0,
            data: frame.data,
        }
    }

    /// Parse a bulk IN transfer, with or without the hardware timestamp.
    pub fn from_bytes(data: &[u8]) -> Result<Self, AdapterError> {
        if data.len() < GS_USB_FRAME_SIZE {
            return Err(AdapterError::ShortTransfer {
                expected: GS_USB_FRAME_SIZE,
                actual: data.len(),
            });
        }
        let mut payload = [0u8; CAN_MAX_DLEN];
        payload.copy_from_slice(&data[12..20]);
        Ok(HostFrame {
            echo_id: le_u32(data, 0),
            can_id: le_u32(data, 4),
            can_dlc: data[8],
            channel: data[9],
            flags: data[10],
            data: payload,
        })
    }

    pub fn to_bytes(&self) -> [u8; GS_USB_FRAME_SIZE] {
        let mut buf = [0u8; GS_USB_FRAME_SIZE];
        buf[0..4].copy_from_slice(&self.echo_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.can_id.to_le_bytes());
        buf[8] = self.can_dlc;
        buf[9] = self.channel;
        buf[10] = self.flags;
        buf[12..20].copy_from_slice(&self.data);
        buf
    }

    /// Frames we sent come back with the echo id we gave them.
    pub fn is_echo(&self) -> bool {
        self.echo_id != GS_USB_RX_ECHO_ID
    }

    pub fn to_frame(&self) -> CanFrame {
        let len = (self.can_dlc as usize).min(CAN_MAX_DLEN);
        CanFrame::new(self.can_id, &self.data[..len])
    }
}

pub fn is_gs_usb_device(vendor_id: u16, product_id: u16) -> bool {
    GS_USB_DEVICES.contains(&(vendor_id, product_id))
}

/// Find attached GS-USB adapters, in bus order. An empty list is not an error.
pub fn scan() -> Result<Vec<GsUsb>, DiscoveryError> {
    let mut found = Vec::new();
    for device in rusb::devices()?.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!("Skipping device {}:{}: {}", device.bus_number(), device.address(), e);
                continue;
            }
        };
        if is_gs_usb_device(descriptor.vendor_id(), descriptor.product_id()) {
            let adapter = GsUsb::new(device, descriptor.vendor_id(), descriptor.product_id());
            info!("Found {}", adapter);
            found.push(adapter);
        }
    }
    Ok(found)
}

/// One GS-USB adapter, channel 0. The USB handle is opened on first use.
pub struct GsUsb {
    device: Device<GlobalContext>,
    vendor_id: u16,
    product_id: u16,
    handle: Option<DeviceHandle<GlobalContext>>,
    capability: Option<DeviceCapability>,
    started: bool,
}

impl GsUsb {
    fn new(device: Device<GlobalContext>, vendor_id: u16, product_id: u16) -> Self {
        GsUsb {
            device,
            vendor_id,
            product_id,
            handle: None,
            capability: None,
            started: false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    fn handle(&mut self) -> Result<&DeviceHandle<GlobalContext>, AdapterError> {
        if self.handle.is_none() {
            let handle = self.device.open()?;
            // Not supported on every platform
            if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
                debug!("Kernel driver auto-detach unavailable: {}", e);
            }
            handle.claim_interface(0)?;
            self.handle = Some(handle);
        }
        self.handle
            .as_ref()
            .ok_or(AdapterError::Usb(rusb::Error::NoDevice))
    }

    /// Timing limits and features, read once from the device.
    pub fn capability(&mut self) -> Result<DeviceCapability, AdapterError> {
        if let Some(capability) = self.capability {
            return Ok(capability);
        }
        let mut buf = [0u8; BT_CONST_SIZE];
        let n = self
            .handle()?
            .read_control(GS_USB_REQ_IN, GS_USB_BREQ_BT_CONST, 0, 0, &mut buf, CONTROL_TIMEOUT)?;
        let capability = DeviceCapability::from_bytes(&buf[..n])?;
        debug!("{} capability {:?}", self, capability);
        self.capability = Some(capability);
        Ok(capability)
    }
}

impl fmt::Display for GsUsb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gs_usb {:04x}:{:04x} (bus {} address {})",
            self.vendor_id,
            self.product_id,
            self.device.bus_number(),
            self.device.address()
        )
    }
}

impl fmt::Debug for GsUsb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GsUsb")
            .field("vendor_id", &self.vendor_id)
            .field("product_id", &self.product_id)
            .field("bus", &self.device.bus_number())
            .field("address", &self.device.address())
            .field("started", &self.started)
            .finish()
    }
}

impl CanAdapter for GsUsb {
    /// Reset the channel. Failures are logged only; the device may be gone.
    fn stop(&mut self) {
        let reset = mode_bytes(GS_CAN_MODE_RESET, 0);
        let result = self.handle().and_then(|handle| {
            handle
                .write_control(GS_USB_REQ_OUT, GS_USB_BREQ_MODE, 0, 0, &reset, CONTROL_TIMEOUT)
                .map_err(AdapterError::from)
        });
        if let Err(e) = result {
            debug!("Reset of {} failed: {}", self, e);
        }
        self.started = false;
    }

    fn set_bitrate(&mut self, bitrate: u32) -> Result<(), AdapterError> {
        let capability = self.capability()?;
        let timing = BitTiming::for_bitrate(&capability, bitrate).ok_or(AdapterError::UnsupportedBitrate {
            bitrate,
            clock: capability.fclk_can,
        })?;
        debug!("{} bit timing {:?}", self, timing);
        self.handle()?.write_control(
            GS_USB_REQ_OUT,
            GS_USB_BREQ_BITTIMING,
            0,
            0,
            &timing.to_bytes(),
            CONTROL_TIMEOUT,
        )?;
        Ok(())
    }

    fn start(&mut self, mode: AdapterMode) -> Result<(), AdapterError> {
        let capability = self.capability()?;
        let flags = capability
            .mode_flags(mode)
            .ok_or(AdapterError::UnsupportedMode(mode))?;
        self.handle()?.write_control(
            GS_USB_REQ_OUT,
            GS_USB_BREQ_MODE,
            0,
            0,
            &mode_bytes(GS_CAN_MODE_START, flags),
            CONTROL_TIMEOUT,
        )?;
        self.started = true;
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), AdapterError> {
        if !self.started {
            return Err(AdapterError::NotStarted);
        }
        let bytes = HostFrame::from_frame(frame, 0).to_bytes();
        let written = self.handle()?.write_bulk(GS_USB_ENDPOINT_OUT, &bytes, SEND_TIMEOUT)?;
        if written != bytes.len() {
            return Err(AdapterError::ShortTransfer {
                expected: bytes.len(),
                actual: written,
            });
        }
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<CanFrame>, AdapterError> {
        if !self.started {
            return Err(AdapterError::NotStarted);
        }
        let mut buf = [0u8; GS_USB_FRAME_SIZE_HW_TIMESTAMP];
        // libusb treats a zero timeout as "wait forever"
        let timeout = timeout.max(Duration::from_millis(1));
        let n = match self.handle()?.read_bulk(GS_USB_ENDPOINT_IN, &mut buf, timeout) {
            Ok(n) => n,
            Err(rusb::Error::Timeout) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let host_frame = HostFrame::from_bytes(&buf[..n])?;
        if host_frame.is_echo() {
            trace!("echo {:?}", host_frame);
        }
        Ok(Some(host_frame.to_frame()))
    }
}

impl Drop for GsUsb {
    fn drop(&mut self) {
        if self.started {
            self.stop();
        }
        if let Some(handle) = self.handle.as_ref() {
            if let Err(e) = handle.release_interface(0) {
                debug!("Releasing interface of {} failed: {}", self, e);
            }
        }
    }
}
