/*!
 * Classic CAN frame with the identifier flags packed into the id word
 */

use std::fmt;

use embedded_can::{ExtendedId, Id, StandardId};

/// Extended frame format flag (29-bit ID)
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Remote transmission request flag
pub const CAN_RTR_FLAG: u32 = 0x4000_0000;
/// Error frame flag
pub const CAN_ERR_FLAG: u32 = 0x2000_0000;

/// Valid bits of a standard identifier
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// Valid bits of an extended identifier
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

/// Maximum payload of a classic CAN frame
pub const CAN_MAX_DLEN: usize = 8;

/// A classic CAN frame as it travels through an adapter.
///
/// `can_id` holds the identifier together with the EFF/RTR/ERR flags, the same
/// layout SocketCAN and GS-USB use on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanFrame {
    pub can_id: u32,
    // Data Length Code, 0 to 8
    pub len: u8,
    // Unused bytes are zero
    pub data: [u8; CAN_MAX_DLEN],
}

impl CanFrame {
    /// Build a frame from a flagged id word and up to 8 payload bytes.
    /// Bytes past the eighth are dropped.
    pub fn new(can_id: u32, payload: &[u8]) -> Self {
        let len = payload.len().min(CAN_MAX_DLEN);
        let mut data = [0u8; CAN_MAX_DLEN];
        data[..len].copy_from_slice(&payload[..len]);
        CanFrame {
            can_id,
            len: len as u8,
            data,
        }
    }

    /// The identifier with the flag bits removed.
    pub fn arbitration_id(&self) -> u32 {
        if self.is_extended() {
            self.can_id & CAN_EFF_MASK
        } else {
            self.can_id & CAN_SFF_MASK
        }
    }

    /// The identifier with RTR/ERR removed but the EFF bit kept, as DBC files store it.
    pub fn message_id(&self) -> u32 {
        self.can_id & (CAN_EFF_FLAG | CAN_EFF_MASK)
    }

    pub fn is_extended(&self) -> bool {
        self.can_id & CAN_EFF_FLAG != 0
    }

    pub fn is_remote(&self) -> bool {
        self.can_id & CAN_RTR_FLAG != 0
    }

    pub fn is_error(&self) -> bool {
        self.can_id & CAN_ERR_FLAG != 0
    }

    /// Neither a remote request nor an error frame.
    pub fn is_data(&self) -> bool {
        self.can_id & (CAN_RTR_FLAG | CAN_ERR_FLAG) == 0
    }

    /// The valid part of the payload.
    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.len as usize).min(CAN_MAX_DLEN)]
    }
}

impl embedded_can::Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > CAN_MAX_DLEN {
            return None;
        }
        let can_id = match id.into() {
            Id::Standard(id) => id.as_raw() as u32,
            Id::Extended(id) => id.as_raw() | CAN_EFF_FLAG,
        };
        Some(CanFrame::new(can_id, data))
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > CAN_MAX_DLEN {
            return None;
        }
        let mut frame = <CanFrame as embedded_can::Frame>::new(id, &[])?;
        frame.can_id |= CAN_RTR_FLAG;
        frame.len = dlc as u8;
        Some(frame)
    }

    fn is_extended(&self) -> bool {
        CanFrame::is_extended(self)
    }

    fn is_remote_frame(&self) -> bool {
        CanFrame::is_remote(self)
    }

    fn id(&self) -> Id {
        if CanFrame::is_extended(self) {
            // masked to 29 bits, always valid
            ExtendedId::new(self.arbitration_id())
                .map(Id::Extended)
                .unwrap_or(Id::Extended(ExtendedId::ZERO))
        } else {
            StandardId::new(self.arbitration_id() as u16)
                .map(Id::Standard)
                .unwrap_or(Id::Standard(StandardId::ZERO))
        }
    }

    fn dlc(&self) -> usize {
        self.len as usize
    }

    fn data(&self) -> &[u8] {
        if CanFrame::is_remote(self) {
            &[]
        } else {
            self.payload()
        }
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>8X}   [{}]  ", self.arbitration_id(), self.len)?;
        if self.is_remote() {
            return f.write_str("remote request");
        }
        if self.is_error() {
            f.write_str("error ")?;
        }
        let mut first = true;
        for byte in self.payload() {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
            first = false;
        }
        Ok(())
    }
}
