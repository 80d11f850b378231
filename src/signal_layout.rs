/*!
 * Where a DBC signal's bits sit in a CAN payload
 */

/// The part of a signal that lives in one payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSpan {
    pub byte_index: usize,
    /// Lowest bit of the span inside the byte, 0..=7
    pub lsb: u8,
    /// 1..=8
    pub width: u8,
    /// Position of the span's lowest bit in the raw value
    pub raw_shift: u8,
}

impl BitSpan {
    fn mask(&self) -> u8 {
        ((1u16 << self.width) - 1) as u8
    }
}

/// Byte spans of one signal, shared by extraction and packing.
#[derive(Debug, Clone)]
pub struct SignalLayout {
    pub segments: Vec<BitSpan>,
    pub signal_size: u64,
    pub signed: bool,
}

/// Intel order: `start_bit` is the LSB, bits climb through each byte and
/// continue at bit 0 of the next one.
fn intel_spans(start_bit: u64, signal_size: u64) -> Vec<BitSpan> {
    let mut spans = Vec::new();
    let mut byte_index = (start_bit / 8) as usize;
    let mut lsb = (start_bit % 8) as u8;
    let mut placed = 0u64;
    while placed < signal_size {
        let width = (8 - lsb as u64).min(signal_size - placed) as u8;
        spans.push(BitSpan {
            byte_index,
            lsb,
            width,
            raw_shift: placed as u8,
        });
        placed += width as u64;
        byte_index += 1;
        lsb = 0;
    }
    spans
}

/// Motorola order: `start_bit` is the MSB, bits fall through each byte and
/// continue at bit 7 of the next one.
fn motorola_spans(start_bit: u64, signal_size: u64) -> Vec<BitSpan> {
    let mut spans = Vec::new();
    let mut byte_index = (start_bit / 8) as usize;
    let mut msb = (start_bit % 8) as u8;
    let mut left = signal_size;
    while left > 0 {
        let width = (msb as u64 + 1).min(left) as u8;
        left -= width as u64;
        spans.push(BitSpan {
            byte_index,
            lsb: msb + 1 - width,
            width,
            raw_shift: left as u8,
        });
        byte_index += 1;
        msb = 7;
    }
    spans
}

impl SignalLayout {
    pub fn from_spec(spec: &can_dbc::Signal) -> Self {
        let little_endian = matches!(spec.byte_order(), can_dbc::ByteOrder::LittleEndian);
        let signed = matches!(spec.value_type(), can_dbc::ValueType::Signed);
        Self::new(*spec.start_bit(), *spec.signal_size(), little_endian, signed)
    }

    /// Layout from DBC bit numbering. Sizes above 64 bits are cut to 64.
    pub fn new(start_bit: u64, signal_size: u64, little_endian: bool, signed: bool) -> Self {
        let signal_size = signal_size.min(64);
        let segments = if little_endian {
            intel_spans(start_bit, signal_size)
        } else {
            motorola_spans(start_bit, signal_size)
        };
        SignalLayout {
            segments,
            signal_size,
            signed,
        }
    }

    /// Payload bytes needed to hold the whole signal.
    pub fn byte_span(&self) -> usize {
        self.segments
            .iter()
            .map(|span| span.byte_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Raw unsigned value. Missing payload bytes count as zero.
    pub fn extract(&self, data: &[u8]) -> u64 {
        self.segments.iter().fold(0u64, |raw, span| {
            let byte = data.get(span.byte_index).copied().unwrap_or(0);
            let bits = (byte >> span.lsb) & span.mask();
            raw | (bits as u64) << span.raw_shift
        })
    }

    /// Write `raw` into the payload, leaving bits of other signals alone.
    /// Spans beyond the payload are not written.
    pub fn pack(&self, data: &mut [u8], raw: u64) {
        for span in &self.segments {
            if let Some(byte) = data.get_mut(span.byte_index) {
                let mask = span.mask();
                let bits = (raw >> span.raw_shift) as u8 & mask;
                *byte = (*byte & !(mask << span.lsb)) | bits << span.lsb;
            }
        }
    }

    /// Raw bits as an integer, two's complement when the signal is signed.
    pub fn raw_to_integer(&self, raw: u64) -> f64 {
        if !self.signed || self.signal_size == 0 {
            return raw as f64;
        }
        let unused = 64 - self.signal_size;
        (((raw as i64) << unused) >> unused) as f64
    }

    /// Rounded integer cut down to `signal_size` bits.
    pub fn integer_to_raw(&self, value: f64) -> u64 {
        let raw = if self.signed {
            value.round() as i64 as u64
        } else {
            value.round() as u64
        };
        match self.signal_size {
            64.. => raw,
            size => raw & ((1u64 << size) - 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intel_spans() {
        // 12 bits from bit 4: top nibble of byte 0, then all of byte 1
        let layout = SignalLayout::new(4, 12, true, false);
        assert_eq!(
            layout.segments,
            vec![
                BitSpan { byte_index: 0, lsb: 4, width: 4, raw_shift: 0 },
                BitSpan { byte_index: 1, lsb: 0, width: 8, raw_shift: 4 },
            ]
        );
        assert_eq!(layout.byte_span(), 2);
    }

    #[test]
    fn test_motorola_spans() {
        // MSB at bit 15: byte 1 is the high byte, byte 2 the low one
        let layout = SignalLayout::new(15, 16, false, false);
        assert_eq!(
            layout.segments,
            vec![
                BitSpan { byte_index: 1, lsb: 0, width: 8, raw_shift: 8 },
                BitSpan { byte_index: 2, lsb: 0, width: 8, raw_shift: 0 },
            ]
        );
    }

    #[test]
    fn test_motorola_signed_12_bit() {
        // 12 bits, MSB at bit 0: low bit of byte 0 then bits 7..=1 of byte 1
        // and so on. A5 B6 D9 gives 0xDB6, which is -586 signed.
        let data = [0xA5, 0xB6, 0xD9, 0, 0, 0, 0, 0];
        let layout = SignalLayout::new(0, 12, false, true);
        let raw = layout.extract(&data);
        assert_eq!(raw, 0xDB6);
        assert_eq!(layout.raw_to_integer(raw), -586.0);
    }

    #[test]
    fn test_extract_short_payload_reads_zero() {
        let layout = SignalLayout::new(0, 16, true, false);
        assert_eq!(layout.extract(&[0x34]), 0x34);
    }

    #[test]
    fn test_pack_leaves_neighbours() {
        let layout = SignalLayout::new(7, 1, false, false);
        let mut data = [0xFFu8; 8];
        layout.pack(&mut data, 0);
        assert_eq!(data[0], 0x7F);
        assert_eq!(data[1], 0xFF);
    }

    #[test]
    fn test_pack_past_end_is_dropped() {
        let layout = SignalLayout::new(0, 16, true, false);
        let mut data = [0u8; 1];
        layout.pack(&mut data, 0xABCD);
        assert_eq!(data, [0xCD]);
    }

    #[test]
    fn test_full_width_signal() {
        let layout = SignalLayout::new(0, 64, true, true);
        let data = [0x11, 0x22, 0x33, 0x44, 0xFF, 0x66, 0x77, 0x88];
        let raw = layout.extract(&data);
        assert_eq!(raw, 0x887766FF44332211);
        let mut packed = [0u8; 8];
        layout.pack(&mut packed, raw);
        assert_eq!(packed, data);
    }

    #[test]
    fn test_integer_to_raw_twos_complement() {
        let layout = SignalLayout::new(0, 12, true, true);
        assert_eq!(layout.integer_to_raw(-586.0), 0xDB6);
        assert_eq!(layout.raw_to_integer(0xDB6), -586.0);

        let unsigned = SignalLayout::new(0, 8, true, false);
        assert_eq!(unsigned.integer_to_raw(255.0), 255);
        assert_eq!(unsigned.integer_to_raw(256.0), 0);
    }
}
