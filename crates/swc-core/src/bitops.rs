//! Single-bit field codec shared by every register-backed attribute.

use thiserror::Error;
use tracing::debug;

/// Width of the window scanned for the field position.
pub const FIELD_WINDOW_BITS: u32 = 8;

/// Errors produced by the field codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BitOpsError {
    /// Mask is zero or has no set bit inside the 8-bit window.
    #[error("invalid field mask {mask:#x}")]
    InvalidMask { mask: u32 },
}

/// Mapping between the hardware bit and the logical value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Bit set means `true`.
    Direct,
    /// Active low: bit clear means `true`.
    Inverted,
}

/// Index of the lowest set bit of `mask` within the field window.
pub fn field_shift(mask: u32) -> Result<u32, BitOpsError> {
    (0..FIELD_WINDOW_BITS)
        .find(|shift| mask & (1 << shift) != 0)
        .ok_or(BitOpsError::InvalidMask { mask })
}

/// Decode the logical value of the field selected by `mask` from `raw`.
pub fn decode(raw: u32, mask: u32, polarity: Polarity) -> Result<bool, BitOpsError> {
    let shift = field_shift(mask)?;
    let bit = (raw >> shift) & 1;
    let value = match polarity {
        Polarity::Direct => bit == 1,
        Polarity::Inverted => bit == 0,
    };
    debug!(raw, mask, shift, ?polarity, value, "decode field");
    Ok(value)
}

/// Encode `value` into the field position selected by `mask`. Bits outside the
/// mask are zero; merging with the rest of the register is left to the
/// register service.
pub fn encode(value: bool, mask: u32, polarity: Polarity) -> Result<u32, BitOpsError> {
    let shift = field_shift(mask)?;
    let bit = u32::from(value ^ (polarity == Polarity::Inverted));
    let raw = (bit << shift) & mask;
    debug!(value, mask, shift, ?polarity, raw, "encode field");
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_bit_masks() -> impl Iterator<Item = u32> {
        (0..FIELD_WINDOW_BITS).map(|p| 1 << p)
    }

    #[test]
    fn active_low_law() {
        for mask in single_bit_masks() {
            assert!(decode(0, mask, Polarity::Inverted).expect("decode"));
            assert!(!decode(mask, mask, Polarity::Inverted).expect("decode"));
        }
    }

    #[test]
    fn bit_two_scenario() {
        assert!(!decode(0b0000_0100, 0b0000_0100, Polarity::Inverted).expect("decode"));
        assert!(decode(0b0000_0000, 0b0000_0100, Polarity::Inverted).expect("decode"));
        assert!(decode(0b0000_0100, 0b0000_0100, Polarity::Direct).expect("decode"));
    }

    #[test]
    fn ignores_neighbouring_bits() {
        // Only bit 3 matters, the rest of the register is noise.
        assert!(decode(0b1111_0111, 0b0000_1000, Polarity::Inverted).expect("decode"));
        assert!(!decode(0b0000_1000, 0b0000_1000, Polarity::Inverted).expect("decode"));
    }

    #[test]
    fn round_trips_through_register_value() {
        for mask in single_bit_masks().chain([0b0000_0110, 0b1100_0000, 0xFF]) {
            for polarity in [Polarity::Direct, Polarity::Inverted] {
                for value in [false, true] {
                    let raw = encode(value, mask, polarity).expect("encode");
                    assert_eq!(raw & !mask, 0, "encode must stay inside the mask");
                    assert_eq!(decode(raw, mask, polarity).expect("decode"), value);
                }
            }
        }
    }

    #[test]
    fn inverted_encode_clears_bit_for_true() {
        assert_eq!(encode(true, 0b0001_0000, Polarity::Inverted).expect("encode"), 0);
        assert_eq!(
            encode(false, 0b0001_0000, Polarity::Inverted).expect("encode"),
            0b0001_0000
        );
    }

    #[test]
    fn shift_uses_lowest_set_bit() {
        assert_eq!(field_shift(0b0110_0000).expect("shift"), 5);
        assert_eq!(field_shift(0x01).expect("shift"), 0);
        assert_eq!(field_shift(0x80).expect("shift"), 7);
    }

    #[test]
    fn rejects_masks_outside_window() {
        for mask in [0, 0x100, 0xF00] {
            assert_eq!(
                decode(0, mask, Polarity::Inverted).unwrap_err(),
                BitOpsError::InvalidMask { mask }
            );
            assert!(matches!(
                encode(true, mask, Polarity::Direct),
                Err(BitOpsError::InvalidMask { .. })
            ));
        }
    }
}
