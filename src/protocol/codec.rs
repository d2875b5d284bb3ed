//! Little-endian field codec.
//!
//! Writes go out as fixed-width little-endian integers. Advertisement fields
//! are two bytes combined little-endian, where a `0xFF` in either byte marks
//! the value as not present.

/// Scale applied to fixed-point temperature, oxygen and pressure fields.
pub const FIXED_POINT_SCALE: f64 = 128.0;

/// Byte value that marks a field as not present.
pub const SENTINEL: u8 = 0xFF;

/// Width of a writable characteristic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldWidth {
    /// One byte.
    U8,
    /// Two bytes, little-endian.
    U16,
    /// Four bytes, little-endian.
    U32,
}

impl FieldWidth {
    /// Number of bytes written for this width.
    pub fn byte_len(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Largest value that fits without truncation.
    pub fn max_value(self) -> u32 {
        match self {
            Self::U8 => u32::from(u8::MAX),
            Self::U16 => u32::from(u16::MAX),
            Self::U32 => u32::MAX,
        }
    }
}

/// Encode a value as fixed-width little-endian bytes.
///
/// Values wider than `width` keep their low-order bytes.
pub fn encode_le(value: u32, width: FieldWidth) -> Vec<u8> {
    value.to_le_bytes()[..width.byte_len()].to_vec()
}

/// Decode up to four little-endian bytes into an unsigned value.
///
/// Returns `None` for an empty slice or one longer than four bytes.
pub fn decode_le(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() || bytes.len() > 4 {
        return None;
    }
    let mut buf = [0u8; 4];
    buf[..bytes.len()].copy_from_slice(bytes);
    Some(u32::from_le_bytes(buf))
}

/// Read the two raw bytes of a field at `offset`, if in range.
#[inline]
pub fn field_bytes(data: &[u8], offset: usize) -> Option<[u8; 2]> {
    let lo = *data.get(offset)?;
    let hi = *data.get(offset + 1)?;
    Some([lo, hi])
}

/// True when either byte of a field is the sentinel.
#[inline]
pub fn is_sentinel(bytes: [u8; 2]) -> bool {
    bytes[0] == SENTINEL || bytes[1] == SENTINEL
}

/// Read an unsigned 16-bit field, treating sentinels as missing.
pub fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    field_bytes(data, offset)
        .filter(|b| !is_sentinel(*b))
        .map(u16::from_le_bytes)
}

/// Read an unsigned fixed-point field scaled by 1/128.
pub fn read_unsigned_scaled(data: &[u8], offset: usize) -> Option<f64> {
    read_u16(data, offset).map(|raw| f64::from(raw) / FIXED_POINT_SCALE)
}

/// Read a signed fixed-point field scaled by 1/128.
pub fn read_signed_scaled(data: &[u8], offset: usize) -> Option<f64> {
    read_u16(data, offset).map(|raw| f64::from(raw as i16) / FIXED_POINT_SCALE)
}

/// Read the 32-bit word carried by a characteristic value.
///
/// Some firmware revisions prepend a two-byte header; values longer than four
/// bytes drop it before decoding.
pub fn read_prefixed_u32(data: &[u8]) -> Option<u32> {
    let body = if data.len() > 4 { &data[2..] } else { data };
    decode_le(&body[..body.len().min(4)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_widths() {
        assert_eq!(encode_le(0x1234_5678, FieldWidth::U32), vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(encode_le(0x1234, FieldWidth::U16), vec![0x34, 0x12]);
        assert_eq!(encode_le(0, FieldWidth::U8), vec![0x00]);
        // Truncates to the low-order bytes.
        assert_eq!(encode_le(0x0001_0203, FieldWidth::U16), vec![0x03, 0x02]);
    }

    #[test]
    fn test_decode_le_bounds() {
        assert_eq!(decode_le(&[]), None);
        assert_eq!(decode_le(&[1, 2, 3, 4, 5]), None);
        assert_eq!(decode_le(&[0x34, 0x12]), Some(0x1234));
    }

    #[test]
    fn test_sentinel_fields() {
        let data = [0x00, 0x80, 0xFF, 0x10, 0x10, 0xFF];
        assert_eq!(read_u16(&data, 0), Some(0x8000));
        assert_eq!(read_u16(&data, 2), None);
        assert_eq!(read_u16(&data, 4), None);
        assert_eq!(read_u16(&data, 5), None);
    }

    #[test]
    fn test_scaled_reads() {
        // 0x0A00 = 2560 / 128 = 20.0
        let data = [0x00, 0x0A];
        assert_eq!(read_unsigned_scaled(&data, 0), Some(20.0));
        assert_eq!(read_signed_scaled(&data, 0), Some(20.0));

        // 0xFE00 as i16 = -512 / 128 = -4.0
        let negative = [0x00, 0xFE];
        assert_eq!(read_signed_scaled(&negative, 0), Some(-4.0));
        assert_eq!(read_unsigned_scaled(&negative, 0), Some(508.0));
    }

    #[test]
    fn test_prefixed_u32() {
        assert_eq!(read_prefixed_u32(&[0x10, 0x00, 0x00, 0x00]), Some(16));
        assert_eq!(
            read_prefixed_u32(&[0xAA, 0xBB, 0x10, 0x00, 0x00, 0x00]),
            Some(16)
        );
        assert_eq!(read_prefixed_u32(&[0x05]), Some(5));
        assert_eq!(read_prefixed_u32(&[]), None);
    }

    proptest! {
        #[test]
        fn prop_u8_round_trip(value: u8) {
            let bytes = encode_le(u32::from(value), FieldWidth::U8);
            prop_assert_eq!(decode_le(&bytes), Some(u32::from(value)));
        }

        #[test]
        fn prop_u16_round_trip(value: u16) {
            let bytes = encode_le(u32::from(value), FieldWidth::U16);
            prop_assert_eq!(bytes.len(), 2);
            prop_assert_eq!(decode_le(&bytes), Some(u32::from(value)));
        }

        #[test]
        fn prop_u32_round_trip(value: u32) {
            let bytes = encode_le(value, FieldWidth::U32);
            prop_assert_eq!(decode_le(&bytes), Some(value));
        }

        #[test]
        fn prop_signed_field_matches_i16(value: i16) {
            let bytes = value.to_le_bytes();
            prop_assume!(!is_sentinel(bytes));
            let decoded = read_signed_scaled(&bytes, 0).unwrap();
            prop_assert!((decoded - f64::from(value) / 128.0).abs() < f64::EPSILON);
        }
    }
}
