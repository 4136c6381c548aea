//! fixed-width concatenation of unsigned integers

#[inline]
pub fn pack16(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

#[inline]
pub fn unpack16(packed: u32) -> (u16, u16) {
    ((packed >> 16) as u16, (packed & 0xFFFF) as u16)
}

#[inline]
pub fn pack32(high: u32, low: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

#[inline]
pub fn unpack32(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, (packed & 0xFFFF_FFFF) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_layout() {
        assert_eq!(pack16(0x1234, 0xABCD), 0x1234_ABCD);
        assert_eq!(pack32(0x1234_5678, 0x9ABC_DEF0), 0x1234_5678_9ABC_DEF0);
        assert_eq!(unpack16(0xFFFF_0001), (0xFFFF, 0x0001));
        assert_eq!(unpack32(0x0000_0001_FFFF_FFFF), (1, u32::MAX));
    }

    #[test]
    fn test_no_sign_extension() {
        // a low half with the top bit set must not bleed into the high half
        let packed = pack32(0, pack16(0, 0x8000));
        assert_eq!(packed, 0x8000);
        assert_eq!(unpack32(packed), (0, 0x8000));
    }
}
