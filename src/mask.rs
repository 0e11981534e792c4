//! Payload masking as defined in RFC 6455 Section 5.3.
//!
//! Client-to-server frames carry a 4-byte masking key; every payload byte
//! at index `i` is XORed with `key[i % 4]`. The operation is an involution,
//! so the same routine masks and unmasks.

/// Mask or unmask a payload in place.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    apply_mask_words(buf, mask);
}

/// Per-byte reference implementation.
#[inline]
fn apply_mask_bytewise(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Faster variant operating on 4-byte blocks.
///
/// Blocks start at payload index 0, so the key never needs realigning;
/// the tail shorter than one block falls back to the per-byte loop.
#[inline]
fn apply_mask_words(buf: &mut [u8], mask: [u8; 4]) {
    let mask_word = u32::from_ne_bytes(mask);

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes(chunk.try_into().expect("4-byte chunk")) ^ mask_word;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }

    apply_mask_bytewise(chunks.into_remainder(), mask);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_unmask_identity() {
        // Applying the mask twice returns the original data.
        let mask = [0xAA, 0xBB, 0xCC, 0xDD];
        let original = b"Hello, World! This is a test message with various lengths.";

        let mut data = original.to_vec();
        apply_mask(&mut data, mask);
        assert_ne!(&data[..], &original[..]);

        apply_mask(&mut data, mask);
        assert_eq!(&data[..], &original[..]);
    }

    #[test]
    fn test_mask_known_pattern() {
        let mask = [0x12, 0x34, 0x56, 0x78];

        let mut empty: Vec<u8> = vec![];
        apply_mask(&mut empty, mask);
        assert_eq!(empty.len(), 0);

        let mut single = vec![0xAB];
        apply_mask(&mut single, mask);
        assert_eq!(single, vec![0xAB ^ 0x12]);

        let mut three = vec![0xAB, 0xCD, 0xEF];
        apply_mask(&mut three, mask);
        assert_eq!(three, vec![0xAB ^ 0x12, 0xCD ^ 0x34, 0xEF ^ 0x56]);

        // Key wraps modulo 4 past the first block.
        let mut six = vec![0u8; 6];
        apply_mask(&mut six, mask);
        assert_eq!(six, vec![0x12, 0x34, 0x56, 0x78, 0x12, 0x34]);
    }

    #[test]
    fn test_mask_zero_key_is_noop() {
        let mut data = b"Test data".to_vec();
        apply_mask(&mut data, [0x00; 4]);
        assert_eq!(&data[..], b"Test data");
    }

    #[test]
    fn test_words_match_bytewise() {
        let masks = [
            [0x00, 0x00, 0x00, 0x00],
            [0xFF, 0xFF, 0xFF, 0xFF],
            [0x12, 0x34, 0x56, 0x78],
            [0x6D, 0xB6, 0xB2, 0x80],
        ];

        for mask in masks {
            for size in 0..=100 {
                let data: Vec<u8> = (0..size).map(|i| (i * 7) as u8).collect();

                let mut reference = data.clone();
                apply_mask_bytewise(&mut reference, mask);

                let mut fast = data;
                apply_mask_words(&mut fast, mask);

                assert_eq!(
                    reference, fast,
                    "mismatch for mask {:?} with size {}",
                    mask, size
                );
            }
        }
    }

    #[test]
    fn test_mask_large_buffer() {
        let mask = [0x01, 0x02, 0x03, 0x04];
        let mut data: Vec<u8> = (0..10_000).map(|i| (i % 256) as u8).collect();
        let original = data.clone();

        apply_mask(&mut data, mask);

        for (i, &byte) in data.iter().enumerate() {
            assert_eq!(byte, original[i] ^ mask[i % 4], "mismatch at index {}", i);
        }
    }
}
