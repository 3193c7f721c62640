//! Payload masking.
//!
//! XOR with a repeating 4-byte key. The key position carries over between
//! calls so a payload can be unmasked in arbitrary pieces as it arrives.

/// Stateful masker for one frame payload.
#[derive(Debug, Clone)]
pub struct Masker {
    key: [u8; 4],
    /// Key index of the next byte.
    index: usize,
}

impl Masker {
    pub fn new(key: [u8; 4]) -> Self {
        Self { key, index: 0 }
    }

    /// Mask (or unmask) `payload` in place, continuing from the previous call.
    pub fn apply(&mut self, payload: &mut [u8]) {
        let k = self.key;
        let i = self.index;
        let rotated = [k[i], k[(i + 1) & 3], k[(i + 2) & 3], k[(i + 3) & 3]];
        let wide = u64::from_ne_bytes([
            rotated[0], rotated[1], rotated[2], rotated[3], rotated[0], rotated[1], rotated[2], rotated[3],
        ]);

        let mut words = payload.chunks_exact_mut(8);
        for word in &mut words {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(word);
            word.copy_from_slice(&(u64::from_ne_bytes(raw) ^ wide).to_ne_bytes());
        }

        // Whole words keep the key index unchanged.
        for byte in words.into_remainder() {
            *byte ^= self.key[self.index];
            self.index = (self.index + 1) & 3;
        }
    }
}

/// Mask a whole payload in one go.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    Masker::new(key).apply(payload);
}
