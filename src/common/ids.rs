//! Content fingerprints for ingested datasets and locally minted job ids.

const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Streaming 64-bit FNV-1a digest. Detects content changes; not a MAC.
#[derive(Copy, Clone, Debug)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn new() -> Self {
        Self(FNV64_OFFSET)
    }

    pub fn of(bytes: &[u8]) -> Self {
        let mut fp = Self::new();
        fp.update(bytes);
        fp
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0 = bytes.iter().fold(self.0, |state, b| {
            (state ^ u64::from(*b)).wrapping_mul(FNV64_PRIME)
        });
    }

    pub fn finish64(&self) -> u64 {
        self.0
    }

    /// 16 lowercase hex digits.
    pub fn finish_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_fnv1a_64_reference_values() {
        assert_eq!(Fingerprint::of(b"").finish64(), 0xcbf2_9ce4_8422_2325);
        assert_eq!(Fingerprint::of(b"a").finish64(), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(Fingerprint::of(b"foobar").finish_hex(), "85944171f73967e8");
    }

    #[test]
    fn chunked_updates_match_one_shot() {
        let mut fp = Fingerprint::new();
        for chunk in [&b"fo"[..], b"", b"oba", b"r"] {
            fp.update(chunk);
        }
        assert_eq!(fp.finish64(), Fingerprint::of(b"foobar").finish64());
    }
}
