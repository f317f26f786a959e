//! Murmur2 (32-bit, seed 0) and a Ketama consistent-hash ring built on top of
//! it. Ported from the reference Go implementation's `mmhash`/`hash/ketama`
//! packages; the bit manipulation is kept identical so key→node placement
//! matches that implementation exactly.

const MAGIC: u32 = 0x5bd1_e995;

/// The classic 32-bit Murmur2 one-shot hash, seeded with the input length
/// (as the reference implementation does) rather than a caller-supplied
/// seed.
pub fn murmur2_32(data: &[u8]) -> u32 {
    // Seed is 0 ^ len(data), matching the reference implementation.
    let mut h: u32 = data.len() as u32;
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(MAGIC);
        k ^= k >> 24;
        k = k.wrapping_mul(MAGIC);
        h = h.wrapping_mul(MAGIC);
        h ^= k;
    }

    // The reference implementation only folds in the highest remaining byte
    // for tail lengths 2 and 3 (not all remaining bytes) — kept as-is for
    // bit-for-bit parity with the hash it must agree with across nodes.
    let tail = chunks.remainder();
    match tail.len() {
        3 => h ^= (tail[2] as u32) << 16,
        2 => h ^= (tail[1] as u32) << 8,
        1 => {
            h ^= tail[0] as u32;
            h = h.wrapping_mul(MAGIC);
        }
        _ => {}
    }

    h ^= h >> 13;
    h = h.wrapping_mul(MAGIC);
    h ^= h >> 15;
    h
}

/// A consistent-hash ring over a fixed set of named backend nodes, each
/// represented by `vnodes` virtual points placed at `murmur2("<node>#<i>")`.
#[derive(Debug, Clone)]
pub struct HashRouter {
    ring: Vec<(u32, String)>,
}

impl HashRouter {
    /// Builds the ring from `nodes` (physical node names) with `vnodes`
    /// virtual points each.
    pub fn build(nodes: &[String], vnodes: usize) -> Self {
        let mut ring = Vec::with_capacity(nodes.len() * vnodes);
        for node in nodes {
            for i in 0..vnodes {
                let point = format!("{node}#{i}");
                ring.push((murmur2_32(point.as_bytes()), node.clone()));
            }
        }
        ring.sort_by_key(|(pos, _)| *pos);
        Self { ring }
    }

    /// Routes `key` to a node name by leftmost binary search over the ring,
    /// wrapping to the first point when the key hashes past the end.
    pub fn route(&self, key: &str) -> Option<&str> {
        if self.ring.is_empty() {
            return None;
        }
        let hash = murmur2_32(key.as_bytes());
        let idx = self.ring.partition_point(|(pos, _)| *pos < hash);
        let idx = if idx == self.ring.len() { 0 } else { idx };
        Some(&self.ring[idx].1)
    }
}
