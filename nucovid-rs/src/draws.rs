use rand::RngCore;
use tracing::warn;

/// Raw values per seeded infection.
pub const INFECTION_DRAWS: usize = 100;
/// Raw values per contact resolution (rejection test plus any infection).
pub const CONTACT_DRAWS: usize = 250;

/// A fixed block of raw generator output for one logical operation.
///
/// Filling the block advances the underlying generator by exactly
/// `capacity` outputs no matter how many the operation ends up using, which
/// keeps the generator position independent of path length. If the block
/// runs out, values come straight from the generator instead; that is logged
/// once and never fails.
pub struct DrawCache<'a, R: RngCore> {
    source: &'a mut R,
    cache: Vec<u32>,
    idx: usize,
    calls: usize,
    exhausted: bool,
}

impl<'a, R: RngCore> DrawCache<'a, R> {
    pub fn fill(source: &'a mut R, capacity: usize) -> Self {
        let cache = (0..capacity).map(|_| source.next_u32()).collect();
        DrawCache {
            source,
            cache,
            idx: 0,
            calls: 0,
            exhausted: false,
        }
    }

    /// Number of raw values handed out so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn capacity(&self) -> usize {
        self.cache.len()
    }
}

impl<R: RngCore> RngCore for DrawCache<'_, R> {
    fn next_u32(&mut self) -> u32 {
        self.calls += 1;
        if let Some(&value) = self.cache.get(self.idx) {
            self.idx += 1;
            return value;
        }
        if !self.exhausted {
            self.exhausted = true;
            warn!(
                capacity = self.cache.len(),
                "draw cache exhausted, falling back to the generator; choose a larger cache size"
            );
        }
        self.source.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        let lo = u64::from(self.next_u32());
        let hi = u64::from(self.next_u32());
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}
