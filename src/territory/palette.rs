use std::time::{SystemTime, UNIX_EPOCH};

/// Colors handed out to newly drawn territories
pub const DEFAULT_PALETTE: [&str; 6] = [
    "#e6194b", "#3cb44b", "#4363d8", "#f58231", "#911eb4", "#42d4f4",
];

/// Uniform-random color picker over a fixed palette
#[derive(Clone, Debug)]
pub struct Palette {
    colors: Vec<String>,
    seed: u64,
    draws: u64,
}

impl Palette {
    /// Seeded from the wall clock
    pub fn new(colors: Vec<String>) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::with_seed(colors, nanos)
    }

    pub fn with_seed(colors: Vec<String>, seed: u64) -> Self {
        let colors = if colors.is_empty() {
            DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect()
        } else {
            colors
        };
        Self { colors, seed, draws: 0 }
    }

    /// Pick one palette entry
    pub fn pick(&mut self) -> String {
        self.draws = self.draws.wrapping_add(1);
        let r = rand_simple(hash2(self.seed, self.draws));
        let idx = ((r * self.colors.len() as f64) as usize).min(self.colors.len() - 1);
        self.colors[idx].clone()
    }

    /// Entry after `current`, for the edit form's color cycle
    pub fn next_after(&self, current: &str) -> String {
        let pos = self
            .colors
            .iter()
            .position(|c| c.eq_ignore_ascii_case(current));
        let idx = match pos {
            Some(i) => (i + 1) % self.colors.len(),
            None => 0,
        };
        self.colors[idx].clone()
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Fast 2-value hash with xorshift
#[inline(always)]
fn hash2(a: u64, b: u64) -> u64 {
    let mut seed = a.wrapping_mul(2654435761).wrapping_add(b.wrapping_mul(2246822519));
    seed ^= seed << 13;
    seed ^= seed >> 7;
    seed ^= seed << 17;
    seed
}

/// Splitmix64 mapped to [0, 1)
#[inline(always)]
fn rand_simple(seed: u64) -> f64 {
    let mut x = seed.wrapping_mul(0x9e3779b97f4a7c15);
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^= x >> 31;
    (x >> 11) as f64 / 9007199254740992.0
}
