use crate::lexical::tokenize;
use std::env;

/// Default dimension of the hashed embedder
pub const DEFAULT_DIMENSION: usize = 384;

/// Maps text to a fixed-size vector.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Vec<f32>;

    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Deterministic offline embedder: feature-hashes every term into a bucket
/// with a pseudo-random sign, then L2-normalizes.
///
/// Texts sharing terms land close together, which is enough for ranking
/// without a model download.
#[derive(Debug, Clone, Copy)]
pub struct HashedEmbedder {
    dimension: usize,
}

impl HashedEmbedder {
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self {
            dimension: if dimension == 0 { 1 } else { dimension },
        }
    }

    /// Dimension from `REPOGRAPH_EMBEDDING_DIM`, falling back to the default
    #[must_use]
    pub fn from_env() -> Self {
        let dimension = env::var("REPOGRAPH_EMBEDDING_DIM")
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|dim| *dim > 0)
            .unwrap_or(DEFAULT_DIMENSION);
        Self::new(dimension)
    }
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl Embedder for HashedEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0_f32; self.dimension];
        for term in tokenize(text) {
            let mut state = fnv1a_64(term.as_bytes());
            let bucket = (splitmix64(&mut state) % self.dimension as u64) as usize;
            let sign = if splitmix64(&mut state) & 1 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }
        normalize(&mut vec);
        vec
    }
}

pub(crate) fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
