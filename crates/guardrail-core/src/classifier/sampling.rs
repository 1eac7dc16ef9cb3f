//! Next-token selection for generation.
//!
//! Temperature scaling followed by nucleus (top-p) filtering. A non-positive
//! temperature falls back to greedy argmax.

use rand::Rng;

/// Sampling settings for one generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampler {
    /// Softmax temperature. `<= 0.0` means greedy decoding.
    pub temperature: f32,
    /// Cumulative probability mass kept by nucleus filtering.
    pub top_p: f32,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.9,
        }
    }
}

impl Sampler {
    /// Creates a greedy sampler.
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
        }
    }

    /// Picks the next token id from a row of logits.
    ///
    /// Returns `None` only for an empty vocabulary.
    pub fn sample<R: Rng + ?Sized>(&self, logits: &[f32], rng: &mut R) -> Option<u32> {
        if logits.is_empty() {
            return None;
        }
        if self.temperature <= 0.0 {
            return argmax(logits);
        }

        let probs = softmax(logits, self.temperature);
        let nucleus = nucleus(&probs, self.top_p);

        let mass: f32 = nucleus.iter().map(|(_, p)| p).sum();
        let mut target = rng.gen::<f32>() * mass;
        for &(id, p) in &nucleus {
            if target < p {
                return Some(id as u32);
            }
            target -= p;
        }

        // Rounding can leave a sliver of mass past the last candidate.
        nucleus.last().map(|&(id, _)| id as u32)
    }
}

/// Index of the largest logit.
pub fn argmax(logits: &[f32]) -> Option<u32> {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i as u32)
}

/// Temperature-scaled softmax.
fn softmax(logits: &[f32], temperature: f32) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Vec<f32> = logits
        .iter()
        .map(|x| ((x - max) / temperature).exp())
        .collect();
    let sum: f32 = exp_vals.iter().sum();
    exp_vals.iter().map(|x| x / sum).collect()
}

/// Smallest set of most probable tokens whose mass reaches `top_p`,
/// sorted by descending probability. Always keeps at least one token.
fn nucleus(probs: &[f32], top_p: f32) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut cumulative = 0.0;
    let mut keep = 0;
    for &(_, p) in &ranked {
        keep += 1;
        cumulative += p;
        if cumulative >= top_p {
            break;
        }
    }

    ranked.truncate(keep.max(1));
    ranked
}
