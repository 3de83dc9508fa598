//! Deterministic stub embedding for semantic-search tests.
//!
//! Real models are slow to load and nondeterministic across versions; tests
//! use a character-bigram one-hot vector instead. Similar strings share
//! bigrams and therefore score closer under cosine distance.

/// Fixed dimension: one slot per lowercase ASCII bigram.
pub const BIGRAM_DIM: usize = 26 * 26;

/// Embed text as counts of its lowercase alphabetic character bigrams.
///
/// Non-alphabetic characters break bigram runs, so "cat sat" produces
/// `ca`, `at`, `sa`, `at` and nothing across the space.
pub fn bigram_embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; BIGRAM_DIM];
    let lowered = text.to_lowercase();
    let bytes: Vec<Option<usize>> = lowered
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() {
                Some((c as u8 - b'a') as usize)
            } else {
                None
            }
        })
        .collect();

    for window in bytes.windows(2) {
        if let [Some(first), Some(second)] = window {
            vector[first * 26 + second] += 1.0;
        }
    }
    vector
}
