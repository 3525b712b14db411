//! Characters-per-token heuristic used to seed truncation

/// Ratio assumed for plain prose
pub const BASE_CHARS_PER_TOKEN: f64 = 4.0;

const MIN_RATIO: f64 = 1.0;
const MAX_RATIO: f64 = 8.0;

/// Text features feeding the ratio heuristic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextFeatures {
    pub punctuation_density: f64,
    pub whitespace_density: f64,
    pub avg_word_len: f64,
}

impl TextFeatures {
    pub fn of(text: &str) -> Self {
        let mut total = 0usize;
        let mut punctuation = 0usize;
        let mut whitespace = 0usize;
        for c in text.chars() {
            total += 1;
            if c.is_whitespace() {
                whitespace += 1;
            } else if c.is_ascii_punctuation() {
                punctuation += 1;
            }
        }

        if total == 0 {
            return Self {
                punctuation_density: 0.0,
                whitespace_density: 0.0,
                avg_word_len: 0.0,
            };
        }

        let words = text.split_whitespace().count().max(1);
        Self {
            punctuation_density: punctuation as f64 / total as f64,
            whitespace_density: whitespace as f64 / total as f64,
            avg_word_len: (total - whitespace) as f64 / words as f64,
        }
    }
}

/// Stateless estimator of characters per token.
///
/// Denser punctuation or whitespace and shorter words push the ratio up. The
/// weights are a tuning knob only: the search corrects the estimate after the
/// first probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct RatioEstimator;

impl RatioEstimator {
    pub fn estimate(text: &str) -> f64 {
        let features = TextFeatures::of(text);
        if features.avg_word_len == 0.0 {
            return BASE_CHARS_PER_TOKEN;
        }

        let word_factor = (1.0 + (5.0 - features.avg_word_len) / 50.0).clamp(0.9, 1.1);
        let ratio = BASE_CHARS_PER_TOKEN
            * (1.0 + 0.5 * features.punctuation_density)
            * (1.0 + 0.25 * features.whitespace_density)
            * word_factor;

        ratio.clamp(MIN_RATIO, MAX_RATIO)
    }

    /// Initial prefix length for `target_tokens`, clamped to `[0, len]`
    pub fn initial_guess(ratio: f64, target_tokens: usize, len: usize) -> usize {
        let guess = (target_tokens as f64 * ratio).round();
        if guess <= 0.0 {
            0
        } else {
            (guess as usize).min(len)
        }
    }
}
