//! Reduce model-proposed choices to exactly three clean options.

use crate::sanitize::sanitize;

/// Number of choices presented to the player.
pub const CHOICE_COUNT: usize = 3;

/// Shown when the model offered no choices at all.
pub const DEFAULT_CHOICES: [&str; CHOICE_COUNT] =
    ["Tell me more", "What does the future hold?", "End the reading"];

/// Pads a short list of usable choices.
pub const FILLER_CHOICE: &str = "Ask the cards again";

/// Normalize candidate choices to exactly three non-empty strings.
///
/// Empty input yields [`DEFAULT_CHOICES`]. Otherwise candidates are
/// sanitized, blanks and exact duplicates dropped, the first three kept and
/// the rest padded with [`FILLER_CHOICE`].
pub fn normalize_choices<S: AsRef<str>>(candidates: &[S]) -> [String; CHOICE_COUNT] {
    if candidates.is_empty() {
        return DEFAULT_CHOICES.map(str::to_owned);
    }

    let mut kept: Vec<String> = Vec::with_capacity(CHOICE_COUNT);
    for candidate in candidates {
        if kept.len() == CHOICE_COUNT {
            break;
        }
        let clean = sanitize(candidate.as_ref());
        if clean.is_empty() || kept.contains(&clean) {
            continue;
        }
        kept.push(clean);
    }

    let mut slots = kept.into_iter();
    std::array::from_fn(|_| slots.next().unwrap_or_else(|| FILLER_CHOICE.to_owned()))
}
