//! Name folding shared by the alias table and the document scanner.
//!
//! Both sides of a match must fold text identically, otherwise an alias that
//! looks right in the seed file silently never fires in the corpus. The rules:
//!
//! - Unicode NFKC fold
//! - lowercase
//! - punctuation becomes whitespace
//! - whitespace runs collapse
//! - an immediately repeated token collapses to one (OCR line-wrap duplication,
//!   e.g. `"Je   Je Epstein"` folds to `"je epstein"`)

use unicode_normalization::UnicodeNormalization;

/// Fold a raw name into its lookup key.
///
/// Returns an empty string when nothing alphanumeric survives.
pub fn name_key(raw: &str) -> String {
    name_tokens(raw).join(" ")
}

/// Fold text into match tokens (see module docs for the rules).
pub fn name_tokens(raw: &str) -> Vec<String> {
    let folded: String = raw
        .nfkc()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut tokens: Vec<String> = Vec::new();
    for word in folded.split_whitespace() {
        let lower = word.to_lowercase();
        if tokens.last().is_some_and(|prev| *prev == lower) {
            continue;
        }
        tokens.push(lower);
    }
    tokens
}

/// Fold running text into tokens for alias scanning.
///
/// Same folding as [`name_tokens`] but without collapsing repeated tokens:
/// in prose "Maxwell. Maxwell" is two mentions, and an OCR-duplicated
/// "Je Je Epstein" still matches the key "je epstein" at its second token.
pub fn text_tokens(raw: &str) -> Vec<String> {
    raw.nfkc()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

/// Collapse whitespace and trim, keeping case and punctuation.
///
/// Used for display forms (canonical names as written by a curator).
pub fn display_form(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
