//! Component A: counts tokens of a string under a fixed BPE vocabulary
//! (o200k-class, the GPT-4o family's encoding). The vocabulary is expensive
//! to build, so it is constructed once and cached for the process lifetime.

use std::sync::OnceLock;

fn o200k_base() -> &'static tiktoken_rs::CoreBPE {
    static BPE: OnceLock<tiktoken_rs::CoreBPE> = OnceLock::new();
    BPE.get_or_init(|| tiktoken_rs::o200k_base().expect("o200k_base vocabulary is bundled with tiktoken-rs"))
}

/// Deterministic, side-effect-free, thread-safe token count.
#[must_use]
pub fn count(text: &str) -> usize {
    o200k_base().encode_with_special_tokens(text).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_short_text() {
        assert!(count("short") > 0);
    }

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(count(""), 0);
    }

    #[test]
    fn longer_text_counts_more_tokens() {
        assert!(count("the quick brown fox jumps over the lazy dog") > count("hello"));
    }
}
