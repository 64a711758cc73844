//! Splits input text into composition-texts: maximal word-like runs
//! separated by whitespace and punctuation boundaries.
//!
//! Tokenization is a policy input (`spec.md` §4.6): the substrate service
//! only needs a list of composition-texts in document order, so this
//! module can be swapped for a different segmentation policy without
//! touching anything downstream of [`tokenize`].

use unicode_segmentation::UnicodeSegmentation;

/// A composition-text with its UTF-8 byte offsets in the source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Split `text` on Unicode word boundaries, keeping only the segments that
/// contain at least one alphanumeric codepoint. The rest are whitespace
/// and punctuation boundaries and are dropped rather than staged as
/// compositions of their own.
pub fn tokenize(text: &str) -> Vec<Token> {
    text.split_word_bound_indices()
        .filter(|(_, word)| word.chars().any(|c| c.is_alphanumeric()))
        .map(|(start, word)| Token {
            text: word.to_string(),
            start,
            end: start + word.len(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        let tokens = tokenize("ab cd");
        assert_eq!(tokens.iter().map(|t| t.text.as_str()).collect::<Vec<_>>(), vec!["ab", "cd"]);
    }

    #[test]
    fn drops_standalone_punctuation() {
        let tokens = tokenize("ab, cd!");
        assert_eq!(tokens.iter().map(|t| t.text.as_str()).collect::<Vec<_>>(), vec!["ab", "cd"]);
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   ...  ").is_empty());
    }

    #[test]
    fn byte_offsets_are_correct_for_multibyte_text() {
        let tokens = tokenize("café naïve");
        assert_eq!(tokens[0].text, "café");
        assert_eq!(tokens[0].start, 0);
        assert_eq!(tokens[0].end, 5);
        assert_eq!(tokens[1].text, "naïve");
        assert_eq!(tokens[1].start, 6);
    }

    #[test]
    fn repeated_tokens_preserve_order() {
        let tokens = tokenize("ab cd ab");
        assert_eq!(
            tokens.iter().map(|t| t.text.as_str()).collect::<Vec<_>>(),
            vec!["ab", "cd", "ab"]
        );
    }
}
