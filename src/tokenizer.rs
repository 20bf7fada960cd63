use regex::Regex;
use std::sync::OnceLock;

/// Splits text into search-cache tokens
pub trait Tokenizer {
    fn words(&self, text: &str) -> Vec<String>;
}

/// Lowercased runs of letters and digits, deduplicated, sorted
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    pub min_length: usize,
}

impl Default for WordTokenizer {
    fn default() -> Self {
        Self { min_length: 2 }
    }
}

impl Tokenizer for WordTokenizer {
    fn words(&self, text: &str) -> Vec<String> {
        static WORD_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = WORD_REGEX.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());

        let mut words: Vec<String> = re
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .filter(|w| w.chars().count() >= self.min_length)
            .collect();
        words.sort();
        words.dedup();
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_are_normalized() {
        let tokenizer = WordTokenizer::default();
        assert_eq!(
            tokenizer.words("Re: Server DOWN again, server down!"),
            vec!["again", "down", "re", "server"]
        );
    }

    #[test]
    fn test_short_and_symbol_only_subjects() {
        let tokenizer = WordTokenizer::default();
        assert!(tokenizer.words("?! -- a").is_empty());
        assert_eq!(tokenizer.words("Привет мир"), vec!["мир", "привет"]);
    }
}
