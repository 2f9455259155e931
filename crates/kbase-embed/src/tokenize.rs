//! Lexical preprocessing for the hashing embedder.

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he", "her", "his", "in",
    "into", "is", "it", "its", "of", "on", "or", "our", "she", "so", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "to", "was", "we", "were", "what", "when", "which", "who", "will", "with",
    "you", "your",
];

/// Lower-cased alphanumeric tokens with stop words and one-letter tokens
/// removed and a light suffix stem applied.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .map(|t| stem(&t))
        .collect()
}

fn stem(word: &str) -> String {
    let len = word.chars().count();
    if len > 5 {
        if let Some(base) = word.strip_suffix("ing") {
            return base.to_string();
        }
    }
    if len > 4 {
        if let Some(base) = word.strip_suffix("ed") {
            return base.to_string();
        }
    }
    if len > 3 && !word.ends_with("ss") {
        if let Some(base) = word.strip_suffix('s') {
            return base.to_string();
        }
    }
    word.to_string()
}

/// Limit `text` to `max_chars` characters without splitting a word.
///
/// The cut lands on the last whitespace at or before the limit. Only a
/// single token longer than the limit is cut mid-token.
pub fn truncate_input(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    if chars[max_chars].is_whitespace() {
        return chars[..max_chars].iter().collect::<String>().trim_end().to_string();
    }
    match chars[..max_chars].iter().rposition(|c| c.is_whitespace()) {
        Some(p) if chars[..p].iter().any(|c| !c.is_whitespace()) => chars[..p].iter().collect::<String>().trim_end().to_string(),
        _ => chars[..max_chars].iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_common_suffixes() {
        assert_eq!(tokenize("Jumping jumps jumped"), vec!["jump", "jump", "jump"]);
        assert_eq!(tokenize("the class is a glass"), vec!["class", "glass"]);
    }
}
