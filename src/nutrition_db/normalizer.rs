/// Descriptive words that say how a food was handled rather than what it is.
const NOISE_WORDS: &[&str] = &[
    "raw", "cooked", "fresh", "canned", "frozen", "dried", "with", "without", "added", "no",
    "low", "high", "organic", "prepared", "liquid", "expressed", "from", "grated", "meat",
];

/// Lowercased, punctuation-free tokens of `text` with noise words and one-letter tokens removed.
pub fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace([',', '(', ')'], " ")
        .split_whitespace()
        .filter(|word| word.chars().count() > 1 && !NOISE_WORDS.contains(word))
        .map(str::to_string)
        .collect()
}

/// Canonical comparison form of an ingredient or food description.
pub fn normalize(text: &str) -> String {
    tokens(text).join(" ")
}
