use rayon::prelude::*;
use std::collections::HashSet;

use super::food_record::{FoodRecord, MatchResult};
use super::normalizer::tokens;

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.3;

const SEQUENCE_WEIGHT: f64 = 0.3;
const OVERLAP_WEIGHT: f64 = 0.5;
const KEY_TOKEN_WEIGHT: f64 = 0.2;
const LONG_INGREDIENT_MATCH_FRACTION: f64 = 0.67;

// Below this many candidates the rayon fan-out costs more than it saves.
const PARALLEL_SCORING_THRESHOLD: usize = 256;

/// Scores free-text ingredient names against food descriptions.
///
/// The score is a weighted sum of three signals computed on normalized text:
/// - character sequence similarity (0.3)
/// - fraction of the ingredient's words found in the description (0.5)
/// - whether the "key" words of the ingredient are all present (0.2)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyMatcher {
    min_confidence: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONFIDENCE)
    }
}

/// Normalized form of the query, computed once per search.
struct PreparedQuery {
    normalized: String,
    tokens: Vec<String>,
}

impl PreparedQuery {
    fn new(ingredient: &str) -> Self {
        let tokens = tokens(ingredient);
        Self { normalized: tokens.join(" "), tokens }
    }

    fn score(&self, food_description: &str) -> f64 {
        let food_tokens = tokens(food_description);
        let food_normalized = food_tokens.join(" ");

        let score = SEQUENCE_WEIGHT * sequence_ratio(&self.normalized, &food_normalized)
            + OVERLAP_WEIGHT * word_overlap(&self.tokens, &food_tokens)
            + KEY_TOKEN_WEIGHT * key_token_presence(&self.tokens, &food_tokens);
        score.min(1.0)
    }
}

impl FuzzyMatcher {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence: min_confidence.clamp(0.0, 1.0) }
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    pub fn score(&self, ingredient: &str, food_description: &str) -> f64 {
        calculate_match_score(ingredient, food_description)
    }

    /// Candidates scoring at least the confidence floor, best first, at most `limit` of them.
    /// Equal scores keep their input order.
    pub fn find_best_matches(&self, ingredient: &str, candidates: &[FoodRecord], limit: usize) -> Vec<MatchResult> {
        if limit == 0 || candidates.is_empty() {
            return Vec::new();
        }

        let query = PreparedQuery::new(ingredient);
        let scores: Vec<f64> = if candidates.len() >= PARALLEL_SCORING_THRESHOLD {
            candidates.par_iter().map(|food| query.score(&food.description)).collect()
        } else {
            candidates.iter().map(|food| query.score(&food.description)).collect()
        };

        let mut scored: Vec<(usize, f64)> = scores
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score >= self.min_confidence)
            .collect();
        // sort_by is stable, so ties stay in candidate order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);

        scored
            .into_iter()
            .map(|(index, match_score)| MatchResult {
                record: candidates[index].clone(),
                match_score,
            })
            .collect()
    }
}

/// Match score between an ingredient name and a food description, in `[0, 1]`.
pub fn calculate_match_score(ingredient: &str, food_description: &str) -> f64 {
    PreparedQuery::new(ingredient).score(food_description)
}

/// Ratcliff/Obershelp similarity: twice the number of characters in matching blocks over the
/// total length. Two empty strings are identical.
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_characters(&a, &b) as f64 / total as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let (i, j, size) = longest_common_block(a, b);
    if size == 0 {
        return 0;
    }
    size + matching_characters(&a[..i], &b[..j]) + matching_characters(&a[i + size..], &b[j + size..])
}

/// Longest common substring as `(start_in_a, start_in_b, len)`; the earliest one in `a`
/// (then in `b`) wins ties.
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut previous = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut current = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                let run = previous[j] + 1;
                current[j + 1] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            }
        }
        previous = current;
    }
    best
}

/// Fraction of distinct ingredient words that also appear in the food description.
pub fn word_overlap(ingredient_tokens: &[String], food_tokens: &[String]) -> f64 {
    let ingredient_words: HashSet<&str> = ingredient_tokens.iter().map(String::as_str).collect();
    if ingredient_words.is_empty() {
        return 0.0;
    }
    let food_words: HashSet<&str> = food_tokens.iter().map(String::as_str).collect();
    let shared = ingredient_words.intersection(&food_words).count();
    shared as f64 / ingredient_words.len() as f64
}

/// 1.0 when the words that identify the ingredient are all there, regardless of order.
pub fn key_token_presence(ingredient_tokens: &[String], food_tokens: &[String]) -> f64 {
    let present = |word: &String| food_tokens.contains(word);
    let matched = ingredient_tokens.iter().filter(|word| present(word)).count();

    let hit = match ingredient_tokens.len() {
        0 => false,
        1 => matched == 1,
        2 => matched == 2,
        n => {
            let threshold = ((n as f64) * LONG_INGREDIENT_MATCH_FRACTION).ceil() as usize;
            matched >= threshold.max(2)
        }
    };
    if hit {
        1.0
    } else {
        0.0
    }
}
