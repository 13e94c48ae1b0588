//! String similarity primitives
//!
//! All scores are percentages in `0.0..=100.0`.

use std::collections::HashSet;

/// Edit distance counting single-character insertions, deletions and
/// substitutions
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Case-insensitive `(maxLen - distance) / maxLen * 100`
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 100.0;
    }
    let distance = levenshtein_distance(&a, &b);
    ((max_len - distance) as f64 / max_len as f64 * 100.0).clamp(0.0, 100.0)
}

fn significant_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .filter(|word| word.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

/// Jaccard overlap of the words longer than two characters
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let left = significant_words(a);
    let right = significant_words(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    intersection as f64 / union as f64 * 100.0
}

/// Containment-aware character similarity.
///
/// Equal strings score 100, containment scores `shorter / longer * 95`,
/// anything else the share of positions holding the same character.
pub fn character_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a == b {
        return 100.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if a.contains(&b) || b.contains(&a) {
        return len_a.min(len_b) as f64 / len_a.max(len_b) as f64 * 95.0;
    }

    let matches = a.chars().zip(b.chars()).filter(|(x, y)| x == y).count();
    matches as f64 / len_a.max(len_b) as f64 * 100.0
}

/// Blend of word overlap and character similarity; word overlap weighs more
/// when the original text has more than three words
pub fn text_similarity(original: &str, candidate: &str) -> f64 {
    let weight = if original.split_whitespace().count() > 3 {
        0.7
    } else {
        0.4
    };
    word_overlap(original, candidate) * weight + character_similarity(original, candidate) * (1.0 - weight)
}

/// Identifier naming conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingConvention {
    Kebab,
    Snake,
    Camel,
}

impl NamingConvention {
    pub const ALL: [NamingConvention; 3] = [
        NamingConvention::Kebab,
        NamingConvention::Snake,
        NamingConvention::Camel,
    ];
}

/// Split an identifier on `-`, `_` and lower-to-upper case boundaries
fn identifier_words(id: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in id.chars() {
        if ch == '-' || ch == '_' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else if ch.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
            current.push(ch);
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Re-case an identifier, e.g. `submit-btn` to `submitBtn`
pub fn convert_naming(id: &str, convention: NamingConvention) -> String {
    let words = identifier_words(id);
    match convention {
        NamingConvention::Kebab => words.join("-").to_lowercase(),
        NamingConvention::Snake => words.join("_").to_lowercase(),
        NamingConvention::Camel => words
            .iter()
            .enumerate()
            .map(|(i, word)| {
                let lower = word.to_lowercase();
                if i == 0 {
                    return lower;
                }
                let mut chars = lower.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect(),
    }
}

/// Lowercase and strip separators and whitespace
pub fn normalize_identifier(id: &str) -> String {
    id.chars()
        .filter(|c| *c != '-' && *c != '_' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
