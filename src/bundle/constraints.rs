//! Technical constraints pulled from `inputs/constraints.md`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testing: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw: String,
}

const LANGUAGES: &[(&[&str], &str)] = &[
    (&["python"], "Python"),
    (&["typescript"], "TypeScript"),
    (&["golang", "go"], "Go"),
    (&["rust"], "Rust"),
];

const FRAMEWORKS: &[(&str, &str)] = &[
    ("fastapi", "FastAPI"),
    ("django", "Django"),
    ("flask", "Flask"),
    ("gin", "Gin"),
];

const TESTING: &[(&str, &str)] = &[("pytest", "pytest"), ("go test", "go test"), ("cargo test", "cargo test")];

const PATTERNS: &[(&str, &str)] = &[
    ("protocol", "Use Protocol for interfaces"),
    ("dataclass", "Use dataclass for data structures"),
    ("factory", "Use factory functions for construction"),
    ("interface", "Use interfaces for abstraction"),
];

/// Whole-word match, so "go" does not fire on "good" or "algorithm".
fn mentions(words: &[&str], needle: &str) -> bool {
    let parts: Vec<&str> = needle.split(' ').collect();
    words.windows(parts.len()).any(|w| w == parts.as_slice())
}

/// Keyword detection over free-form constraint notes. The first matching
/// language and framework win; every matching pattern is kept.
pub fn parse_constraints(raw: &str) -> Constraints {
    let lower = raw.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let language = LANGUAGES
        .iter()
        .find(|(keys, _)| keys.iter().any(|k| mentions(&words, k)))
        .map(|(_, name)| name.to_string());
    let framework = FRAMEWORKS
        .iter()
        .find(|(key, _)| mentions(&words, key))
        .map(|(_, name)| name.to_string());
    let testing = TESTING
        .iter()
        .find(|(key, _)| mentions(&words, key))
        .map(|(_, name)| name.to_string());
    let patterns = PATTERNS
        .iter()
        .filter(|(key, _)| words.iter().any(|w| w.starts_with(key)))
        .map(|(_, sentence)| sentence.to_string())
        .collect();

    Constraints {
        language,
        framework,
        patterns,
        testing,
        raw: raw.to_string(),
    }
}
