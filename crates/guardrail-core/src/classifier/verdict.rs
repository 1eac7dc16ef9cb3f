//! Parsing of the generated Llama Guard assessment.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::CategoryCode;

/// Matches category codes as whole tokens so `S10` does not also report `S1`.
static CATEGORY_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bS(\d{1,2})\b").expect("valid category regex"));

/// Safety verdict of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Safe,
    Unsafe,
}

/// Outcome of classifying one text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    /// Violated categories in catalog order. Always empty when safe.
    pub categories: Vec<CategoryCode>,
}

impl Verdict {
    /// A safe verdict.
    pub fn safe() -> Self {
        Self {
            status: VerdictStatus::Safe,
            categories: Vec::new(),
        }
    }

    /// An unsafe verdict. Categories are sorted into catalog order and deduplicated.
    pub fn unsafe_with(mut categories: Vec<CategoryCode>) -> Self {
        categories.sort();
        categories.dedup();
        Self {
            status: VerdictStatus::Unsafe,
            categories,
        }
    }

    /// Parses the decoded model output.
    ///
    /// The text is unsafe if it contains `unsafe` in any case. Category codes
    /// are only collected for unsafe output.
    pub fn parse(output: &str) -> Self {
        if !output.to_lowercase().contains("unsafe") {
            return Self::safe();
        }

        let found: Vec<CategoryCode> = CATEGORY_TOKEN
            .find_iter(output)
            .filter_map(|m| m.as_str().parse().ok())
            .collect();

        Self::unsafe_with(found)
    }

    /// Returns true if the verdict is unsafe.
    pub fn is_unsafe(&self) -> bool {
        self.status == VerdictStatus::Unsafe
    }
}
