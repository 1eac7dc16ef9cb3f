//! Llama Guard hazard categories and their descriptions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Hazard categories from the Llama Guard 3 taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CategoryCode {
    /// Violent crimes.
    S1,
    /// Non-violent crimes.
    S2,
    /// Sex-related crimes.
    S3,
    /// Child sexual exploitation.
    S4,
    /// Defamation.
    S5,
    /// Specialized advice.
    S6,
    /// Privacy.
    S7,
    /// Intellectual property.
    S8,
    /// Indiscriminate weapons.
    S9,
    /// Hate.
    S10,
    /// Suicide and self-harm.
    S11,
    /// Sexual content.
    S12,
    /// Elections.
    S13,
}

impl CategoryCode {
    /// Returns all categories in catalog order.
    pub fn all() -> &'static [CategoryCode] {
        &[
            CategoryCode::S1,
            CategoryCode::S2,
            CategoryCode::S3,
            CategoryCode::S4,
            CategoryCode::S5,
            CategoryCode::S6,
            CategoryCode::S7,
            CategoryCode::S8,
            CategoryCode::S9,
            CategoryCode::S10,
            CategoryCode::S11,
            CategoryCode::S12,
            CategoryCode::S13,
        ]
    }

    /// Returns the wire code, e.g. `"S10"`.
    pub fn code(&self) -> &'static str {
        match self {
            CategoryCode::S1 => "S1",
            CategoryCode::S2 => "S2",
            CategoryCode::S3 => "S3",
            CategoryCode::S4 => "S4",
            CategoryCode::S5 => "S5",
            CategoryCode::S6 => "S6",
            CategoryCode::S7 => "S7",
            CategoryCode::S8 => "S8",
            CategoryCode::S9 => "S9",
            CategoryCode::S10 => "S10",
            CategoryCode::S11 => "S11",
            CategoryCode::S12 => "S12",
            CategoryCode::S13 => "S13",
        }
    }

    /// Returns the short policy name as it appears in the prompt template.
    pub fn name(&self) -> &'static str {
        match self {
            CategoryCode::S1 => "Violent Crimes",
            CategoryCode::S2 => "Non-Violent Crimes",
            CategoryCode::S3 => "Sex Crimes",
            CategoryCode::S4 => "Child Exploitation",
            CategoryCode::S5 => "Defamation",
            CategoryCode::S6 => "Specialized Advice",
            CategoryCode::S7 => "Privacy",
            CategoryCode::S8 => "Intellectual Property",
            CategoryCode::S9 => "Indiscriminate Weapons",
            CategoryCode::S10 => "Hate",
            CategoryCode::S11 => "Self-Harm",
            CategoryCode::S12 => "Sexual Content",
            CategoryCode::S13 => "Elections",
        }
    }

    /// Returns the human-readable policy description.
    pub fn description(&self) -> &'static str {
        match self {
            CategoryCode::S1 => {
                "Violent Crimes - Includes unlawful violence toward people or animals"
            }
            CategoryCode::S2 => "Non-Violent Crimes - Including fraud, theft, cybercrime, etc.",
            CategoryCode::S3 => "Sex-Related Crimes - Including trafficking, assault, harassment",
            CategoryCode::S4 => "Child Sexual Exploitation",
            CategoryCode::S5 => "Defamation - False statements injuring reputation",
            CategoryCode::S6 => "Specialized Advice - Dangerous medical/financial/legal advice",
            CategoryCode::S7 => "Privacy - Sensitive personal information",
            CategoryCode::S8 => "Intellectual Property - Copyright violations",
            CategoryCode::S9 => "Indiscriminate Weapons - Chemical, biological, nuclear weapons",
            CategoryCode::S10 => "Hate - Demeaning based on personal characteristics",
            CategoryCode::S11 => "Suicide & Self-Harm",
            CategoryCode::S12 => "Sexual Content - Erotic content",
            CategoryCode::S13 => "Elections - Misinformation about voting",
        }
    }
}

impl fmt::Display for CategoryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned when parsing an unknown category code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category code: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for CategoryCode {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CategoryCode::all()
            .iter()
            .copied()
            .find(|c| c.code() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Description used for codes outside the catalog.
pub const UNKNOWN_CATEGORY: &str = "Unknown category";

/// A category code paired with its description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDetail {
    pub category: String,
    pub description: String,
}

/// Looks up the description for a category code.
///
/// Total over all inputs: unrecognized codes get [`UNKNOWN_CATEGORY`].
pub fn describe(code: &str) -> CategoryDetail {
    let description = code
        .parse::<CategoryCode>()
        .map(|c| c.description())
        .unwrap_or(UNKNOWN_CATEGORY);

    CategoryDetail {
        category: code.to_string(),
        description: description.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_returns_thirteen_codes_in_order() {
        let all = CategoryCode::all();
        assert_eq!(all.len(), 13);
        assert_eq!(all[0], CategoryCode::S1);
        assert_eq!(all[12], CategoryCode::S13);
        assert!(all.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn describe_child_exploitation() {
        let detail = describe("S4");
        assert_eq!(detail.category, "S4");
        assert!(detail.description.contains("Child Sexual Exploitation"));
    }

    #[test]
    fn describe_hate() {
        let detail = describe("S10");
        assert_eq!(
            detail.description,
            "Hate - Demeaning based on personal characteristics"
        );
    }

    #[test]
    fn describe_unknown_code() {
        assert_eq!(describe("S99").description, UNKNOWN_CATEGORY);
        assert_eq!(describe("").description, UNKNOWN_CATEGORY);
        assert_eq!(describe("s1").description, UNKNOWN_CATEGORY);
        assert_eq!(describe("S99").category, "S99");
    }

    #[test]
    fn parse_and_display_agree() {
        for code in CategoryCode::all() {
            let parsed: CategoryCode = code.to_string().parse().unwrap();
            assert_eq!(parsed, *code);
        }
        assert!("S14".parse::<CategoryCode>().is_err());
    }

    #[test]
    fn serializes_as_code() {
        let json = serde_json::to_string(&CategoryCode::S11).unwrap();
        assert_eq!(json, "\"S11\"");
    }
}
