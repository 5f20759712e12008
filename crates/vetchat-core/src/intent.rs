//! Keyword-based intent detection.
//!
//! Each intent owns a flat list of lowercase phrases; a message matches an
//! intent when any phrase is a substring of the lowercased message. There is
//! no scoring. Results follow declaration order of [`Intent`].

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Crisis,
    Employment,
    Education,
    Benefits,
    Healthcare,
    MentalHealth,
    Housing,
    Financial,
    Legal,
    General,
}

const CRISIS: &[&str] = &[
    "suicide",
    "suicidal",
    "kill myself",
    "end my life",
    "hurt myself",
    "self harm",
    "self-harm",
    "no reason to live",
    "want to die",
    "better off dead",
];

const EMPLOYMENT: &[&str] = &[
    "job",
    "career",
    "employ",
    "hiring",
    "resume",
    "interview",
    "work ",
    "position",
    "apprentice",
];

const EDUCATION: &[&str] = &[
    "gi bill",
    "school",
    "college",
    "degree",
    "education",
    "training",
    "certification",
    "tuition",
    "vr&e",
];

const BENEFITS: &[&str] = &[
    "benefit",
    "disability",
    "claim",
    "compensation",
    "pension",
    "va rating",
    "appeal",
    "dd214",
    "dd-214",
];

const HEALTHCARE: &[&str] = &[
    "health",
    "doctor",
    "medical",
    "clinic",
    "hospital",
    "prescription",
    "appointment",
    "tricare",
];

const MENTAL_HEALTH: &[&str] = &[
    "ptsd",
    "depress",
    "anxiety",
    "therapy",
    "counsel",
    "mental health",
    "stress",
    "nightmare",
];

const HOUSING: &[&str] = &[
    "housing",
    "homeless",
    "rent",
    "mortgage",
    "home loan",
    "evict",
    "shelter",
    "apartment",
];

const FINANCIAL: &[&str] = &[
    "money",
    "debt",
    "loan",
    "financial",
    "budget",
    "bills",
    "credit",
];

const LEGAL: &[&str] = &[
    "legal",
    "lawyer",
    "attorney",
    "court",
    "discharge upgrade",
    "custody",
];

impl Intent {
    /// Intents that can be detected, in reporting order.
    pub const DETECTABLE: [Intent; 9] = [
        Intent::Crisis,
        Intent::Employment,
        Intent::Education,
        Intent::Benefits,
        Intent::Healthcare,
        Intent::MentalHealth,
        Intent::Housing,
        Intent::Financial,
        Intent::Legal,
    ];

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Intent::Crisis => CRISIS,
            Intent::Employment => EMPLOYMENT,
            Intent::Education => EDUCATION,
            Intent::Benefits => BENEFITS,
            Intent::Healthcare => HEALTHCARE,
            Intent::MentalHealth => MENTAL_HEALTH,
            Intent::Housing => HOUSING,
            Intent::Financial => FINANCIAL,
            Intent::Legal => LEGAL,
            Intent::General => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Crisis => "crisis",
            Intent::Employment => "employment",
            Intent::Education => "education",
            Intent::Benefits => "benefits",
            Intent::Healthcare => "healthcare",
            Intent::MentalHealth => "mental_health",
            Intent::Housing => "housing",
            Intent::Financial => "financial",
            Intent::Legal => "legal",
            Intent::General => "general",
        }
    }

    /// Resource table category for this intent.
    pub fn resource_category(self) -> &'static str {
        match self {
            Intent::Crisis | Intent::MentalHealth => "Mental Health",
            Intent::Employment => "Employment",
            Intent::Education => "Education",
            Intent::Benefits => "Benefits",
            Intent::Healthcare => "Healthcare",
            Intent::Housing => "Housing",
            Intent::Financial => "Financial",
            Intent::Legal => "Legal",
            Intent::General => "General",
        }
    }

    /// Opportunity category, for intents that have listings.
    pub fn opportunity_category(self) -> Option<&'static str> {
        match self {
            Intent::Employment => Some("Employment"),
            Intent::Education => Some("Education"),
            _ => None,
        }
    }
}

/// Detect every intent whose keywords appear in `text`.
///
/// ```rust
/// use vetchat_core::intent::{detect_intents, Intent};
///
/// let intents = detect_intents("How do I use my GI Bill for college?");
/// assert_eq!(intents, vec![Intent::Education]);
/// assert_eq!(detect_intents("hello there"), vec![Intent::General]);
/// ```
pub fn detect_intents(text: &str) -> Vec<Intent> {
    // Pad so "work " also matches at the end of a message.
    let lowered = format!("{} ", text.to_lowercase());
    let found: Vec<Intent> = Intent::DETECTABLE
        .iter()
        .copied()
        .filter(|intent| intent.keywords().iter().any(|kw| lowered.contains(kw)))
        .collect();

    if found.is_empty() {
        vec![Intent::General]
    } else {
        found
    }
}

pub fn is_crisis(intents: &[Intent]) -> bool {
    intents.contains(&Intent::Crisis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_general_when_nothing_matches() {
        assert_eq!(detect_intents("good morning"), vec![Intent::General]);
        assert_eq!(detect_intents(""), vec![Intent::General]);
    }

    #[test]
    fn test_multiple_intents_in_declaration_order() {
        let intents = detect_intents("I need housing and a job after my disability claim");
        assert_eq!(
            intents,
            vec![Intent::Employment, Intent::Benefits, Intent::Housing]
        );
    }

    #[test]
    fn test_crisis_is_detected_case_insensitively() {
        let intents = detect_intents("Some days I think I'd be Better Off Dead");
        assert!(is_crisis(&intents));
        assert_eq!(intents[0], Intent::Crisis);
    }

    #[test]
    fn test_trailing_work_matches() {
        assert_eq!(detect_intents("I can't find work"), vec![Intent::Employment]);
    }

    #[test]
    fn test_categories() {
        assert_eq!(Intent::Crisis.resource_category(), "Mental Health");
        assert_eq!(Intent::Employment.opportunity_category(), Some("Employment"));
        assert_eq!(Intent::Housing.opportunity_category(), None);
    }
}
