//! Person detection for query routing.
//!
//! Best-effort: names that collide with common nouns will be missed or
//! misread. A detected name only changes retrieval weighting.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

const NAME: &str = r"(?P<name>\p{L}[\p{L}\p{M}'’.-]*)";

const STOPLIST: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "need",
    "used", "what", "who", "which", "when", "where", "why", "how", "all", "each", "every",
    "both", "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own",
    "same", "so", "than", "too", "very", "just", "also", "now", "here", "there", "then", "once",
    "about", "after", "before", "between", "into", "through", "during", "above", "below", "my",
    "our", "your", "their", "his", "her", "its", "me", "us", "them", "i", "we", "you", "they",
    "it", "this", "that", "these", "those", "meeting", "meetings", "one-on-one", "prep",
    "prepare", "note", "notes", "summary", "action", "items", "discussion", "talked",
    "discussed", "said", "mentioned", "topic", "topics", "project", "projects", "team", "work",
    "update", "updates", "status", "weekly", "daily", "monthly", "review", "feedback",
    "performance", "highlights", "overview", "report", "analysis", "call", "sync", "api", "ui",
    "ux", "sql", "aws", "gcp", "pr", "ci", "cd", "today", "yesterday", "tomorrow", "day",
    "days", "week", "weeks", "month", "months", "year", "years", "quarter", "last", "next",
    "past", "january", "february", "march", "april", "june", "july", "august", "september",
    "october", "november", "december", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep",
    "sept", "oct", "nov", "dec", "monday", "tuesday", "wednesday", "thursday", "friday",
    "saturday", "sunday", "mon", "tue", "wed", "thu", "fri", "sat", "sun",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => f.write_str("high"),
            Self::Medium => f.write_str("medium"),
            Self::Low => f.write_str("low"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub is_person_query: bool,
    pub person: Option<String>,
    pub confidence: Confidence,
}

impl RouteDecision {
    pub fn none() -> Self {
        Self {
            is_person_query: false,
            person: None,
            confidence: Confidence::Low,
        }
    }
}

#[derive(Debug)]
pub struct PersonRule {
    pub label: &'static str,
    pub confidence: Confidence,
    pattern: Regex,
    /// The captured name must start with an uppercase letter.
    capitalized: bool,
    /// Reject a capture that opens the query or is an all-caps acronym.
    not_leading: bool,
}

impl PersonRule {
    fn new(label: &'static str, pattern: &str, confidence: Confidence) -> Self {
        Self {
            label,
            confidence,
            pattern: Regex::new(pattern).expect("person pattern is valid"),
            capitalized: confidence != Confidence::High,
            not_leading: false,
        }
    }

    fn not_leading(mut self) -> Self {
        self.not_leading = true;
        self
    }

    /// First acceptable name this rule captures in `text`.
    pub fn capture(&self, text: &str, stoplist: &HashSet<&'static str>) -> Option<String> {
        self.pattern.captures_iter(text).find_map(|captures| {
            let found = captures.name("name")?;
            let name = clean_name(found.as_str());
            let first = name.chars().next()?;

            if !first.is_alphabetic() || stoplist.contains(name.to_lowercase().as_str()) {
                return None;
            }
            if self.capitalized && !first.is_uppercase() {
                return None;
            }
            if self.not_leading {
                let leading = text[..found.start()].trim().is_empty();
                let acronym = name.chars().count() > 1 && name.chars().all(|c| !c.is_lowercase());
                if leading || acronym {
                    return None;
                }
            }
            Some(name)
        })
    }
}

fn clean_name(raw: &str) -> String {
    let trimmed = raw.trim_end_matches(['\'', '’', '.', '-']);
    let trimmed = trimmed
        .strip_suffix("'s")
        .or_else(|| trimmed.strip_suffix("’s"))
        .unwrap_or(trimmed);
    trimmed.trim_end_matches(['\'', '’', '.', '-']).to_string()
}

/// Ordered rule table; the first rule yielding a name decides the route.
#[derive(Debug)]
pub struct PersonRouter {
    rules: Vec<PersonRule>,
    stoplist: HashSet<&'static str>,
}

impl Default for PersonRouter {
    fn default() -> Self {
        use Confidence::{High, Medium};
        let rules = vec![
            PersonRule::new("one-to-one", &format!(r"(?i)\b1:1s?\s+with\s+{NAME}"), High),
            PersonRule::new(
                "one-on-one",
                &format!(r"(?i)\bone[- ]on[- ]ones?\s+with\s+{NAME}"),
                High,
            ),
            PersonRule::new("meeting-with", &format!(r"(?i)\bmeetings?\s+with\s+{NAME}"), High),
            PersonRule::new("call-with", &format!(r"(?i)\bcalls?\s+with\s+{NAME}"), High),
            PersonRule::new("sync-with", &format!(r"(?i)\bsync(?:ed)?\s+with\s+{NAME}"), High),
            PersonRule::new(
                "catch-up-with",
                &format!(r"(?i)\bcatch(?:ing)?[- ]up\s+with\s+{NAME}"),
                High,
            ),
            PersonRule::new("prep-for", &format!(r"(?i)\bprep(?:are)?\s+for\s+{NAME}"), Medium),
            PersonRule::new(
                "possessive",
                r"(?i)\b(?P<name>\p{L}[\p{L}\p{M}-]*)['’]s\b",
                Medium,
            ),
            PersonRule::new(
                "notes-about",
                &format!(r"(?i)\bnotes?\s+(?:about|on|from|for|with)\s+{NAME}"),
                Medium,
            ),
            PersonRule::new(
                "feedback-for",
                &format!(r"(?i)\b{NAME}\s+(?:feedback|update|status|review)\b"),
                Medium,
            ),
            PersonRule::new("with", &format!(r"(?i)\bwith\s+{NAME}"), Medium),
            PersonRule::new("capitalized", &format!(r"\b{NAME}"), Medium).not_leading(),
        ];

        Self {
            rules,
            stoplist: STOPLIST.iter().copied().collect(),
        }
    }
}

impl PersonRouter {
    pub fn rules(&self) -> &[PersonRule] {
        &self.rules
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        self.stoplist.contains(word.to_lowercase().as_str())
    }

    pub fn route(&self, text: &str) -> RouteDecision {
        self.rules
            .iter()
            .find_map(|rule| {
                rule.capture(text, &self.stoplist).map(|name| RouteDecision {
                    is_person_query: true,
                    person: Some(name),
                    confidence: rule.confidence,
                })
            })
            .unwrap_or_else(RouteDecision::none)
    }
}

static DEFAULT_ROUTER: LazyLock<PersonRouter> = LazyLock::new(PersonRouter::default);

pub fn route(text: &str) -> RouteDecision {
    DEFAULT_ROUTER.route(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(text: &str) -> (bool, Option<String>, Confidence) {
        let decision = route(text);
        (decision.is_person_query, decision.person, decision.confidence)
    }

    fn rule(label: &str) -> &'static PersonRule {
        DEFAULT_ROUTER
            .rules()
            .iter()
            .find(|rule| rule.label == label)
            .unwrap()
    }

    #[test]
    fn explicit_relationship_is_high_confidence() {
        assert_eq!(
            decision("prep for 1:1 with Jordan"),
            (true, Some("Jordan".to_string()), Confidence::High)
        );
        assert_eq!(
            decision("catch up with priya about hiring"),
            (true, Some("priya".to_string()), Confidence::High)
        );
    }

    #[test]
    fn stoplisted_words_are_not_people() {
        assert_eq!(decision("project status update"), (false, None, Confidence::Low));
        assert_eq!(decision("meeting with the team"), (false, None, Confidence::Low));
        assert_eq!(decision("meetings this week"), (false, None, Confidence::Low));
    }

    #[test]
    fn softer_patterns_are_medium_confidence() {
        assert_eq!(
            decision("Jordan's notes on pricing"),
            (true, Some("Jordan".to_string()), Confidence::Medium)
        );
        assert_eq!(
            decision("notes about Priya"),
            (true, Some("Priya".to_string()), Confidence::Medium)
        );
        assert_eq!(
            decision("Sam feedback from the offsite"),
            (true, Some("Sam".to_string()), Confidence::Medium)
        );
    }

    #[test]
    fn capitalized_token_after_first_word_is_a_candidate() {
        assert_eq!(
            decision("what did Alex say about pricing"),
            (true, Some("Alex".to_string()), Confidence::Medium)
        );
        assert_eq!(decision("API design review"), (false, None, Confidence::Low));
        assert_eq!(decision("Roadmap planning"), (false, None, Confidence::Low));
    }

    #[test]
    fn rules_can_be_exercised_alone() {
        let stoplist: HashSet<&'static str> = STOPLIST.iter().copied().collect();
        assert_eq!(
            rule("meeting-with").capture("meeting with Dana", &stoplist),
            Some("Dana".to_string())
        );
        assert_eq!(rule("meeting-with").capture("meeting with notes", &stoplist), None);
        assert_eq!(
            rule("possessive").capture("review Kim’s draft", &stoplist),
            Some("Kim".to_string())
        );
        assert_eq!(rule("notes-about").capture("notes about search", &stoplist), None);
    }

    #[test]
    fn possessive_suffix_is_removed_from_names() {
        assert_eq!(clean_name("Jordan's"), "Jordan");
        assert_eq!(clean_name("Lee."), "Lee");
    }
}
