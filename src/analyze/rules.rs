//! Deterministic rule matching (first stage of moderation).
//!
//! Rules are evaluated in the order the policy declares them, and inside a rule the
//! terms are tried in declared order too. The first term that fires wins and nothing
//! after it is evaluated. Matching is case-insensitive:
//! - `keyword`: plain substring containment on the lower-cased text
//! - `regex`:   pattern search, compiled with the `i` flag at load time

use crate::policy::Rule;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Kind of a deterministic rule, as named in the policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Keyword,
    Regex,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Keyword => "keyword",
            RuleKind::Regex => "regex",
        }
    }
}

/// One evaluable rule. New rule kinds plug in here without touching the orchestrator.
pub trait RuleMatcher: Send + Sync + fmt::Debug {
    fn kind(&self) -> RuleKind;

    /// Returns the declared term that fired first, if any.
    /// `lowered` is `text.to_lowercase()`, computed once per record by the caller.
    fn find<'a>(&'a self, text: &str, lowered: &str) -> Option<&'a str>;

    fn matches(&self, text: &str) -> bool {
        self.find(text, &text.to_lowercase()).is_some()
    }
}

/// Shared handle stored inside a compiled policy.
pub type DynRuleMatcher = Arc<dyn RuleMatcher>;

/// Which rule fired and on which term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    /// Position of the rule in the policy's rule list.
    pub rule_index: usize,
    pub kind: RuleKind,
    /// The term exactly as declared in the policy (original casing).
    pub term: String,
}

impl RuleMatch {
    /// Human-readable explanation used in decision details.
    pub fn describe(&self) -> String {
        match self.kind {
            RuleKind::Keyword => format!("Matched keyword: '{}'", self.term),
            RuleKind::Regex => format!("Matched pattern: '{}'", self.term),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeywordRule {
    /// (as declared, lower-cased)
    keywords: Vec<(String, String)>,
}

impl KeywordRule {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| {
                let k = k.into();
                let lower = k.to_lowercase();
                (k, lower)
            })
            .collect();
        Self { keywords }
    }
}

impl RuleMatcher for KeywordRule {
    fn kind(&self) -> RuleKind {
        RuleKind::Keyword
    }

    fn find<'a>(&'a self, _text: &str, lowered: &str) -> Option<&'a str> {
        self.keywords
            .iter()
            .find(|(_, lower)| lowered.contains(lower.as_str()))
            .map(|(declared, _)| declared.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RegexRule {
    patterns: Vec<(String, Regex)>,
}

impl RegexRule {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut compiled = Vec::new();
        for p in patterns {
            let p = p.into();
            let re = RegexBuilder::new(&p).case_insensitive(true).build()?;
            compiled.push((p, re));
        }
        Ok(Self { patterns: compiled })
    }
}

impl RuleMatcher for RegexRule {
    fn kind(&self) -> RuleKind {
        RuleKind::Regex
    }

    fn find<'a>(&'a self, text: &str, _lowered: &str) -> Option<&'a str> {
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(declared, _)| declared.as_str())
    }
}

/// Compile a declared rule into its matcher.
pub fn build_matcher(rule: &Rule) -> Result<DynRuleMatcher, regex::Error> {
    Ok(match rule {
        Rule::Keyword { value } => Arc::new(KeywordRule::new(value.iter().cloned())),
        Rule::Regex { value } => Arc::new(RegexRule::new(value.iter().cloned())?),
    })
}

/// First rule (in declared order) that fires on `text`, or `None`.
pub fn first_match(text: &str, rules: &[DynRuleMatcher]) -> Option<RuleMatch> {
    let lowered = text.to_lowercase();
    rules.iter().enumerate().find_map(|(idx, rule)| {
        rule.find(text, &lowered).map(|term| RuleMatch {
            rule_index: idx,
            kind: rule.kind(),
            term: term.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(words: &[&str]) -> DynRuleMatcher {
        Arc::new(KeywordRule::new(words.iter().copied()))
    }

    #[test]
    fn keyword_is_case_insensitive_substring() {
        let rules = vec![kw(&["stupid", "hate"])];
        let m = first_match("You are STUPID.", &rules).unwrap();
        assert_eq!(m.term, "stupid");
        assert_eq!(m.kind, RuleKind::Keyword);
        assert_eq!(m.rule_index, 0);

        // substring, not word: "hateful" contains "hate"
        assert!(first_match("what a hateful remark", &rules).is_some());
        assert!(first_match("Nice weather today.", &rules).is_none());
    }

    #[test]
    fn declared_casing_is_reported() {
        let rules = vec![kw(&["HaTe"])];
        let m = first_match("i hate mondays", &rules).unwrap();
        assert_eq!(m.term, "HaTe");
        assert_eq!(m.describe(), "Matched keyword: 'HaTe'");
    }

    #[test]
    fn first_rule_in_declared_order_wins() {
        let rules = vec![kw(&["idiot"]), kw(&["stupid"])];
        let m = first_match("stupid idiot", &rules).unwrap();
        assert_eq!(m.term, "idiot");
        assert_eq!(m.rule_index, 0);

        let reversed = vec![kw(&["stupid"]), kw(&["idiot"])];
        let m = first_match("stupid idiot", &reversed).unwrap();
        assert_eq!(m.term, "stupid");
    }

    #[test]
    fn first_keyword_in_declared_order_wins_within_rule() {
        let rules = vec![kw(&["kill", "hate"])];
        // "hate" appears earlier in the text, but "kill" is declared first
        let m = first_match("I hate it, kill it", &rules).unwrap();
        assert_eq!(m.term, "kill");
    }

    #[test]
    fn regex_rule_matches_case_insensitively() {
        let rules: Vec<DynRuleMatcher> =
            vec![Arc::new(RegexRule::new([r"\bk+i+l+\b"]).unwrap())];
        let m = first_match("KIIILL them all", &rules).unwrap();
        assert_eq!(m.kind, RuleKind::Regex);
        assert_eq!(m.describe(), r"Matched pattern: '\bk+i+l+\b'");
        assert!(first_match("skill issue", &rules).is_none());
    }

    #[test]
    fn invalid_regex_is_rejected() {
        assert!(RegexRule::new(["(unclosed"]).is_err());
    }

    #[test]
    fn matches_default_method() {
        let rule = KeywordRule::new(["Spam"]);
        assert!(rule.matches("buy SPAM now"));
        assert!(!rule.matches("ham"));
    }

    #[test]
    fn no_rules_no_match() {
        assert!(first_match("anything", &[]).is_none());
    }
}
