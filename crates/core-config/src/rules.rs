//! Opaque window-matching rule sets.
//!
//! The rule *language* is an external collaborator; this module only defines
//! the evaluation surface the engine consults: a [`RuleSet`] answers
//! `matches` (bool) and `value` (the payload of the first matching rule, used
//! by opacity rules). Predicates are installed as plain closures over a
//! [`RuleTarget`] snapshot, so tests can install arbitrary rules without any
//! pattern syntax.

use core_events::WinType;

/// The window attributes a rule may inspect, borrowed for one evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleTarget<'a> {
    pub name: Option<&'a str>,
    pub class_general: Option<&'a str>,
    pub class_instance: Option<&'a str>,
    pub role: Option<&'a str>,
    pub wintype: WinType,
    pub focused: bool,
    pub override_redirect: bool,
    pub has_alpha: bool,
    pub width: u16,
    pub height: u16,
}

type Predicate = Box<dyn Fn(&RuleTarget<'_>) -> bool>;

/// A single compiled rule: predicate plus optional payload value.
pub struct Rule {
    pred: Predicate,
    value: Option<f64>,
    /// Source pattern text, kept for diagnostics only.
    pattern: String,
}

impl Rule {
    pub fn new(pattern: impl Into<String>, pred: impl Fn(&RuleTarget<'_>) -> bool + 'static) -> Self {
        Self {
            pred: Box::new(pred),
            value: None,
            pattern: pattern.into(),
        }
    }

    pub fn with_value(
        pattern: impl Into<String>,
        value: f64,
        pred: impl Fn(&RuleTarget<'_>) -> bool + 'static,
    ) -> Self {
        Self {
            pred: Box::new(pred),
            value: Some(value),
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("pattern", &self.pattern)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

/// Ordered rule list; first match wins.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when any rule matches. Empty sets never match.
    pub fn matches(&self, target: &RuleTarget<'_>) -> bool {
        self.rules.iter().any(|r| (r.pred)(target))
    }

    /// Payload of the first matching rule, if it carries one.
    pub fn value(&self, target: &RuleTarget<'_>) -> Option<f64> {
        self.rules
            .iter()
            .find(|r| (r.pred)(target))
            .and_then(|r| r.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_never_matches() {
        let set = RuleSet::default();
        assert!(!set.matches(&RuleTarget::default()));
        assert_eq!(set.value(&RuleTarget::default()), None);
    }

    #[test]
    fn first_match_wins_for_values() {
        let mut set = RuleSet::default();
        set.push(Rule::with_value("class = 'term'", 0.8, |t| {
            t.class_general == Some("term")
        }));
        set.push(Rule::with_value("*", 0.5, |_| true));
        let term = RuleTarget {
            class_general: Some("term"),
            ..Default::default()
        };
        assert_eq!(set.value(&term), Some(0.8));
        assert_eq!(set.value(&RuleTarget::default()), Some(0.5));
    }

    #[test]
    fn predicates_see_the_snapshot() {
        let mut set = RuleSet::default();
        set.push(Rule::new("wintype tooltip", |t| {
            t.wintype == core_events::WinType::Tooltip
        }));
        let tip = RuleTarget {
            wintype: core_events::WinType::Tooltip,
            ..Default::default()
        };
        assert!(set.matches(&tip));
        assert!(!set.matches(&RuleTarget::default()));
    }
}
