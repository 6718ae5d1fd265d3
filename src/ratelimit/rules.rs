//! Custom rate limit rules.
//!
//! Rules are an ordered list checked before the tier policy table. The first
//! rule whose matcher accepts the endpoint governs the request, so overlapping
//! rules must be listed from most specific to most general.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::policy::{duration_ms, LimitPolicy};
use crate::error::{QuotagateError, Result};

/// How a rule is written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRuleConfig {
    /// Rule name, also used in the counter key
    pub name: String,
    /// Endpoint matcher, written as `{exact: ...}` or `{pattern: ...}`
    #[serde(rename = "match", with = "serde_yaml::with::singleton_map")]
    pub matcher: MatcherConfig,
    /// Maximum requests per window
    pub max_requests: u64,
    /// Window length
    #[serde(rename = "window_ms", with = "duration_ms")]
    pub window: Duration,
}

/// Matcher as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherConfig {
    /// Matches endpoints containing this string
    Exact(String),
    /// Matches endpoints accepted by this regular expression
    Pattern(String),
}

/// A compiled endpoint matcher.
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    Exact(String),
    Pattern(Regex),
}

impl RuleMatcher {
    /// Whether this matcher accepts `endpoint`.
    pub fn matches(&self, endpoint: &str) -> bool {
        match self {
            RuleMatcher::Exact(needle) => endpoint.contains(needle.as_str()),
            RuleMatcher::Pattern(regex) => regex.is_match(endpoint),
        }
    }
}

/// A named rule with its own limits.
#[derive(Debug, Clone)]
pub struct CustomRule {
    pub name: String,
    pub matcher: RuleMatcher,
    pub policy: LimitPolicy,
}

impl CustomRule {
    /// Compile a rule from its configuration.
    pub fn compile(config: &CustomRuleConfig) -> Result<Self> {
        if config.name.is_empty() {
            return Err(QuotagateError::Config(
                "custom rule name must not be empty".to_string(),
            ));
        }
        if config.name.contains(':') {
            return Err(QuotagateError::Config(format!(
                "custom rule name '{}' must not contain ':'",
                config.name
            )));
        }

        let policy = LimitPolicy::new(config.max_requests, config.window);
        policy.validate(&format!("custom rule '{}'", config.name))?;

        let matcher = match &config.matcher {
            MatcherConfig::Exact(needle) => RuleMatcher::Exact(needle.clone()),
            MatcherConfig::Pattern(pattern) => {
                let regex = Regex::new(pattern).map_err(|source| QuotagateError::InvalidPattern {
                    rule: config.name.clone(),
                    source,
                })?;
                RuleMatcher::Pattern(regex)
            }
        };

        Ok(Self {
            name: config.name.clone(),
            matcher,
            policy,
        })
    }
}

/// Ordered, first-match-wins list of custom rules.
#[derive(Debug, Clone, Default)]
pub struct CustomRuleSet {
    rules: Vec<CustomRule>,
}

impl CustomRuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile rules in order.
    pub fn compile(configs: &[CustomRuleConfig]) -> Result<Self> {
        let rules = configs
            .iter()
            .map(CustomRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Load rules from a YAML string holding a list of rule configs.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let configs: Vec<CustomRuleConfig> = serde_yaml::from_str(yaml)
            .map_err(|e| QuotagateError::Config(format!("Failed to parse custom rules: {}", e)))?;
        Self::compile(&configs)
    }

    /// The first rule that matches `endpoint`.
    pub fn find(&self, endpoint: &str) -> Option<&CustomRule> {
        self.rules.iter().find(|rule| rule.matcher.matches(endpoint))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rules() {
        let yaml = r#"
- name: reports
  match:
    pattern: "^/api/v[0-9]+/reports"
  max_requests: 10
  window_ms: 60000
- name: search
  match:
    exact: /search
  max_requests: 30
  window_ms: 1000
"#;
        let rules = CustomRuleSet::from_yaml(yaml).unwrap();
        assert_eq!(rules.len(), 2);

        let rule = rules.find("/api/v2/reports/weekly").unwrap();
        assert_eq!(rule.name, "reports");
        assert_eq!(rule.policy.max_requests, 10);
        assert_eq!(rule.policy.window, Duration::from_secs(60));

        let rule = rules.find("/api/v1/search?q=x").unwrap();
        assert_eq!(rule.name, "search");
    }

    #[test]
    fn test_first_match_wins() {
        let yaml = r#"
- name: bulk-export
  match:
    exact: /export/bulk
  max_requests: 1
  window_ms: 60000
- name: any-export
  match:
    pattern: export
  max_requests: 5
  window_ms: 60000
"#;
        let rules = CustomRuleSet::from_yaml(yaml).unwrap();
        assert_eq!(rules.find("/v1/export/bulk").unwrap().name, "bulk-export");
        assert_eq!(rules.find("/v1/export/single").unwrap().name, "any-export");
    }

    #[test]
    fn test_no_match() {
        let rules = CustomRuleSet::compile(&[CustomRuleConfig {
            name: "uploads".to_string(),
            matcher: MatcherConfig::Exact("/upload".to_string()),
            max_requests: 3,
            window: Duration::from_secs(1),
        }])
        .unwrap();

        assert!(rules.find("/api/users").is_none());
        assert!(CustomRuleSet::new().find("/anything").is_none());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = CustomRuleSet::compile(&[CustomRuleConfig {
            name: "broken".to_string(),
            matcher: MatcherConfig::Pattern("([a-z".to_string()),
            max_requests: 1,
            window: Duration::from_secs(1),
        }])
        .unwrap_err();

        assert!(matches!(err, QuotagateError::InvalidPattern { ref rule, .. } if rule == "broken"));
    }

    fn rule(name: &str, window: Duration) -> CustomRuleConfig {
        CustomRuleConfig {
            name: name.to_string(),
            matcher: MatcherConfig::Exact("/x".to_string()),
            max_requests: 1,
            window,
        }
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = CustomRule::compile(&rule("instant", Duration::ZERO)).unwrap_err();
        assert!(matches!(err, QuotagateError::Config(ref msg) if msg.contains("instant")));
    }

    #[test]
    fn test_rule_name_with_separator_rejected() {
        assert!(CustomRule::compile(&rule("", Duration::from_secs(1))).is_err());
        assert!(CustomRule::compile(&rule("a:b", Duration::from_secs(1))).is_err());
        assert!(CustomRule::compile(&rule("export", Duration::from_secs(1))).is_ok());
    }

    #[test]
    fn test_matcher_serializes_as_map() {
        let yaml = serde_yaml::to_string(&rule("search", Duration::from_secs(1))).unwrap();
        assert!(yaml.contains("match:\n  exact: /x"), "{yaml}");

        let parsed: CustomRuleConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.matcher, MatcherConfig::Exact("/x".to_string()));
    }
}
