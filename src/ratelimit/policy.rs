//! Subscription tiers and their quota policies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::QuotagateError;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Policy applied when neither the tier nor its `api` category has an entry.
pub const FALLBACK_POLICY: LimitPolicy = LimitPolicy::new(100, MINUTE);

/// A tenant's subscription level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Tier {
    #[default]
    Basic,
    Standard,
    Premium,
    Enterprise,
}

impl Tier {
    /// All tiers, from least to most generous.
    pub const ALL: [Tier; 4] = [Tier::Basic, Tier::Standard, Tier::Premium, Tier::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Standard => "standard",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Parse a tier name, falling back to `Basic` for anything unrecognised.
    ///
    /// Names come from callers, so the fallback is only logged at debug.
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::debug!(tier = %name, "Unknown tier, falling back to basic");
            Tier::Basic
        })
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a tier name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTier(pub String);

impl fmt::Display for UnknownTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tier '{}'", self.0)
    }
}

impl std::error::Error for UnknownTier {}

impl TryFrom<String> for Tier {
    type Error = UnknownTier;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Tier::Basic),
            "standard" => Ok(Tier::Standard),
            "premium" => Ok(Tier::Premium),
            "enterprise" => Ok(Tier::Enterprise),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}

/// Coarse endpoint category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Category {
    Api,
    Export,
    Upload,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Api => "api",
            Category::Export => "export",
            Category::Upload => "upload",
        }
    }

    /// Classify an endpoint path by substring.
    ///
    /// `export`/`download` win over `upload`/`import` when a path contains both.
    pub fn classify(endpoint: &str) -> Self {
        let path = endpoint.to_ascii_lowercase();
        if path.contains("export") || path.contains("download") {
            Category::Export
        } else if path.contains("upload") || path.contains("import") {
            Category::Upload
        } else {
            Category::Api
        }
    }
}

impl TryFrom<String> for Category {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        match name.as_str() {
            "api" => Ok(Category::Api),
            "export" => Ok(Category::Export),
            "upload" => Ok(Category::Upload),
            _ => Err(format!("unknown category '{}'", name)),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric limits for one tier and category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPolicy {
    /// Maximum requests admitted per window
    pub max_requests: u64,
    /// Window length
    #[serde(rename = "window_ms", with = "duration_ms")]
    pub window: Duration,
}

impl LimitPolicy {
    pub const fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Reject limits the fixed-window counter cannot enforce.
    pub fn validate(&self, name: &str) -> crate::error::Result<()> {
        if self.window.is_zero() {
            return Err(QuotagateError::Config(format!(
                "{}: window_ms must be greater than zero",
                name
            )));
        }
        Ok(())
    }
}

/// Immutable tier × category → limits table.
///
/// Limits are expected to be non-decreasing from `basic` to `enterprise` for a
/// fixed category. That is a property of the data, not something enforced here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierPolicyTable {
    tiers: HashMap<Tier, HashMap<Category, LimitPolicy>>,
}

impl TierPolicyTable {
    /// Build a table from explicit entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (Tier, Category, LimitPolicy)>) -> Self {
        let mut tiers: HashMap<Tier, HashMap<Category, LimitPolicy>> = HashMap::new();
        for (tier, category, policy) in entries {
            tiers.entry(tier).or_default().insert(category, policy);
        }
        Self { tiers }
    }

    /// Look up the limits for a tier and category.
    ///
    /// Falls back to the tier's `api` limits, then to [`FALLBACK_POLICY`].
    pub fn lookup(&self, tier: Tier, category: Category) -> LimitPolicy {
        let Some(categories) = self.tiers.get(&tier) else {
            return FALLBACK_POLICY;
        };
        categories
            .get(&category)
            .or_else(|| categories.get(&Category::Api))
            .copied()
            .unwrap_or(FALLBACK_POLICY)
    }

    /// Validate every policy in the table.
    pub fn validate(&self) -> crate::error::Result<()> {
        for (tier, categories) in &self.tiers {
            for (category, policy) in categories {
                policy.validate(&format!("tiers.{}.{}", tier, category))?;
            }
        }
        Ok(())
    }
}

impl Default for TierPolicyTable {
    fn default() -> Self {
        use Category::*;
        use Tier::*;

        Self::from_entries([
            (Basic, Api, LimitPolicy::new(100, MINUTE)),
            (Basic, Export, LimitPolicy::new(10, HOUR)),
            (Basic, Upload, LimitPolicy::new(20, HOUR)),
            (Standard, Api, LimitPolicy::new(500, MINUTE)),
            (Standard, Export, LimitPolicy::new(50, HOUR)),
            (Standard, Upload, LimitPolicy::new(100, HOUR)),
            (Premium, Api, LimitPolicy::new(2_000, MINUTE)),
            (Premium, Export, LimitPolicy::new(200, HOUR)),
            (Premium, Upload, LimitPolicy::new(500, HOUR)),
            (Enterprise, Api, LimitPolicy::new(10_000, MINUTE)),
            (Enterprise, Export, LimitPolicy::new(1_000, HOUR)),
            (Enterprise, Upload, LimitPolicy::new(2_000, HOUR)),
        ])
    }
}

/// Serde helper for durations written as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_categories() {
        assert_eq!(Category::classify("/api/v1/reports/export"), Category::Export);
        assert_eq!(Category::classify("/files/download/123"), Category::Export);
        assert_eq!(Category::classify("/media/upload"), Category::Upload);
        assert_eq!(Category::classify("/contacts/import"), Category::Upload);
        assert_eq!(Category::classify("/api/v1/users"), Category::Api);
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("Premium".parse::<Tier>(), Ok(Tier::Premium));
        assert_eq!(" enterprise ".parse::<Tier>(), Ok(Tier::Enterprise));
        assert!("gold".parse::<Tier>().is_err());
        assert_eq!(Tier::parse_or_default("gold"), Tier::Basic);
    }

    #[test]
    fn test_default_table_is_monotonic() {
        let table = TierPolicyTable::default();
        for category in [Category::Api, Category::Export, Category::Upload] {
            let limits: Vec<u64> = Tier::ALL
                .iter()
                .map(|tier| table.lookup(*tier, category).max_requests)
                .collect();
            assert!(limits.windows(2).all(|pair| pair[0] <= pair[1]), "{category}: {limits:?}");
        }
    }

    #[test]
    fn test_lookup_falls_back_to_api() {
        let table = TierPolicyTable::from_entries([(
            Tier::Premium,
            Category::Api,
            LimitPolicy::new(42, MINUTE),
        )]);

        assert_eq!(table.lookup(Tier::Premium, Category::Export).max_requests, 42);
        assert_eq!(table.lookup(Tier::Basic, Category::Api), FALLBACK_POLICY);
    }

    #[test]
    fn test_table_from_yaml() {
        let yaml = r#"
basic:
  api:
    max_requests: 5
    window_ms: 1000
"#;
        let table: TierPolicyTable = serde_yaml::from_str(yaml).unwrap();
        let policy = table.lookup(Tier::Basic, Category::Upload);
        assert_eq!(policy.max_requests, 5);
        assert_eq!(policy.window, Duration::from_secs(1));

        assert!(serde_yaml::from_str::<TierPolicyTable>("gold:\n  api: { max_requests: 1, window_ms: 1 }").is_err());
        assert!(serde_yaml::from_str::<TierPolicyTable>("basic:\n  stream: { max_requests: 1, window_ms: 1 }").is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(TierPolicyTable::default().validate().is_ok());

        let table = TierPolicyTable::from_entries([(
            Tier::Standard,
            Category::Export,
            LimitPolicy::new(1, Duration::ZERO),
        )]);
        let err = table.validate().unwrap_err();
        assert!(matches!(err, QuotagateError::Config(ref msg) if msg.contains("tiers.standard.export")));
    }
}
