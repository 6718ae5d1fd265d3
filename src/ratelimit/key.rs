//! Counter key construction.
//!
//! Every keyspace carries its own prefix so that caller-supplied tenant ids
//! cannot alias another keyspace. The tenant id is always followed by at most
//! one `:`-free segment, which keeps keys unique even when tenants contain `:`.

use super::policy::Category;

/// A key that identifies one counter in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QuotaKey {
    /// Tenant-wide entry. Carries blocks that apply to every endpoint.
    Tenant(String),
    /// Tier quota for one endpoint category.
    Tier { tenant: String, category: Category },
    /// Quota for a named custom rule.
    Rule { tenant: String, rule: String },
    /// Sub-second burst counter.
    Burst(String),
}

impl QuotaKey {
    pub fn tenant(tenant: &str) -> Self {
        QuotaKey::Tenant(tenant.to_string())
    }

    pub fn tier(tenant: &str, category: Category) -> Self {
        QuotaKey::Tier {
            tenant: tenant.to_string(),
            category,
        }
    }

    pub fn rule(tenant: &str, rule: &str) -> Self {
        QuotaKey::Rule {
            tenant: tenant.to_string(),
            rule: rule.to_string(),
        }
    }

    pub fn burst(tenant: &str) -> Self {
        QuotaKey::Burst(tenant.to_string())
    }

    /// The store key for this counter.
    pub fn to_string_key(&self) -> String {
        match self {
            QuotaKey::Tenant(tenant) => format!("tenant:{}", tenant),
            QuotaKey::Tier { tenant, category } => format!("tier:{}:{}", tenant, category),
            QuotaKey::Rule { tenant, rule } => format!("rule:{}:{}", tenant, rule),
            QuotaKey::Burst(tenant) => format!("burst:{}", tenant),
        }
    }
}

impl std::fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
