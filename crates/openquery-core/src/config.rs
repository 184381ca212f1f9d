//! Policy configuration (openquery.toml)
//!
//! A profile carries a [`PolicyConfig`] and a set of partial overrides for the
//! mode's [`SafeModeConfig`] preset. Effective configuration is always fully
//! populated: the preset for the active mode with the overrides merged on top.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Policy mode, selecting the default rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Strict preset: read-only, explicit columns, small limits
    Safe,

    /// Permissive preset
    Standard,
}

impl Default for PolicyMode {
    fn default() -> Self {
        Self::Safe
    }
}

impl PolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Standard => "standard",
        }
    }
}

impl std::fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PolicyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(Self::Safe),
            "standard" => Ok(Self::Standard),
            other => Err(ConfigError::Invalid(format!(
                "unknown policy mode '{}' (expected 'safe' or 'standard')",
                other
            ))),
        }
    }
}

/// SQL dialect used to parse statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    /// Generic ANSI-ish SQL
    Generic,

    /// PostgreSQL
    Postgres,

    /// MySQL / MariaDB
    MySql,

    /// SQLite
    Sqlite,
}

impl Default for SqlDialect {
    fn default() -> Self {
        Self::Generic
    }
}

/// Top-level policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Active policy mode
    #[serde(default)]
    pub mode: PolicyMode,

    /// Parser dialect
    #[serde(default)]
    pub dialect: SqlDialect,

    /// Accept stacked statements (`SELECT 1; SELECT 2`)
    #[serde(default)]
    pub allow_multiple_statements: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: PolicyMode::default(),
            dialect: SqlDialect::default(),
            allow_multiple_statements: false,
        }
    }
}

impl PolicyConfig {
    /// Config for a mode with every other field at its default
    pub fn for_mode(mode: PolicyMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Shallow-merge a partial update, returning the merged copy
    pub fn merged(&self, patch: &PolicyConfigPatch) -> Self {
        Self {
            mode: patch.mode.unwrap_or(self.mode),
            dialect: patch.dialect.unwrap_or(self.dialect),
            allow_multiple_statements: patch
                .allow_multiple_statements
                .unwrap_or(self.allow_multiple_statements),
        }
    }
}

/// Partial update for [`PolicyConfig`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<PolicyMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<SqlDialect>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_multiple_statements: Option<bool>,
}

/// Rule thresholds for one policy mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeModeConfig {
    /// Reject `SELECT *` and `tbl.*` projections
    pub disallow_select_star: bool,

    /// Bound read statements with a LIMIT
    pub enforce_limit: bool,

    /// LIMIT injected when a read has none
    pub default_limit: u64,

    /// Largest LIMIT allowed before clamping
    pub max_limit: u64,

    /// Tables that may never be referenced (matched case-insensitively)
    pub blocked_tables: BTreeSet<String>,

    /// Execution requires an EXPLAIN check first
    pub require_explain: bool,

    /// EXPLAIN row estimate above which execution is blocked
    pub max_estimated_rows: u64,

    /// EXPLAIN cost estimate above which execution is blocked
    pub max_estimated_cost: f64,
}

impl SafeModeConfig {
    /// Strict preset
    pub fn safe() -> Self {
        Self {
            disallow_select_star: true,
            enforce_limit: true,
            default_limit: 100,
            max_limit: 1000,
            blocked_tables: BTreeSet::new(),
            require_explain: true,
            max_estimated_rows: 100_000,
            max_estimated_cost: 10_000.0,
        }
    }

    /// Permissive preset
    pub fn standard() -> Self {
        Self {
            disallow_select_star: false,
            enforce_limit: true,
            default_limit: 1000,
            max_limit: 10_000,
            blocked_tables: BTreeSet::new(),
            require_explain: false,
            max_estimated_rows: 1_000_000,
            max_estimated_cost: 100_000.0,
        }
    }

    /// Preset for a policy mode
    pub fn preset(mode: PolicyMode) -> Self {
        match mode {
            PolicyMode::Safe => Self::safe(),
            PolicyMode::Standard => Self::standard(),
        }
    }

    /// Shallow-merge a partial update, returning the merged copy.
    ///
    /// `blocked_tables` is replaced wholesale when present in the patch.
    pub fn merged(&self, patch: &SafeModeConfigPatch) -> Self {
        Self {
            disallow_select_star: patch.disallow_select_star.unwrap_or(self.disallow_select_star),
            enforce_limit: patch.enforce_limit.unwrap_or(self.enforce_limit),
            default_limit: patch.default_limit.unwrap_or(self.default_limit),
            max_limit: patch.max_limit.unwrap_or(self.max_limit),
            blocked_tables: patch
                .blocked_tables
                .clone()
                .unwrap_or_else(|| self.blocked_tables.clone()),
            require_explain: patch.require_explain.unwrap_or(self.require_explain),
            max_estimated_rows: patch.max_estimated_rows.unwrap_or(self.max_estimated_rows),
            max_estimated_cost: patch.max_estimated_cost.unwrap_or(self.max_estimated_cost),
        }
    }

    /// Check that limits and thresholds are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_limit == 0 {
            return Err(ConfigError::Invalid("default_limit must be at least 1".to_string()));
        }
        if self.max_limit == 0 {
            return Err(ConfigError::Invalid("max_limit must be at least 1".to_string()));
        }
        if self.default_limit > self.max_limit {
            return Err(ConfigError::Invalid(format!(
                "default_limit ({}) must not exceed max_limit ({})",
                self.default_limit, self.max_limit
            )));
        }
        if !self.max_estimated_cost.is_finite() || self.max_estimated_cost < 0.0 {
            return Err(ConfigError::Invalid(
                "max_estimated_cost must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }

    /// Check whether a table name is blocked.
    ///
    /// Both the full (possibly qualified) name and its last segment are
    /// compared, so `users` blocks `public.users` as well.
    pub fn is_table_blocked(&self, full_name: &str, base_name: &str) -> Option<&str> {
        self.blocked_tables
            .iter()
            .find(|blocked| {
                blocked.eq_ignore_ascii_case(full_name) || blocked.eq_ignore_ascii_case(base_name)
            })
            .map(String::as_str)
    }
}

impl Default for SafeModeConfig {
    fn default() -> Self {
        Self::safe()
    }
}

/// Partial update for [`SafeModeConfig`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafeModeConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disallow_select_star: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce_limit: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_limit: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_limit: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_tables: Option<BTreeSet<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_explain: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_estimated_rows: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_estimated_cost: Option<f64>,
}

impl SafeModeConfigPatch {
    /// Layer `newer` on top of `self`; fields set in `newer` win
    pub fn combine(&self, newer: &SafeModeConfigPatch) -> Self {
        Self {
            disallow_select_star: newer.disallow_select_star.or(self.disallow_select_star),
            enforce_limit: newer.enforce_limit.or(self.enforce_limit),
            default_limit: newer.default_limit.or(self.default_limit),
            max_limit: newer.max_limit.or(self.max_limit),
            blocked_tables: newer
                .blocked_tables
                .clone()
                .or_else(|| self.blocked_tables.clone()),
            require_explain: newer.require_explain.or(self.require_explain),
            max_estimated_rows: newer.max_estimated_rows.or(self.max_estimated_rows),
            max_estimated_cost: newer.max_estimated_cost.or(self.max_estimated_cost),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Profile file: policy config plus safe-mode overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyProfile {
    /// Policy settings
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Overrides on the mode preset
    #[serde(default, skip_serializing_if = "SafeModeConfigPatch::is_empty")]
    pub safe_mode: SafeModeConfigPatch,
}

impl PolicyProfile {
    /// Load a profile from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        Self::from_toml(&contents)
    }

    /// Load a profile from a TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let profile: PolicyProfile =
            toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        profile.effective_safe_mode_config().validate()?;
        Ok(profile)
    }

    /// Save the profile to a TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// The mode preset with this profile's overrides applied
    pub fn effective_safe_mode_config(&self) -> SafeModeConfig {
        SafeModeConfig::preset(self.policy.mode).merged(&self.safe_mode)
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_safe() {
        let config = PolicyConfig::default();
        assert_eq!(config.mode, PolicyMode::Safe);
        assert_eq!(config.dialect, SqlDialect::Generic);
        assert!(!config.allow_multiple_statements);
    }

    #[test]
    fn presets_differ_by_strictness() {
        let safe = SafeModeConfig::safe();
        let standard = SafeModeConfig::standard();

        assert!(safe.disallow_select_star);
        assert!(!standard.disallow_select_star);
        assert!(safe.max_limit < standard.max_limit);
        assert!(safe.require_explain);
        assert!(safe.validate().is_ok());
        assert!(standard.validate().is_ok());
    }

    #[test]
    fn merge_replaces_blocked_tables_wholesale() {
        let base = SafeModeConfig::safe().merged(&SafeModeConfigPatch {
            blocked_tables: Some(["secrets".to_string(), "payroll".to_string()].into()),
            ..Default::default()
        });

        let merged = base.merged(&SafeModeConfigPatch {
            blocked_tables: Some(["audit".to_string()].into()),
            ..Default::default()
        });

        assert_eq!(merged.blocked_tables.len(), 1);
        assert!(merged.blocked_tables.contains("audit"));
        assert_eq!(merged.max_limit, base.max_limit);
    }

    #[test]
    fn blocked_table_matching_ignores_case_and_schema() {
        let config = SafeModeConfig::safe().merged(&SafeModeConfigPatch {
            blocked_tables: Some(["Users".to_string()].into()),
            ..Default::default()
        });

        assert_eq!(config.is_table_blocked("public.users", "users"), Some("Users"));
        assert_eq!(config.is_table_blocked("USERS", "USERS"), Some("Users"));
        assert_eq!(config.is_table_blocked("orders", "orders"), None);
    }

    #[test]
    fn patch_combine_prefers_newer_fields() {
        let older = SafeModeConfigPatch {
            max_limit: Some(50),
            default_limit: Some(10),
            ..Default::default()
        };
        let newer = SafeModeConfigPatch {
            max_limit: Some(75),
            ..Default::default()
        };

        let combined = older.combine(&newer);
        assert_eq!(combined.max_limit, Some(75));
        assert_eq!(combined.default_limit, Some(10));
    }

    #[test]
    fn invalid_limits_rejected() {
        let config = SafeModeConfig::safe().merged(&SafeModeConfigPatch {
            default_limit: Some(5000),
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let zero = SafeModeConfig::safe().merged(&SafeModeConfigPatch {
            max_limit: Some(0),
            ..Default::default()
        });
        assert!(zero.validate().is_err());
    }

    #[test]
    fn profile_from_toml() {
        let profile = PolicyProfile::from_toml(
            r#"
            [policy]
            mode = "standard"
            dialect = "postgres"

            [safe_mode]
            max_limit = 5000
            blocked_tables = ["secrets"]
            "#,
        )
        .unwrap();

        assert_eq!(profile.policy.mode, PolicyMode::Standard);
        assert_eq!(profile.policy.dialect, SqlDialect::Postgres);

        let effective = profile.effective_safe_mode_config();
        assert_eq!(effective.max_limit, 5000);
        assert_eq!(effective.default_limit, SafeModeConfig::standard().default_limit);
        assert!(effective.blocked_tables.contains("secrets"));
    }

    #[test]
    fn profile_rejects_inconsistent_limits() {
        let result = PolicyProfile::from_toml(
            r#"
            [safe_mode]
            default_limit = 2000
            max_limit = 10
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn profile_toml_roundtrip() {
        let mut profile = PolicyProfile::default();
        profile.safe_mode.max_limit = Some(250);

        let toml = toml::to_string(&profile).unwrap();
        let parsed = PolicyProfile::from_toml(&toml).unwrap();
        assert_eq!(profile, parsed);
    }

    #[test]
    fn mode_from_str() {
        assert_eq!("SAFE".parse::<PolicyMode>().unwrap(), PolicyMode::Safe);
        assert_eq!("standard".parse::<PolicyMode>().unwrap(), PolicyMode::Standard);
        assert!("power".parse::<PolicyMode>().is_err());
    }
}
