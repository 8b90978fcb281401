use mailmeta_core::model::Limit;

use crate::column::{Consistency, KeysetMode};

/// Consistency levels for plain requests and for lightweight transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistenciesConfig {
    pub regular: Consistency,
    pub lightweight_transaction: Consistency,
}

impl Default for ConsistenciesConfig {
    fn default() -> Self {
        Self {
            regular: Consistency::Quorum,
            lightweight_transaction: Consistency::Serial,
        }
    }
}

impl ConsistenciesConfig {
    pub fn new(
        regular: Consistency,
        lightweight_transaction: Consistency,
    ) -> anyhow::Result<Self> {
        if regular.is_serial() {
            return Err(anyhow::anyhow!(
                "regular consistency level must not be serial, got {regular}"
            ));
        }
        if !lightweight_transaction.is_serial() {
            return Err(anyhow::anyhow!(
                "lightweight transaction consistency level must be SERIAL or LOCAL_SERIAL, got {lightweight_transaction}"
            ));
        }
        Ok(Self {
            regular,
            lightweight_transaction,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StorageConfig {
    /// Batch size of `changes_since` when the caller does not pass one.
    pub default_change_limit: Limit,
    pub keyset_mode: KeysetMode,
    pub consistencies: ConsistenciesConfig,
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_values(
            std::env::var("EMAIL_CHANGE_DEFAULT_LIMIT").ok(),
            std::env::var("MAIL_REPOSITORY_STRONG_CONSISTENCY").ok(),
            std::env::var("CONSISTENCY_LEVEL_REGULAR").ok(),
            std::env::var("CONSISTENCY_LEVEL_LIGHTWEIGHT_TRANSACTION").ok(),
        )
    }

    fn from_values(
        default_change_limit: Option<String>,
        strong_consistency: Option<String>,
        regular: Option<String>,
        lightweight_transaction: Option<String>,
    ) -> anyhow::Result<Self> {
        let default_change_limit = parse_limit(default_change_limit)?;
        let strict = parse_bool(strong_consistency, "MAIL_REPOSITORY_STRONG_CONSISTENCY")?;
        let keyset_mode = if strict {
            KeysetMode::Strict
        } else {
            KeysetMode::Relaxed
        };
        let consistencies = ConsistenciesConfig::new(
            parse_consistency(regular, Consistency::Quorum, "CONSISTENCY_LEVEL_REGULAR")?,
            parse_consistency(
                lightweight_transaction,
                Consistency::Serial,
                "CONSISTENCY_LEVEL_LIGHTWEIGHT_TRANSACTION",
            )?,
        )?;

        Ok(Self {
            default_change_limit,
            keyset_mode,
            consistencies,
        })
    }
}

fn parse_limit(value: Option<String>) -> anyhow::Result<Limit> {
    let Some(raw) = value else {
        return Ok(Limit::default());
    };
    let parsed: usize = raw.trim().parse().map_err(|_| {
        anyhow::anyhow!("EMAIL_CHANGE_DEFAULT_LIMIT must be a positive integer, got {raw:?}")
    })?;
    Limit::new(parsed).map_err(|error| anyhow::anyhow!("EMAIL_CHANGE_DEFAULT_LIMIT: {error}"))
}

fn parse_bool(value: Option<String>, name: &str) -> anyhow::Result<bool> {
    let Some(raw) = value else {
        return Ok(true);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(anyhow::anyhow!("{name} must be true or false, got {raw:?}")),
    }
}

fn parse_consistency(
    value: Option<String>,
    default: Consistency,
    name: &str,
) -> anyhow::Result<Consistency> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|error| anyhow::anyhow!("{name}: {error}")),
    }
}
