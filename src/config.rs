//! Deployment configuration, loaded from TOML.
//!
//! ```toml
//! hash_algorithm = "SHA256"
//! archive_after_days = 365
//!
//! [signing]
//! enabled = true
//! ed25519_seed = "…64 hex chars…"
//!
//! [retention_overrides.CONTRACT]
//! retention_years = 12
//! archive_after_days = 730
//! ```
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::document::DocumentType;
use crate::hash::HashAlgorithm;
use crate::retention::{RetentionPolicy, RetentionPolicyResolver};
use crate::signer::{Ed25519Signer, Signer, UnsignedSigner};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Algorithm for new chains and content hashes.
    pub hash_algorithm: HashAlgorithm,
    pub signing: SigningConfig,
    /// Age after which a non-archived document is offered for archival.
    pub archive_after_days: i64,
    /// Window used by the "expiring soon" search filter.
    pub expiring_soon_days: i64,
    pub default_page_limit: usize,
    pub max_page_limit: usize,
    pub default_retention: RetentionPolicy,
    pub retention_overrides: BTreeMap<DocumentType, RetentionPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub enabled: bool,
    pub ed25519_seed: Option<String>,
}

/// Upper bound for day windows, one century.
const MAX_WINDOW_DAYS: i64 = 36_525;

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::Sha256,
            signing: SigningConfig::default(),
            archive_after_days: 365,
            expiring_soon_days: 30,
            default_page_limit: 20,
            max_page_limit: 200,
            default_retention: RetentionPolicy::default(),
            retention_overrides: BTreeMap::new(),
        }
    }
}

impl LedgerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content).context("failed to parse ledger config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=MAX_WINDOW_DAYS).contains(&self.archive_after_days) {
            bail!("archive_after_days must be between 1 and {MAX_WINDOW_DAYS}");
        }
        if !(0..=MAX_WINDOW_DAYS).contains(&self.expiring_soon_days) {
            bail!("expiring_soon_days must be between 0 and {MAX_WINDOW_DAYS}");
        }
        if self.default_page_limit == 0 || self.max_page_limit < self.default_page_limit {
            bail!("page limits must satisfy 0 < default_page_limit <= max_page_limit");
        }
        if self.default_retention.retention_years == 0 {
            bail!("default_retention.retention_years must be positive");
        }
        if self.signing.enabled {
            self.signer()?;
        }
        Ok(())
    }

    pub fn signer(&self) -> anyhow::Result<Arc<dyn Signer>> {
        if !self.signing.enabled {
            return Ok(Arc::new(UnsignedSigner));
        }
        let Some(seed) = &self.signing.ed25519_seed else {
            bail!("signing.enabled requires signing.ed25519_seed");
        };
        Ok(Arc::new(Ed25519Signer::from_hex_seed(seed)?))
    }

    pub fn retention_resolver(&self) -> RetentionPolicyResolver {
        RetentionPolicyResolver::new(
            self.default_retention.clone(),
            self.retention_overrides.clone(),
        )
    }
}
