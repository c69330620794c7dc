//! Multi-account session pool.
//!
//! Batches can be dispatched across several agent accounts in parallel; the
//! pool size bounds how many harbor processes run at once. Accounts come in
//! two flavors: API-key accounts export `ANTHROPIC_API_KEY`, subscription
//! accounts export `USE_SUBSCRIPTION=1` plus `CLAUDE_CONFIG_DIR` pointing at
//! the directory holding that account's OAuth credentials file.
//!
//! Between batches the pool sweeps every subscription account through the
//! token-health check; accounts whose refresh fails are dropped from the
//! usable set with a warning rather than aborting the batch.

use std::path::PathBuf;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::credentials::{default_credentials_path, CredentialsStore, TokenRefresher};
use crate::error::AccountError;

/// One agent account the pool can dispatch runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    /// This account's OAuth credentials file.
    pub credentials: PathBuf,
    /// API key; when absent the subscription OAuth flow is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Account {
    /// Parses a CLI account spec of the form `name=credentials_path`.
    pub fn parse_spec(spec: &str) -> Result<Self, AccountError> {
        let (name, path) = spec
            .split_once('=')
            .ok_or_else(|| AccountError::InvalidSpec(spec.to_string()))?;
        if name.is_empty() || path.is_empty() {
            return Err(AccountError::InvalidSpec(spec.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            credentials: PathBuf::from(path),
            api_key: None,
        })
    }

    /// Store for this account's credentials file.
    pub fn store(&self) -> CredentialsStore {
        CredentialsStore::new(&self.credentials)
    }

    /// True when this account authenticates with OAuth credentials.
    pub fn is_subscription(&self) -> bool {
        self.api_key.is_none()
    }

    /// Environment exported to harbor for runs on this account.
    pub fn env(&self) -> Vec<(String, String)> {
        match &self.api_key {
            Some(key) => vec![("ANTHROPIC_API_KEY".to_string(), key.clone())],
            None => {
                let mut env = vec![("USE_SUBSCRIPTION".to_string(), "1".to_string())];
                if let Some(config_dir) = self.credentials.parent() {
                    env.push((
                        "CLAUDE_CONFIG_DIR".to_string(),
                        config_dir.display().to_string(),
                    ));
                }
                env
            }
        }
    }
}

/// YAML pool file: `accounts: [{name, credentials, api_key?}, ...]`.
#[derive(Debug, Serialize, Deserialize)]
struct PoolFile {
    accounts: Vec<Account>,
}

/// Fixed set of accounts runs are distributed across.
#[derive(Debug)]
pub struct AccountPool {
    accounts: Vec<Account>,
}

impl AccountPool {
    /// Builds a pool, rejecting empty sets and duplicate names.
    pub fn new(accounts: Vec<Account>) -> Result<Self, AccountError> {
        if accounts.is_empty() {
            return Err(AccountError::Empty);
        }
        let mut seen = std::collections::HashSet::new();
        for account in &accounts {
            if !seen.insert(account.name.as_str()) {
                return Err(AccountError::DuplicateName(account.name.clone()));
            }
        }
        Ok(Self { accounts })
    }

    /// Single-account pool for the ambient login.
    ///
    /// Uses `api_key` when given, otherwise the default credentials file.
    pub fn single(api_key: Option<String>) -> Self {
        Self {
            accounts: vec![Account {
                name: "default".to_string(),
                credentials: default_credentials_path(),
                api_key,
            }],
        }
    }

    /// Loads a pool from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self, AccountError> {
        let content = std::fs::read_to_string(path)?;
        let file: PoolFile = serde_yaml::from_str(&content)?;
        Self::new(file.accounts)
    }

    /// Builds a pool from repeated `name=credentials_path` CLI specs.
    pub fn from_specs(specs: &[String]) -> Result<Self, AccountError> {
        let accounts = specs
            .iter()
            .map(|s| Account::parse_spec(s))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(accounts)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Token-health sweep: checks every subscription account's credentials,
    /// refreshing where needed, and returns the usable subset.
    ///
    /// API-key accounts are always usable. A subscription account whose
    /// load or refresh fails is excluded with a warning; it does not abort
    /// the sweep.
    pub async fn healthy_accounts(&self, refresher: &TokenRefresher) -> Vec<Account> {
        let checks = self.accounts.iter().map(|account| async move {
            if !account.is_subscription() {
                return Some(account.clone());
            }
            match refresher.ensure_fresh(&account.store()).await {
                Ok(refreshed) => {
                    debug!(account = %account.name, refreshed, "Account token healthy");
                    Some(account.clone())
                }
                Err(e) => {
                    warn!(account = %account.name, "Dropping account from pool: {e}");
                    None
                }
            }
        });

        join_all(checks).await.into_iter().flatten().collect()
    }
}
