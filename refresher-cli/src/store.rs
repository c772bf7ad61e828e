//! TOML-file implementation of the account snapshot store.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;

use refresher::models::{AccountSnapshot, SessionTokens};
use refresher::store::{AccountStore, StoreError};

/// Snapshot persistence in a single TOML file.
///
/// A process-local mutex serializes read-modify-write cycles; concurrent
/// `update_tokens` calls from one wave would otherwise lose writes.
pub struct TomlStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TomlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<AccountSnapshot, StoreError> {
        if !self.path.exists() {
            return Ok(AccountSnapshot::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        toml::from_str(&raw).map_err(|e| StoreError::Malformed(e.to_string()))
    }

    fn write(&self, snapshot: &AccountSnapshot) -> Result<(), StoreError> {
        let raw = toml::to_string_pretty(snapshot).map_err(|e| StoreError::Malformed(e.to_string()))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for TomlStore {
    async fn load(&self) -> Result<AccountSnapshot, StoreError> {
        let _guard = self.lock.lock();
        self.read()
    }

    async fn save(&self, snapshot: &AccountSnapshot) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        self.write(snapshot)
    }

    async fn update_tokens(&self, email: &str, tokens: &SessionTokens) -> Result<(), StoreError> {
        // Hold the lock across the whole read-modify-write.
        let _guard = self.lock.lock();
        let mut snapshot = self.read()?;
        let account = snapshot
            .accounts
            .iter_mut()
            .find(|a| a.email == email)
            .ok_or_else(|| StoreError::UnknownAccount(email.to_string()))?;
        account.tokens = Some(tokens.clone());
        self.write(&snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refresher::models::{DependentAccount, MasterAccount};

    fn snapshot() -> AccountSnapshot {
        AccountSnapshot {
            master: Some(MasterAccount {
                email: "master@example.com".to_string(),
                account_id: Some(1),
            }),
            accounts: vec![DependentAccount::new("dep@example.com", 2)],
        }
    }

    fn tokens() -> SessionTokens {
        SessionTokens {
            team_id: "team-1".to_string(),
            secure_c_ses: "ses".to_string(),
            host_c_oses: String::new(),
            csesidx: "4".to_string(),
        }
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlStore::new(dir.path().join("accounts.toml"));

        store.save(&snapshot()).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded.master.unwrap().email, "master@example.com");
        assert_eq!(loaded.accounts.len(), 1);
        assert!(loaded.accounts[0].tokens.is_none());
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlStore::new(dir.path().join("absent.toml"));

        let loaded = store.load().await.unwrap();
        assert!(loaded.master.is_none());
        assert!(loaded.accounts.is_empty());
    }

    #[tokio::test]
    async fn update_tokens_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.toml");
        let store = TomlStore::new(&path);
        store.save(&snapshot()).await.unwrap();

        store
            .update_tokens("dep@example.com", &tokens())
            .await
            .unwrap();

        let reloaded = TomlStore::new(&path).load().await.unwrap();
        let stored = reloaded.accounts[0].tokens.as_ref().unwrap();
        assert_eq!(stored.team_id, "team-1");
        assert_eq!(stored.csesidx, "4");
    }
}
