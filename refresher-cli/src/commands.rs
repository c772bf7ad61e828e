//! Subcommand implementations.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use refresher::config::CodeWaiterConfig;
use refresher::mailbox::{CodeWaiter, MailboxClient};
use refresher::models::{BatchSummary, DependentAccount, MasterAccount};
use refresher::pool::{HttpPoolApi, PoolSync};
use refresher::refresh::{AccountRefresher, RefreshOrchestrator};
use refresher::store::AccountStore;

use crate::config::AppConfig;
use crate::driver::HelperProvider;
use crate::error::Result;
use crate::store::TomlStore;

pub struct CommandExecutor {
    config: AppConfig,
}

impl CommandExecutor {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    fn store(&self) -> Result<TomlStore> {
        Ok(TomlStore::new(self.config.store_path()?))
    }

    fn pool(&self) -> PoolSync<HttpPoolApi> {
        PoolSync::new(
            HttpPoolApi::new(&self.config.pool.base_url),
            self.config.pool_config(),
        )
    }

    /// Logs into the mailbox provider as the master account.
    async fn mailbox_session(&self) -> Result<MailboxClient> {
        let mut client =
            MailboxClient::new(&self.config.mailbox.base_url, reqwest::Client::new());
        let token = client
            .login(&self.config.mailbox.email, &self.config.mailbox.password)
            .await?;
        client.set_auth(token);
        Ok(client)
    }

    /// One orchestrator cycle, printing the summary.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<()> {
        let summary = self.run_cycle(cancel).await?;
        print_summary(&summary);
        Ok(())
    }

    pub(crate) async fn run_cycle(&self, cancel: &CancellationToken) -> Result<BatchSummary> {
        let store = self.store()?;
        let mailbox = self.mailbox_session().await?;
        let codes = CodeWaiter::new(mailbox, CodeWaiterConfig::default());
        let provider = HelperProvider::new(
            self.config.helper.command.clone(),
            self.config.helper.args.clone(),
        );
        let pool = self.pool();
        let login = self.config.login_config();

        let refresher = AccountRefresher::new(&provider, &codes, &store, &pool, &login);
        let orchestrator =
            RefreshOrchestrator::new(&store, &refresher, self.config.batch_config());
        Ok(orchestrator
            .run(&self.config.mailbox.email, cancel)
            .await?)
    }

    /// Rebuild the pool from the local snapshot.
    pub async fn resync(&self) -> Result<()> {
        let snapshot = self.store()?.load().await?;
        if snapshot.accounts.is_empty() {
            warn!("snapshot has no dependent accounts, nothing to resync");
            return Ok(());
        }
        let report = self.pool().full_resync(&snapshot.accounts).await?;
        println!(
            "Resync done: {} inserted, {} skipped, {} records remote",
            report.inserted, report.skipped, report.remote_total
        );
        Ok(())
    }

    /// Remove pool records that no longer authenticate.
    pub async fn prune(&self) -> Result<()> {
        let (tested, removed) = self.pool().prune_invalid().await?;
        println!("Prune done: {tested} records tested, {removed} removed");
        Ok(())
    }

    /// Pull the mailbox account listing and merge it into the snapshot.
    pub async fn accounts(&self) -> Result<()> {
        let store = self.store()?;
        let mut snapshot = store.load().await?;

        let mailbox = self.mailbox_session().await?;
        let listing = mailbox.list_accounts().await?;
        info!(count = listing.len(), "mailbox accounts listed");

        let mut added = 0usize;
        let mut updated = 0usize;
        for entry in listing {
            if entry.email.eq_ignore_ascii_case(&self.config.mailbox.email) {
                snapshot.master = Some(MasterAccount {
                    email: entry.email,
                    account_id: Some(entry.account_id),
                });
                continue;
            }
            match snapshot
                .accounts
                .iter_mut()
                .find(|a| a.email == entry.email)
            {
                Some(existing) => {
                    existing.account_id = entry.account_id;
                    existing.status = entry.status;
                    updated += 1;
                }
                None => {
                    let mut account = DependentAccount::new(entry.email, entry.account_id);
                    account.status = entry.status;
                    snapshot.accounts.push(account);
                    added += 1;
                }
            }
        }

        if snapshot.master.is_none() {
            // The provider listing may omit the owner; keep the configured
            // identity so the pre-flight check still has something to match.
            snapshot.master = Some(MasterAccount {
                email: self.config.mailbox.email.clone(),
                account_id: None,
            });
        }

        store.save(&snapshot).await?;
        println!(
            "Snapshot updated: {added} accounts added, {updated} refreshed, {} total",
            snapshot.accounts.len()
        );
        Ok(())
    }
}

pub fn print_summary(summary: &BatchSummary) {
    println!(
        "Refresh done: {} accounts, {} succeeded, {} failed",
        summary.total, summary.succeeded, summary.failed
    );
    for result in &summary.results {
        if result.success {
            let action = result
                .pool_sync
                .as_ref()
                .map(|s| format!("{:?}", s.action).to_lowercase())
                .unwrap_or_else(|| "none".to_string());
            println!("  ok   {} (pool: {action})", result.email);
        } else {
            println!(
                "  FAIL {} ({})",
                result.email,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
