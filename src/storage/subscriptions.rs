//! Subscription model and store.
//!
//! A subscription is one (user, repository) pair being watched. Soft-deleted
//! by clearing `active`; never hard-deleted, so run history keeps a valid
//! foreign key. The `last_polled_at` watermark is written only by the
//! polling driver, after a subscription's detection pass completes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::Pool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: String,
    pub owner: String,
    pub repo: String,
    pub repo_full_name: String,
    pub active: bool,
    pub auto_test: bool,
    pub notify: bool,
    pub exclude_branches: Vec<String>,
    pub test_options: Option<serde_json::Value>,
    pub base_domain: Option<String>,
    pub credential_ref: Option<String>,
    pub last_polled_at: Option<DateTime<Utc>>,
}

/// Parameters for creating (or reactivating) a subscription.
#[derive(Debug, Clone, Default)]
pub struct NewSubscription {
    pub user_id: Option<String>,
    pub owner: String,
    pub repo: String,
    pub exclude_branches: Option<Vec<String>>,
    pub test_options: Option<serde_json::Value>,
    pub base_domain: Option<String>,
    pub credential_ref: Option<String>,
    pub notify: bool,
}

#[derive(Clone)]
pub struct SubscriptionStore {
    pool: Pool,
}

impl SubscriptionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Subscribe to a repository. If an inactive subscription already exists
    /// for (user, repo), it is reactivated and updated in place rather than
    /// duplicated; an already-active one is updated.
    pub fn subscribe(&self, new: NewSubscription) -> Result<i64> {
        let conn = self.pool.get()?;
        let user_id = new.user_id.unwrap_or_else(|| "default".to_string());
        let full_name = format!("{}/{}", new.owner, new.repo);
        let exclude = serde_json::to_string(
            &new.exclude_branches
                .unwrap_or_else(|| vec!["main".to_string()]),
        )?;
        let options = new
            .test_options
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM subscriptions WHERE user_id = ?1 AND repo_full_name = ?2
                 ORDER BY active DESC LIMIT 1",
                params![user_id, full_name],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            conn.execute(
                "UPDATE subscriptions
                 SET active = 1, auto_test = 1, notify = ?2, exclude_branches = ?3,
                     test_options = ?4, base_domain = ?5, credential_ref = ?6,
                     updated_at = datetime('now')
                 WHERE id = ?1",
                params![
                    id,
                    new.notify,
                    exclude,
                    options,
                    new.base_domain,
                    new.credential_ref
                ],
            )
            .context("Failed to reactivate subscription")?;
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO subscriptions
                (user_id, owner, repo, repo_full_name, notify, exclude_branches,
                 test_options, base_domain, credential_ref)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user_id,
                new.owner,
                new.repo,
                full_name,
                new.notify,
                exclude,
                options,
                new.base_domain,
                new.credential_ref
            ],
        )
        .context("Failed to insert subscription")?;

        Ok(conn.last_insert_rowid())
    }

    /// Soft-delete: clear the active flag, keep the row.
    pub fn unsubscribe(&self, id: i64) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE subscriptions SET active = 0, updated_at = datetime('now') WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            anyhow::bail!("Subscription {} not found", id);
        }
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<Subscription>> {
        let conn = self.pool.get()?;
        let sub = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM subscriptions WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()?;
        Ok(sub)
    }

    /// All subscriptions the polling driver should visit.
    pub fn list_active_auto_test(&self) -> Result<Vec<Subscription>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM subscriptions WHERE active = 1 AND auto_test = 1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([], from_row)?;
        let mut subs = Vec::new();
        for r in rows {
            subs.push(r?);
        }
        Ok(subs)
    }

    pub fn list_all(&self) -> Result<Vec<Subscription>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {COLUMNS} FROM subscriptions ORDER BY id"))?;
        let rows = stmt.query_map([], from_row)?;
        let mut subs = Vec::new();
        for r in rows {
            subs.push(r?);
        }
        Ok(subs)
    }

    /// Advance the poll watermark. Called once per subscription per cycle,
    /// after the whole detection pass, not per PR.
    pub fn update_last_polled(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE subscriptions SET last_polled_at = ?2, updated_at = datetime('now')
             WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )
        .context("Failed to update last_polled_at")?;
        Ok(())
    }
}

const COLUMNS: &str = "id, user_id, owner, repo, repo_full_name, active, auto_test, notify, \
                       exclude_branches, test_options, base_domain, credential_ref, last_polled_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let exclude_raw: String = row.get(8)?;
    let options_raw: Option<String> = row.get(9)?;
    let watermark_raw: Option<String> = row.get(12)?;

    Ok(Subscription {
        id: row.get(0)?,
        user_id: row.get(1)?,
        owner: row.get(2)?,
        repo: row.get(3)?,
        repo_full_name: row.get(4)?,
        active: row.get::<_, i64>(5)? != 0,
        auto_test: row.get::<_, i64>(6)? != 0,
        notify: row.get::<_, i64>(7)? != 0,
        exclude_branches: serde_json::from_str(&exclude_raw).unwrap_or_default(),
        test_options: options_raw.and_then(|s| serde_json::from_str(&s).ok()),
        base_domain: row.get(10)?,
        credential_ref: row.get(11)?,
        last_polled_at: watermark_raw
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testutil::temp_pool;

    fn new_sub(owner: &str, repo: &str) -> NewSubscription {
        NewSubscription {
            owner: owner.into(),
            repo: repo.into(),
            notify: true,
            ..Default::default()
        }
    }

    #[test]
    fn subscribe_defaults_exclude_main() {
        let (_dir, pool) = temp_pool();
        let store = SubscriptionStore::new(pool);

        let id = store.subscribe(new_sub("acme", "shop")).unwrap();
        let sub = store.get(id).unwrap().unwrap();
        assert_eq!(sub.repo_full_name, "acme/shop");
        assert_eq!(sub.exclude_branches, vec!["main".to_string()]);
        assert!(sub.active);
        assert!(sub.last_polled_at.is_none());
    }

    #[test]
    fn resubscribe_reactivates_instead_of_duplicating() {
        let (_dir, pool) = temp_pool();
        let store = SubscriptionStore::new(pool);

        let id = store.subscribe(new_sub("acme", "shop")).unwrap();
        store.unsubscribe(id).unwrap();
        assert!(!store.get(id).unwrap().unwrap().active);

        let id2 = store.subscribe(new_sub("acme", "shop")).unwrap();
        assert_eq!(id, id2);
        assert!(store.get(id).unwrap().unwrap().active);
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn list_active_skips_inactive() {
        let (_dir, pool) = temp_pool();
        let store = SubscriptionStore::new(pool);

        let a = store.subscribe(new_sub("acme", "shop")).unwrap();
        let _b = store.subscribe(new_sub("acme", "blog")).unwrap();
        store.unsubscribe(a).unwrap();

        let active = store.list_active_auto_test().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].repo_full_name, "acme/blog");
    }

    #[test]
    fn watermark_round_trips() {
        let (_dir, pool) = temp_pool();
        let store = SubscriptionStore::new(pool);

        let id = store.subscribe(new_sub("acme", "shop")).unwrap();
        let now = Utc::now();
        store.update_last_polled(id, now).unwrap();

        let sub = store.get(id).unwrap().unwrap();
        let stored = sub.last_polled_at.unwrap();
        assert!((stored - now).num_seconds().abs() < 2);
    }
}
