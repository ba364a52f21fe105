//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id INTEGER PRIMARY KEY,
            user_id TEXT NOT NULL DEFAULT 'default',
            owner TEXT NOT NULL,
            repo TEXT NOT NULL,
            repo_full_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            auto_test INTEGER NOT NULL DEFAULT 1,
            notify INTEGER NOT NULL DEFAULT 1,
            exclude_branches TEXT NOT NULL DEFAULT '[\"main\"]',
            test_options TEXT,
            base_domain TEXT,
            credential_ref TEXT,
            last_polled_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS test_runs (
            id INTEGER PRIMARY KEY,
            subscription_id INTEGER NOT NULL,
            pr_number INTEGER NOT NULL,
            pr_title TEXT,
            pr_url TEXT,
            branch_name TEXT,
            repo_full_name TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            results_json TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            completed_at TEXT,
            FOREIGN KEY (subscription_id) REFERENCES subscriptions(id)
        );

        -- One active subscription per (user, repository).
        CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_active_unique
            ON subscriptions(user_id, repo_full_name) WHERE active = 1;

        -- At most one pending/running run per (subscription, PR). The
        -- registry also does a transactional check-then-insert; this index
        -- is the backstop against racing pollers.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_test_runs_inflight_unique
            ON test_runs(subscription_id, pr_number)
            WHERE status IN ('pending', 'running');

        CREATE INDEX IF NOT EXISTS idx_subscriptions_repo ON subscriptions(repo_full_name);
        CREATE INDEX IF NOT EXISTS idx_test_runs_subscription ON test_runs(subscription_id);
        CREATE INDEX IF NOT EXISTS idx_test_runs_created ON test_runs(created_at);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        // Verify tables exist by querying them
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM subscriptions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM test_runs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_inflight_unique_index_rejects_duplicates() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        conn.execute(
            "INSERT INTO subscriptions (owner, repo, repo_full_name) VALUES ('o', 'r', 'o/r')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO test_runs (subscription_id, pr_number, status) VALUES (1, 7, 'pending')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO test_runs (subscription_id, pr_number, status) VALUES (1, 7, 'running')",
            [],
        );
        assert!(dup.is_err());

        // Terminal rows are outside the partial index
        conn.execute(
            "INSERT INTO test_runs (subscription_id, pr_number, status) VALUES (1, 7, 'failed')",
            [],
        )
        .unwrap();
    }
}
