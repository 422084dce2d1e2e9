use rusqlite::{params, Connection};

use crate::adder::AdderEntry;
use crate::error::Result;

/// SQLite snapshot of the repeat-offense counters. Best-effort: the engine
/// logs and carries on when this store fails.
pub struct AdderStore {
    conn: Connection,
}

impl AdderStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS adder_entries (
                user_id INTEGER NOT NULL,
                adder_key TEXT NOT NULL,
                count INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, adder_key)
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Replaces the stored snapshot.
    pub fn persist_snapshot(&mut self, entries: &[AdderEntry]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM adder_entries", [])?;
        for e in entries {
            tx.execute(
                "INSERT INTO adder_entries (user_id, adder_key, count, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![e.user as i64, e.key, e.count as i64, e.expires_at as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<AdderEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id, adder_key, count, expires_at FROM adder_entries")?;
        let rows = stmt.query_map([], |row| {
            Ok(AdderEntry {
                user: row.get::<_, i64>(0)? as u64,
                key: row.get(1)?,
                count: row.get::<_, i64>(2)? as u32,
                expires_at: row.get::<_, i64>(3)? as u64,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
