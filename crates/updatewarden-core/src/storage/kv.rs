//! Key-value persistence keyed by policy identifier.
//!
//! Absence is a typed `None`, never an error string to match on. Batched
//! writes are applied in a single transaction so an interrupted save leaves
//! the previous values intact.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use super::data_dir;
use crate::error::{Result, StoreError};

/// Persistent store contract.
pub trait PersistentKv {
    fn read(&self, policy_id: &str, key: &str) -> Result<Option<String>, StoreError>;

    fn write(&self, policy_id: &str, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, policy_id: &str, key: &str) -> Result<(), StoreError>;

    /// Apply every entry atomically. `None` removes the key.
    fn write_batch(
        &self,
        policy_id: &str,
        entries: &[(&str, Option<String>)],
    ) -> Result<(), StoreError>;

    /// Remove every key stored for `policy_id`.
    fn clear(&self, policy_id: &str) -> Result<(), StoreError>;
}

/// SQLite-backed store at `<data_dir>/state.db`.
pub struct SqliteKv {
    conn: Connection,
}

impl SqliteKv {
    /// Open the store in the default data directory.
    ///
    /// # Errors
    /// Returns an error if the data directory or database cannot be opened.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("state.db");
        Ok(Self::open_at(&path)?)
    }

    /// Open (and create if needed) the database at `path`.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let kv = Self { conn };
        kv.migrate()?;
        Ok(kv)
    }

    /// Open an in-memory database (for tests and dry runs).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let kv = Self { conn };
        kv.migrate()?;
        Ok(kv)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "PRAGMA synchronous = FULL;

            CREATE TABLE IF NOT EXISTS deferral_kv (
                policy_id TEXT NOT NULL,
                key       TEXT NOT NULL,
                value     TEXT NOT NULL,
                PRIMARY KEY (policy_id, key)
            );",
        )?;
        Ok(())
    }
}

impl PersistentKv for SqliteKv {
    fn read(&self, policy_id: &str, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM deferral_kv WHERE policy_id = ?1 AND key = ?2",
                params![policy_id, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write(&self, policy_id: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO deferral_kv (policy_id, key, value) VALUES (?1, ?2, ?3)",
            params![policy_id, key, value],
        )?;
        Ok(())
    }

    fn remove(&self, policy_id: &str, key: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM deferral_kv WHERE policy_id = ?1 AND key = ?2",
            params![policy_id, key],
        )?;
        Ok(())
    }

    fn write_batch(
        &self,
        policy_id: &str,
        entries: &[(&str, Option<String>)],
    ) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        for (key, value) in entries {
            match value {
                Some(v) => {
                    tx.execute(
                        "INSERT OR REPLACE INTO deferral_kv (policy_id, key, value) VALUES (?1, ?2, ?3)",
                        params![policy_id, key, v],
                    )?;
                }
                None => {
                    tx.execute(
                        "DELETE FROM deferral_kv WHERE policy_id = ?1 AND key = ?2",
                        params![policy_id, key],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn clear(&self, policy_id: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM deferral_kv WHERE policy_id = ?1",
            params![policy_id],
        )?;
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RefCell<BTreeMap<(String, String), String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored for `policy_id`.
    pub fn len(&self, policy_id: &str) -> usize {
        self.entries
            .borrow()
            .keys()
            .filter(|(p, _)| p == policy_id)
            .count()
    }
}

impl PersistentKv for MemoryKv {
    fn read(&self, policy_id: &str, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .entries
            .borrow()
            .get(&(policy_id.to_string(), key.to_string()))
            .cloned())
    }

    fn write(&self, policy_id: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .borrow_mut()
            .insert((policy_id.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn remove(&self, policy_id: &str, key: &str) -> Result<(), StoreError> {
        self.entries
            .borrow_mut()
            .remove(&(policy_id.to_string(), key.to_string()));
        Ok(())
    }

    fn write_batch(
        &self,
        policy_id: &str,
        entries: &[(&str, Option<String>)],
    ) -> Result<(), StoreError> {
        let mut map = self.entries.borrow_mut();
        for (key, value) in entries {
            let k = (policy_id.to_string(), key.to_string());
            match value {
                Some(v) => {
                    map.insert(k, v.clone());
                }
                None => {
                    map.remove(&k);
                }
            }
        }
        Ok(())
    }

    fn clear(&self, policy_id: &str) -> Result<(), StoreError> {
        self.entries.borrow_mut().retain(|(p, _), _| p != policy_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_key_is_none() {
        let kv = SqliteKv::open_in_memory().unwrap();
        assert!(kv.read("policy", "deferral_count").unwrap().is_none());
    }

    #[test]
    fn write_read_remove() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.write("policy", "deferral_count", "2").unwrap();
        assert_eq!(kv.read("policy", "deferral_count").unwrap().as_deref(), Some("2"));
        kv.write("policy", "deferral_count", "3").unwrap();
        assert_eq!(kv.read("policy", "deferral_count").unwrap().as_deref(), Some("3"));
        kv.remove("policy", "deferral_count").unwrap();
        assert!(kv.read("policy", "deferral_count").unwrap().is_none());
    }

    #[test]
    fn policies_are_isolated() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.write("a", "times_ignored", "1").unwrap();
        kv.write("b", "times_ignored", "7").unwrap();
        kv.clear("a").unwrap();
        assert!(kv.read("a", "times_ignored").unwrap().is_none());
        assert_eq!(kv.read("b", "times_ignored").unwrap().as_deref(), Some("7"));
    }

    #[test]
    fn batch_sets_and_removes() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.write("p", "next_reminder_time", "100").unwrap();
        kv.write_batch(
            "p",
            &[
                ("deferral_count", Some("1".to_string())),
                ("next_reminder_time", None),
            ],
        )
        .unwrap();
        assert_eq!(kv.read("p", "deferral_count").unwrap().as_deref(), Some("1"));
        assert!(kv.read("p", "next_reminder_time").unwrap().is_none());
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.db");
        {
            let kv = SqliteKv::open_at(&path).unwrap();
            kv.write("p", "deferral_count", "2").unwrap();
        }
        let kv = SqliteKv::open_at(&path).unwrap();
        assert_eq!(kv.read("p", "deferral_count").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn memory_kv_matches_contract() {
        let kv = MemoryKv::new();
        kv.write_batch("p", &[("a", Some("1".into())), ("b", Some("2".into()))])
            .unwrap();
        assert_eq!(kv.len("p"), 2);
        kv.write_batch("p", &[("a", None)]).unwrap();
        assert!(kv.read("p", "a").unwrap().is_none());
        kv.clear("p").unwrap();
        assert_eq!(kv.len("p"), 0);
    }
}
