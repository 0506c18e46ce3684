//! Persisted API key, kept in the local settings table

use secrecy::{ExposeSecret, SecretString};

use crate::db::DbPool;
use crate::{Error, Result};

/// Settings key holding the API key
const API_KEY_SETTING: &str = "api_key";

/// Local store for the user's API key
#[derive(Clone)]
pub struct KeyStore {
    db: DbPool,
}

impl KeyStore {
    /// Create a new key store backed by the given pool
    #[must_use]
    pub const fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Retrieve the stored key, or `None` if not configured
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get(&self) -> Result<Option<SecretString>> {
        let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
        let result = conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            rusqlite::params![API_KEY_SETTING],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(SecretString::from(value))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Database(e.to_string())),
        }
    }

    /// Insert or replace the stored key
    ///
    /// # Errors
    ///
    /// Returns an error if the key is blank or the database write fails.
    pub fn set(&self, api_key: &SecretString) -> Result<()> {
        let value = api_key.expose_secret().trim();
        if value.is_empty() {
            return Err(Error::Config("API key must not be empty".to_string()));
        }

        let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            rusqlite::params![API_KEY_SETTING, value],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        tracing::info!("stored API key");
        Ok(())
    }

    /// Remove the stored key
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn remove(&self) -> Result<()> {
        let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute(
            "DELETE FROM settings WHERE key = ?1",
            rusqlite::params![API_KEY_SETTING],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> DbPool {
        crate::db::init_memory().unwrap()
    }

    #[test]
    fn set_and_get_key() {
        let store = KeyStore::new(test_db());
        assert!(store.get().unwrap().is_none());

        store.set(&SecretString::from("AIza-test")).unwrap();
        let key = store.get().unwrap().unwrap();
        assert_eq!(key.expose_secret(), "AIza-test");
    }

    #[test]
    fn set_overwrites_previous_key() {
        let store = KeyStore::new(test_db());
        store.set(&SecretString::from("first")).unwrap();
        store.set(&SecretString::from("second")).unwrap();
        assert_eq!(store.get().unwrap().unwrap().expose_secret(), "second");
    }

    #[test]
    fn remove_key() {
        let store = KeyStore::new(test_db());
        store.set(&SecretString::from("AIza-test")).unwrap();
        store.remove().unwrap();
        assert!(store.get().unwrap().is_none());
    }

    #[test]
    fn blank_key_is_rejected() {
        let store = KeyStore::new(test_db());
        assert!(store.set(&SecretString::from("   ")).is_err());
    }
}
