use std::path::Path;

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    Table,
    TableDefinition,
};

use crate::error::Result;

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Persisted key/value settings (`config.redb`).
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;
        let config = Self { db };
        // Create the table up front so reads on a fresh file succeed.
        config.modify(|_| Ok(()))?;
        Ok(config)
    }

    /// Run `f` against the settings table in one committed write.
    fn modify<T>(
        &self,
        f: impl FnOnce(&mut Table<'_, &'static str, &'static str>) -> Result<T>,
    ) -> Result<T> {
        let txn = self.db.begin_write()?;
        let out = {
            let mut table = txn.open_table(SETTINGS)?;
            f(&mut table)?
        };
        txn.commit()?;
        Ok(out)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        tracing::debug!(key, value, "storing setting");
        self.modify(|table| {
            table.insert(key, value)?;
            Ok(())
        })
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Returns whether the key was present.
    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        self.modify(|table| Ok(table.remove(key)?.is_some()))
    }

    /// All stored settings, sorted by key.
    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        table
            .iter()?
            .map(|entry| {
                let (k, v) = entry?;
                Ok((k.value().to_string(), v.value().to_string()))
            })
            .collect()
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}
