use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    path::Path,
};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTableMetadata,
    TableDefinition,
};

use crate::error::{Error, Result};

const EMBEDDINGS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("embeddings");

/// Header size: 4 bytes dimension.
const HEADER_SIZE: usize = 4;

/// Stable cache key for a chunk embedded by a given model.
///
/// The model ID is part of the key so switching models never serves
/// vectors from a different embedding space.
pub fn cache_key(model_id: &str, text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    model_id.hash(&mut hasher);
    text.hash(&mut hasher);
    hasher.finish()
}

/// Caches chunk embedding vectors keyed by [`cache_key`].
///
/// Binary format per entry:
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 LE values
pub struct EmbeddingDb {
    db: Database,
}

fn encode_into(dest: &mut [u8], vector: &[f32]) {
    dest[0..HEADER_SIZE].copy_from_slice(&(vector.len() as u32).to_le_bytes());
    dest[HEADER_SIZE..].copy_from_slice(bytemuck::cast_slice(vector));
}

fn decode(bytes: &[u8]) -> Option<Vec<f32>> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    let dimension = u32::from_le_bytes(header) as usize;
    let body = &bytes[HEADER_SIZE..];
    if body.len() != dimension * 4 {
        return None;
    }
    // Stored bytes carry no alignment guarantee, so decode per value.
    Some(
        body.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

impl EmbeddingDb {
    /// Open or create an embeddings database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use docqa::EmbeddingDb;
    ///
    /// let db = EmbeddingDb::open(&tmp.path().join("embeddings.redb")).unwrap();
    /// assert_eq!(db.len().unwrap(), 0);
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(EMBEDDINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Store one vector. Uses `insert_reserve` for zero-copy writes.
    pub fn store(&self, key: u64, vector: &[f32]) -> Result<()> {
        self.batch_store(&[(key, vector.to_vec())])
    }

    pub fn load(&self, key: u64) -> Result<Option<Vec<f32>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        Ok(table.get(key)?.and_then(|guard| decode(guard.value())))
    }

    /// Remove an embedding entry.
    pub fn remove(&self, key: u64) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(EMBEDDINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Store multiple vectors in a single transaction.
    pub fn batch_store(&self, entries: &[(u64, Vec<f32>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        if let Some((key, _)) = entries.iter().find(|(_, v)| v.is_empty()) {
            return Err(Error::Config(format!(
                "refusing to cache an empty embedding (key {key:016x})"
            )));
        }

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(EMBEDDINGS)?;
            for (key, vector) in entries {
                let byte_len = HEADER_SIZE + std::mem::size_of_val(vector.as_slice());
                let mut guard = table.insert_reserve(*key, byte_len)?;
                encode_into(guard.as_mut(), vector);
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Load multiple vectors in a single transaction, preserving input
    /// order. Missing or malformed entries come back as `None`.
    pub fn batch_load(&self, keys: &[u64]) -> Result<Vec<Option<Vec<f32>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;

        let mut results = Vec::with_capacity(keys.len());
        for &key in keys {
            results.push(table.get(key)?.and_then(|guard| decode(guard.value())));
        }
        Ok(results)
    }

    /// Number of cached vectors.
    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        Ok(table.len()?)
    }

    /// Drop every cached vector.
    pub fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(EMBEDDINGS)?;
            table.retain(|_, _| false)?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for EmbeddingDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingDb").finish_non_exhaustive()
    }
}
