//! Local signature cache using RocksDB.

use crate::error::Result;
use petition_core::{Error as CoreError, LocalCache};
use rocksdb::{Options, DB};
use std::path::Path;

/// RocksDB-backed key-scoped string store.
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    fn cache_key(key: &str) -> String {
        format!("cache:{}", key)
    }
}

impl LocalCache for Storage {
    fn read(&self, key: &str) -> petition_core::Result<Option<String>> {
        let data = self
            .db
            .get(Self::cache_key(key).as_bytes())
            .map_err(|e| CoreError::Cache(e.to_string()))?;

        match data {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| CoreError::LocalParse(e.to_string())),
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, value: &str) -> petition_core::Result<()> {
        self.db
            .put(Self::cache_key(key).as_bytes(), value.as_bytes())
            .map_err(|e| CoreError::Cache(e.to_string()))
    }
}
