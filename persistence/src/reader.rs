//! FILENAME: persistence/src/reader.rs
//! PURPOSE: Reads a database file back into a store.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use engine::MemoryStore;

use crate::error::PersistenceError;
use crate::{Envelope, FORMAT_NAME, FORMAT_VERSION};

/// Reads a snapshot written by `save_store` and rebuilds the store. The
/// format name and version are checked before any data is touched.
pub fn load_store<P: AsRef<Path>>(path: P) -> Result<MemoryStore, PersistenceError> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);
    let envelope: Envelope = serde_json::from_reader(reader)?;
    if envelope.format != FORMAT_NAME {
        return Err(PersistenceError::InvalidFormat(format!(
            "unexpected format marker: {}",
            envelope.format
        )));
    }
    if envelope.version > FORMAT_VERSION {
        return Err(PersistenceError::InvalidFormat(format!(
            "file version {} is newer than supported version {}",
            envelope.version, FORMAT_VERSION
        )));
    }
    Ok(MemoryStore::from_snapshot(envelope.store))
}
