//! FILENAME: persistence/src/writer.rs
//! PURPOSE: Serializes a store snapshot to a database file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use engine::MemoryStore;

use crate::error::PersistenceError;
use crate::{Envelope, FORMAT_NAME, FORMAT_VERSION};

/// Writes the whole store to `path` as a JSON snapshot. The file is written
/// through a temporary sibling and renamed into place.
pub fn save_store<P: AsRef<Path>>(store: &MemoryStore, path: P) -> Result<(), PersistenceError> {
    let path = path.as_ref();
    let envelope = Envelope {
        format: FORMAT_NAME.to_string(),
        version: FORMAT_VERSION,
        store: store.snapshot(),
    };
    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &envelope)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
