//! Tar payloads injected into containers before start.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::bootstrap::{BOOTSTRAP_ARCHIVE_PATH, BOOTSTRAP_SCRIPT, SU_EXEC_ARCHIVE_PATH};
use crate::error::Result;

/// Content of one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// One file in a payload archive. Entries are always owned by root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEntry {
    pub source: PayloadSource,
    pub mode: u32,
}

impl PayloadEntry {
    pub fn bytes(payload: impl Into<Vec<u8>>, mode: u32) -> Self {
        Self {
            source: PayloadSource::Bytes(payload.into()),
            mode,
        }
    }

    pub fn file(path: impl Into<PathBuf>, mode: u32) -> Self {
        Self {
            source: PayloadSource::File(path.into()),
            mode,
        }
    }
}

/// Build a tar archive from `entries`, keyed by archive path.
///
/// Entries are written in path order with owner/group root (0/0), the given
/// mode and a zero mtime, so equal input always yields equal bytes.
pub fn pack_files(entries: &BTreeMap<String, PayloadEntry>) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, entry) in entries {
        let data = match &entry.source {
            PayloadSource::Bytes(bytes) => bytes.clone(),
            PayloadSource::File(source) => std::fs::read(source)?,
        };

        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(entry.mode);
        header.set_uid(0);
        header.set_gid(0);
        header.set_username("root")?;
        header.set_groupname("root")?;
        header.set_mtime(0);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, path, data.as_slice())?;
    }
    Ok(builder.into_inner()?)
}

/// Archive for a `din` run: the bootstrap script, plus `su-exec` when present.
pub fn run_payload(su_exec: Option<&Path>) -> Result<Vec<u8>> {
    let mut entries = BTreeMap::new();
    entries.insert(
        BOOTSTRAP_ARCHIVE_PATH.to_string(),
        PayloadEntry::bytes(BOOTSTRAP_SCRIPT, 0o755),
    );
    if let Some(path) = su_exec {
        tracing::debug!(path = %path.display(), "Packing su-exec");
        entries.insert(SU_EXEC_ARCHIVE_PATH.to_string(), PayloadEntry::file(path, 0o755));
    }
    pack_files(&entries)
}
