// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! The depdb sidecar file: a per-target record of the rule that produced it
//! and the fingerprints (paths, checksums, or similar) it depended on last
//! time, used to decide whether extraction needs to re-run a compiler.

use std::path::{Path, PathBuf};

use fs_err as fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("depdb `{path}` is corrupt at line {line}")]
    Corrupt { path: PathBuf, line: usize },
}

/// One depdb record: the identity of the rule that wrote it (so that
/// changing the rule itself invalidates the cache) and the ordered list of
/// fingerprint lines that followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub rule_id: String,
    pub lines: Vec<String>,
}

/// A single depdb sidecar file, stored alongside the target it describes.
pub struct Depdb {
    path: PathBuf,
}

impl Depdb {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored record, or `None` if the sidecar does not exist yet
    /// (first build of this target).
    pub fn read(&self) -> Result<Option<Record>, Error> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut lines = contents.lines();
        let rule_id = lines.next().ok_or_else(|| Error::Corrupt { path: self.path.clone(), line: 0 })?;

        Ok(Some(Record {
            rule_id: rule_id.to_owned(),
            lines: lines.map(str::to_owned).collect(),
        }))
    }

    /// Write `record`, replacing whatever was there.
    pub fn write(&self, record: &Record) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut contents = String::new();
        contents.push_str(&record.rule_id);
        contents.push('\n');
        for line in &record.lines {
            contents.push_str(line);
            contents.push('\n');
        }

        let tmp = self.path.with_extension("depdb.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Whether `candidate` is identical to the stored record (same rule and
    /// the same fingerprints, in the same order).
    pub fn matches(&self, candidate: &Record) -> Result<bool, Error> {
        Ok(self.read()?.as_ref() == Some(candidate))
    }
}
