// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! Source distribution: staging a project's distributed files into a
//! temporary tree (after an internal update pass) and archiving it.

use std::path::{Path, PathBuf};

use fs_err as fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("dist staging root `{0}` already exists and is not empty")]
    StagingRootOccupied(PathBuf),
}

/// One file to be copied into the staging tree, relative to both the
/// project root and the staging root.
#[derive(Debug, Clone)]
pub struct Entry {
    pub source: PathBuf,
    pub relative_destination: PathBuf,
}

/// Stages `entries` under `staging_root`, which must not already exist.
/// Callers are expected to have already performed whatever `update` pass is
/// needed so the files being staged are current; this function only moves
/// bytes.
pub fn stage(staging_root: &Path, entries: &[Entry]) -> Result<(), Error> {
    if staging_root.exists() {
        let occupied = fs::read_dir(staging_root)?.next().is_some();
        if occupied {
            return Err(Error::StagingRootOccupied(staging_root.to_owned()));
        }
    }
    fs::create_dir_all(staging_root)?;

    for entry in entries {
        let destination = staging_root.join(&entry.relative_destination);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&entry.source, &destination)?;
    }

    Ok(())
}

/// Archive format for the staged tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Zip => "zip",
        }
    }
}

/// Where the archiving step would write its output, given a staged tree and
/// a package name/version. Archive construction itself is delegated to
/// whatever packaging tool a deployment wires in; this just names the
/// output so dist and the caller agree on it.
pub fn archive_path(staging_root: &Path, package: &str, version: &str, format: ArchiveFormat) -> PathBuf {
    staging_root
        .parent()
        .unwrap_or(staging_root)
        .join(format!("{package}-{version}.{}", format.extension()))
}
