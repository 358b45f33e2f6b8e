// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! Install-path resolution and the install/uninstall drivers.
//!
//! Install locations are named symbolically (`bin`, `lib`, `include`, …)
//! rather than as raw paths. Resolving one chases `install.<name>` entries
//! recursively — a name may point at another name rather than an absolute
//! path, each level contributing its own subdirs and policy overrides —
//! until an absolute path falls out, mirroring how a package is actually
//! laid out rather than wherever its build tree happens to sit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use fs_err as fs;
use thiserror::Error;

/// The well-known install-path components a target may be installed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Bin,
    Sbin,
    Lib,
    LibExec,
    Include,
    Share,
    Doc,
    Man,
    PkgConfig,
    Etc,
}

impl Component {
    /// The symbolic name this component resolves through by default, i.e.
    /// the key `Layout::new` seeds an entry under.
    fn key(&self) -> &'static str {
        match self {
            Component::Bin => "bin",
            Component::Sbin => "sbin",
            Component::Lib => "lib",
            Component::LibExec => "libexec",
            Component::Include => "include",
            Component::Share => "share",
            Component::Doc => "doc",
            Component::Man => "man",
            Component::PkgConfig => "pkgconfig",
            Component::Etc => "etc",
        }
    }
}

/// Unix file mode bits applied to an installed file or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode(pub u32);

impl Mode {
    pub const FILE_DEFAULT: Mode = Mode(0o644);
    pub const EXEC_DEFAULT: Mode = Mode(0o755);
    pub const DIR_DEFAULT: Mode = Mode(0o755);
}

/// A symbolic alias installed alongside a target (e.g. `libfoo.so ->
/// libfoo.so.1.2.3`), not itself subject to dependency tracking.
#[derive(Debug, Clone)]
pub struct Alias {
    pub link_name: String,
    pub target_name: String,
}

impl Alias {
    /// The install action that creates this alias inside `directory` (the
    /// resolved component directory the real target was installed into).
    pub fn into_action(self, directory: &Path) -> Action {
        Action::Symlink {
            destination: directory.join(self.link_name),
            link_target: PathBuf::from(self.target_name),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("install component `{0}` has no configured root")]
    UnconfiguredComponent(String),
    #[error("install component `{0}` resolves through a cycle")]
    CyclicComponent(String),
    #[error("install command `{command}` exited with {status}")]
    CommandFailed { command: String, status: std::process::ExitStatus },
}

/// Where one symbolic name's entry points: either the end of the chain (an
/// absolute path) or another symbolic name to chase further.
#[derive(Debug, Clone)]
pub enum ComponentTarget {
    Path(PathBuf),
    Name(String),
}

/// The per-level overrides `install.<name>` may carry. `None` means "inherit
/// from whichever level, further down the chain, sets it first" — the
/// level closest to the component being resolved wins, like scope variable
/// lookup.
#[derive(Debug, Clone, Default)]
pub struct ComponentPolicy {
    pub sudo: Option<bool>,
    pub command: Option<String>,
    pub mode: Option<Mode>,
    pub dir_mode: Option<Mode>,
    /// Subdirectories appended onto the path once the chain bottoms out at
    /// an absolute path, in the order their levels were visited.
    pub subdirs: Vec<String>,
}

#[derive(Debug, Clone)]
struct ComponentEntry {
    target: ComponentTarget,
    policy: ComponentPolicy,
}

/// A fully resolved component: an absolute path plus the policy that
/// governs how it gets created and installed into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedComponent {
    pub path: PathBuf,
    pub sudo: bool,
    pub command: String,
    pub mode: Mode,
    pub dir_mode: Mode,
}

const MAX_CHAIN_DEPTH: usize = 16;

/// Resolves symbolic install components to real paths, honoring any
/// per-component override on top of the configured root.
pub struct Layout {
    entries: HashMap<String, ComponentEntry>,
}

impl Layout {
    /// A layout with the conventional `install.<name>` chain seeded under
    /// `root`: most components resolve directly, but `doc`/`man` chase
    /// through `share` and `pkgconfig` chases through `lib`, each appending
    /// its own subdir, so overriding `share` or `lib` moves its dependents
    /// along with it.
    pub fn new(root: PathBuf) -> Self {
        let mut entries = HashMap::new();
        let mut direct = |name: &str, subpath: &str| {
            entries.insert(
                name.to_owned(),
                ComponentEntry {
                    target: ComponentTarget::Path(root.join(subpath)),
                    policy: ComponentPolicy::default(),
                },
            );
        };
        direct("bin", "bin");
        direct("sbin", "sbin");
        direct("lib", "lib");
        direct("libexec", "libexec");
        direct("include", "include");
        direct("share", "share");
        direct("etc", "etc");

        let mut chase = |name: &str, through: &str, subdir: &str| {
            entries.insert(
                name.to_owned(),
                ComponentEntry {
                    target: ComponentTarget::Name(through.to_owned()),
                    policy: ComponentPolicy {
                        subdirs: vec![subdir.to_owned()],
                        ..ComponentPolicy::default()
                    },
                },
            );
        };
        chase("doc", "share", "doc");
        chase("man", "share", "man");
        chase("pkgconfig", "lib", "pkgconfig");

        Self { entries }
    }

    /// Replace (or add) the `install.<name>` entry for a symbolic name,
    /// e.g. to point `lib` at `/usr/lib64` or have `pkgconfig` chase a
    /// different name.
    pub fn set(&mut self, name: impl Into<String>, target: ComponentTarget, policy: ComponentPolicy) {
        self.entries.insert(name.into(), ComponentEntry { target, policy });
    }

    /// Resolve `component`'s full `install.<name>` chain into an absolute
    /// path and effective policy. The nearest level to set a policy field
    /// wins; unset fields default to a plain, sudo-less `install` command
    /// at the usual file/dir modes.
    pub fn resolve(&self, component: Component) -> Result<ResolvedComponent, Error> {
        let mut name = component.key().to_owned();
        let mut visited = std::collections::HashSet::new();
        let mut subdirs = Vec::new();
        let mut sudo = None;
        let mut command = None;
        let mut mode = None;
        let mut dir_mode = None;

        let path = loop {
            if !visited.insert(name.clone()) {
                return Err(Error::CyclicComponent(name));
            }
            if visited.len() > MAX_CHAIN_DEPTH {
                return Err(Error::CyclicComponent(name));
            }

            let entry = self.entries.get(&name).ok_or_else(|| Error::UnconfiguredComponent(name.clone()))?;
            sudo = sudo.or(entry.policy.sudo);
            command = command.clone().or_else(|| entry.policy.command.clone());
            mode = mode.or(entry.policy.mode);
            dir_mode = dir_mode.or(entry.policy.dir_mode);
            subdirs.extend(entry.policy.subdirs.iter().cloned());

            match &entry.target {
                ComponentTarget::Path(path) => break path.clone(),
                ComponentTarget::Name(next) => name = next.clone(),
            }
        };

        let path = subdirs.into_iter().fold(path, |acc, subdir| acc.join(subdir));

        Ok(ResolvedComponent {
            path,
            sudo: sudo.unwrap_or(false),
            command: command.unwrap_or_else(|| "install".to_owned()),
            mode: mode.unwrap_or(Mode::FILE_DEFAULT),
            dir_mode: dir_mode.unwrap_or(Mode::DIR_DEFAULT),
        })
    }
}

/// Create every leading directory of `path` under `resolved`'s component
/// root, using the resolved install command under sudo, or directly when
/// no elevation is configured.
pub fn create_leading_directories(resolved: &ResolvedComponent, path: &Path) -> Result<(), Error> {
    if !resolved.sudo {
        fs::create_dir_all(path)?;
        return Ok(());
    }

    if path.exists() {
        return Ok(());
    }

    let mode = format!("{:o}", resolved.dir_mode.0);
    let status = Command::new("sudo")
        .arg(&resolved.command)
        .args(["-d", "-m", &mode])
        .arg(path)
        .status()?;

    if !status.success() {
        return Err(Error::CommandFailed {
            command: resolved.command.clone(),
            status,
        });
    }
    Ok(())
}

/// One planned install action: copy `source` to `destination` with `mode`,
/// or create `destination` as a symlink to `link_target`.
#[derive(Debug, Clone)]
pub enum Action {
    Copy { source: PathBuf, destination: PathBuf, mode: Mode },
    Symlink { destination: PathBuf, link_target: PathBuf },
}

impl Action {
    fn destination(&self) -> &Path {
        match self {
            Action::Copy { destination, .. } => destination,
            Action::Symlink { destination, .. } => destination,
        }
    }
}

/// Perform one install action under `resolved`'s policy, creating leading
/// directories first. Copying is not atomic across interruption (matching
/// common install tool behavior): a partially copied file is a
/// retry-on-next-build matter, not one this function guards against.
pub fn install(resolved: &ResolvedComponent, action: &Action) -> Result<(), Error> {
    if let Some(parent) = action.destination().parent() {
        create_leading_directories(resolved, parent)?;
    }

    match action {
        Action::Copy { source, destination, mode } => {
            fs::copy(source, destination)?;
            set_mode(destination, *mode)?;
        }
        Action::Symlink { destination, link_target } => {
            let _ = fs::remove_file(destination);
            symlink(link_target, destination)?;
        }
    }
    Ok(())
}

/// Reverse an install action: remove the destination, then remove any
/// leading directories left empty by its removal, walking from the
/// destination's parent back up toward `resolved`'s root.
pub fn uninstall(resolved: &ResolvedComponent, action: &Action) -> Result<(), Error> {
    let destination = action.destination();
    match fs::remove_file(destination) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    if let Some(parent) = destination.parent() {
        remove_empty_leading_dirs(parent, &resolved.path)?;
    }
    Ok(())
}

/// Remove `starting` and each ancestor up to (not including) `root`, in
/// that order, stopping at the first directory that is not empty.
fn remove_empty_leading_dirs(starting: &Path, root: &Path) -> Result<(), Error> {
    if !starting.starts_with(root) {
        return Ok(());
    }

    let mut current = Some(starting);
    while let Some(dir) = current.take() {
        if dir == root || !dir.exists() {
            break;
        }
        let is_empty = fs::read_dir(dir)?.next().is_none();
        if !is_empty {
            break;
        }
        fs::remove_dir(dir)?;
        current = dir.parent();
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Mode) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(mode.0);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Mode) -> Result<(), Error> {
    Ok(())
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::fs::copy(original, link).map(|_| ())
}
