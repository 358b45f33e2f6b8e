// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! Dependency extraction: parsing compiler-style make-rule dependency
//! output, resolving generated-header paths through a prefix map, and the
//! restart loop that updates a newly discovered prerequisite before
//! re-parsing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("malformed make-rule dependency output at byte {offset}")]
    Malformed { offset: usize },
    #[error("extraction restarted more than {limit} times for the same target")]
    RestartLimitExceeded { limit: u32 },
}

/// Parse `-M -MG`-style make-rule output (`target: dep1 dep2 \` with
/// backslash line continuations and backslash-escaped spaces) into the flat
/// list of prerequisite paths. The leading `target:` is discarded; only the
/// text after the first unescaped colon is considered.
pub fn parse_make_rule(output: &str) -> Result<Vec<String>, Error> {
    let joined = output.replace("\\\r\n", " ").replace("\\\n", " ");

    let colon = joined.find(':').ok_or(Error::Malformed { offset: 0 })?;
    let rest = &joined[colon + 1..];

    let mut deps = Vec::new();
    let mut current = String::new();
    let mut chars = rest.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&' ') => {
                current.push(' ');
                chars.next();
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    deps.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        deps.push(current);
    }

    Ok(deps)
}

/// Rewrites a generated-file path from one directory prefix to another —
/// used when a recipe reports a dependency under a build-tree path that
/// must be resolved back to (or forward to) the in-tree target it
/// corresponds to.
#[derive(Debug, Clone, Default)]
pub struct PrefixMap {
    mappings: Vec<(PathBuf, PathBuf)>,
}

impl PrefixMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, from: PathBuf, to: PathBuf) {
        self.mappings.push((from, to));
    }

    /// Apply the longest matching prefix rewrite, or return `path`
    /// unchanged if none apply.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.mappings
            .iter()
            .filter(|(from, _)| path.starts_with(from))
            .max_by_key(|(from, _)| from.components().count())
            .map(|(from, to)| to.join(path.strip_prefix(from).expect("starts_with checked above")))
            .unwrap_or_else(|| path.to_owned())
    }
}

/// What one round of extraction produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// All dependencies were already up to date; extraction is complete.
    Complete(Vec<PathBuf>),
    /// `dependency` was out of date and has now been scheduled to be
    /// brought up to date; the caller must wait for it and restart
    /// extraction once it has. `headers_seen` is the number of leading
    /// dependencies already confirmed identical to the previous pass —
    /// the skip count the next round should pass back into its own parse
    /// so it does not redo work already done.
    Restart { dependency: PathBuf, headers_seen: usize },
}

/// Drive the extract/restart loop: call `round` (given the skip count from
/// the previous pass) to parse one attempt's output into dependencies and
/// classify whether any of them need to be built first, and
/// `bring_up_to_date` to do so, until extraction completes or
/// `max_restarts` is exceeded.
pub fn extract_with_restart<E>(
    max_restarts: u32,
    mut round: impl FnMut(usize) -> Result<Outcome, E>,
    mut bring_up_to_date: impl FnMut(&Path) -> Result<(), E>,
) -> Result<Vec<PathBuf>, E>
where
    E: From<Error>,
{
    let mut skip_count = 0;
    for _ in 0..=max_restarts {
        match round(skip_count)? {
            Outcome::Complete(deps) => return Ok(deps),
            Outcome::Restart { dependency, headers_seen } => {
                skip_count = headers_seen;
                bring_up_to_date(&dependency)?;
            }
        }
    }
    Err(Error::RestartLimitExceeded { limit: max_restarts }.into())
}

/// An extension-to-target-type assignment table, consulted when a header
/// discovered mid-extraction needs a target type (so it can be interned and
/// matched/applied/executed like any other target) rather than treated as a
/// bare path. Falls back to a default type for any extension it has no
/// specific entry for.
#[derive(Debug, Clone)]
pub struct ExtensionMap {
    by_extension: HashMap<String, String>,
    default_type: String,
}

impl ExtensionMap {
    pub fn new(default_type: impl Into<String>) -> Self {
        Self {
            by_extension: HashMap::new(),
            default_type: default_type.into(),
        }
    }

    pub fn register(&mut self, extension: impl Into<String>, target_type: impl Into<String>) {
        self.by_extension.insert(extension.into(), target_type.into());
    }

    /// The target-type name a header at `path` should be interned as.
    pub fn target_type_for(&self, path: &Path) -> &str {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.by_extension.get(ext))
            .map(String::as_str)
            .unwrap_or(&self.default_type)
    }
}

/// Resolve a relative, not-yet-existing header path against the include
/// directories collected from a target and its library prerequisites: of
/// the include directories that live under `out_root`, the one whose
/// path relative to `out_root` is the longest prefix of `header` wins, and
/// the header is rejoined onto that directory's absolute path. Returns
/// `None` if no include directory is a prefix of `header` at all.
pub fn resolve_generated_header(include_dirs: &[PathBuf], out_root: &Path, header: &Path) -> Option<PathBuf> {
    include_dirs
        .iter()
        .filter_map(|dir| {
            let relative = dir.strip_prefix(out_root).ok()?;
            let remainder = header.strip_prefix(relative).ok()?;
            Some((relative.components().count(), dir, remainder))
        })
        .max_by_key(|(depth, _, _)| *depth)
        .map(|(_, dir, remainder)| dir.join(remainder))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_make_rule() {
        let output = "hello.o: hello.cpp hello.hpp common.hpp\n";
        let deps = parse_make_rule(output).unwrap();
        assert_eq!(deps, vec!["hello.cpp", "hello.hpp", "common.hpp"]);
    }

    #[test]
    fn parses_line_continuations_and_escaped_spaces() {
        let output = "hello.o: hello.cpp \\\n  my\\ header.hpp \\\n  common.hpp\n";
        let deps = parse_make_rule(output).unwrap();
        assert_eq!(deps, vec!["hello.cpp", "my header.hpp", "common.hpp"]);
    }

    #[test]
    fn prefix_map_picks_longest_match() {
        let mut map = PrefixMap::new();
        map.add(PathBuf::from("/build"), PathBuf::from("/src"));
        map.add(PathBuf::from("/build/gen"), PathBuf::from("/src/generated"));

        assert_eq!(
            map.resolve(&PathBuf::from("/build/gen/header.hpp")),
            PathBuf::from("/src/generated/header.hpp")
        );
        assert_eq!(map.resolve(&PathBuf::from("/build/plain.hpp")), PathBuf::from("/src/plain.hpp"));
        assert_eq!(map.resolve(&PathBuf::from("/other/file.hpp")), PathBuf::from("/other/file.hpp"));
    }

    #[test]
    fn restart_loop_retries_until_complete() {
        let mut attempts = 0;
        let mut brought_up_to_date = Vec::new();
        let mut skip_counts_seen = Vec::new();

        let result: Result<Vec<PathBuf>, Error> = extract_with_restart(
            3,
            |skip_count| {
                attempts += 1;
                skip_counts_seen.push(skip_count);
                if attempts < 3 {
                    Ok(Outcome::Restart {
                        dependency: PathBuf::from(format!("gen{attempts}.hpp")),
                        headers_seen: attempts,
                    })
                } else {
                    Ok(Outcome::Complete(vec![PathBuf::from("hello.cpp")]))
                }
            },
            |dep| {
                brought_up_to_date.push(dep.to_owned());
                Ok(())
            },
        );
        let result = result.unwrap();

        assert_eq!(result, vec![PathBuf::from("hello.cpp")]);
        assert_eq!(brought_up_to_date.len(), 2);
        assert_eq!(skip_counts_seen, vec![0, 1, 2], "each round skips what the previous one already confirmed");
    }

    #[test]
    fn restart_loop_gives_up_past_the_limit() {
        let result: Result<Vec<PathBuf>, Error> = extract_with_restart(
            1,
            |_skip_count| {
                Ok(Outcome::Restart {
                    dependency: PathBuf::from("gen.hpp"),
                    headers_seen: 0,
                })
            },
            |_| Ok(()),
        );
        assert_eq!(result, Err(Error::RestartLimitExceeded { limit: 1 }));
    }

    #[test]
    fn extension_map_falls_back_to_default_type() {
        let mut map = ExtensionMap::new("header");
        map.register("hxx", "cxx-header");

        assert_eq!(map.target_type_for(Path::new("foo/gen.hxx")), "cxx-header");
        assert_eq!(map.target_type_for(Path::new("foo/gen.h")), "header");
    }

    #[test]
    fn resolve_generated_header_picks_the_longest_include_dir() {
        let include_dirs = vec![PathBuf::from("/proj/out"), PathBuf::from("/proj/out/foo")];
        let out_root = PathBuf::from("/proj/out");

        let resolved = resolve_generated_header(&include_dirs, &out_root, Path::new("foo/gen.hxx")).unwrap();
        assert_eq!(resolved, PathBuf::from("/proj/out/foo/gen.hxx"));
    }

    #[test]
    fn resolve_generated_header_is_none_when_no_include_dir_matches() {
        let include_dirs = vec![PathBuf::from("/proj/out/bar")];
        let out_root = PathBuf::from("/proj/out");

        assert!(resolve_generated_header(&include_dirs, &out_root, Path::new("foo/gen.hxx")).is_none());
    }
}
