// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! Prerequisites: declared dependency edges from one target to another, and
//! their resolution into concrete [`TargetHandle`]s.

use std::path::PathBuf;

use crate::scope::ScopeHandle;
use crate::target::{Extension, TargetHandle, TargetSet, TargetTypeHandle};

/// Whether a prerequisite participates in ordinary dependency extraction
/// and propagation, or is attached ad hoc and excluded from both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Include {
    /// Included normally: contributes to change detection and is iterated
    /// by recipes that walk "real" prerequisites.
    Normal,
    /// Excluded from execution but still searched and matched — used for
    /// build-time-only references that should not trigger a rebuild.
    Adhoc,
    /// Entirely excluded, as if the prerequisite were not declared at all
    /// for the current operation (a conditional dependency that evaluated
    /// false).
    Excluded,
}

/// An unresolved prerequisite: enough information to search for (and
/// intern) the target it refers to, attached at load time before the named
/// target necessarily exists.
#[derive(Debug, Clone)]
pub struct PrerequisiteKey {
    pub target_type: TargetTypeHandle,
    pub out_dir: Option<PathBuf>,
    pub src_dir: Option<PathBuf>,
    pub name: String,
    pub extension: Extension,
    pub include: Include,
}

/// A resolved prerequisite: the key plus the scope it was declared in
/// (needed to resolve relative paths and run `search` with the right
/// variable context) and, once resolution has run, the target it names.
pub struct Prerequisite {
    pub key: PrerequisiteKey,
    pub declared_in: ScopeHandle,
    resolved: std::sync::OnceLock<TargetHandle>,
}

pub type PrerequisiteHandle = triomphe::Arc<Prerequisite>;

impl Prerequisite {
    pub fn new(key: PrerequisiteKey, declared_in: ScopeHandle) -> PrerequisiteHandle {
        triomphe::Arc::new(Self {
            key,
            declared_in,
            resolved: std::sync::OnceLock::new(),
        })
    }

    pub fn target(&self) -> Option<&TargetHandle> {
        self.resolved.get()
    }

    /// Resolve this prerequisite against a target set, interning the named
    /// target if it has not been seen before. Idempotent: calling it again
    /// after the first successful resolution returns the same handle
    /// without touching `targets`.
    pub fn search(&self, targets: &TargetSet) -> Result<TargetHandle, crate::target::Error> {
        if let Some(existing) = self.resolved.get() {
            return Ok(existing.clone());
        }

        let out_dir = self
            .key
            .out_dir
            .clone()
            .unwrap_or_else(|| self.declared_in.path().to_owned());

        let handle = targets.intern(
            self.key.target_type.clone(),
            out_dir,
            self.key.src_dir.clone(),
            self.key.name.clone(),
            self.key.extension.clone(),
        )?;

        // Another thread may have raced us to resolve the same
        // prerequisite; OnceLock::set simply loses that race gracefully.
        let _ = self.resolved.set(handle.clone());
        Ok(handle)
    }
}

/// Iterates a target's prerequisites for one action, transparently
/// expanding any prerequisite that is itself a group into its members (the
/// "prerequisite member" view), while exposing [`Include::Excluded`]
/// prerequisites to callers that specifically want the full declared list
/// (e.g. diagnostics).
pub struct MemberIter<'a> {
    prerequisites: std::slice::Iter<'a, PrerequisiteHandle>,
    pending_group: std::vec::IntoIter<TargetHandle>,
    skip_excluded: bool,
}

impl<'a> MemberIter<'a> {
    pub fn new(prerequisites: &'a [PrerequisiteHandle], skip_excluded: bool) -> Self {
        Self {
            prerequisites: prerequisites.iter(),
            pending_group: Vec::new().into_iter(),
            skip_excluded,
        }
    }
}

impl<'a> Iterator for MemberIter<'a> {
    type Item = TargetHandle;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(member) = self.pending_group.next() {
                return Some(member);
            }

            let prereq = self.prerequisites.next()?;
            if self.skip_excluded && matches!(prereq.key.include, Include::Excluded) {
                continue;
            }

            let Some(target) = prereq.target() else { continue };

            let members = target.adhoc_members.lock().unwrap_or_else(|e| e.into_inner());
            if members.is_empty() {
                return Some(target.clone());
            }
            self.pending_group = members.clone().into_iter();
        }
    }
}
