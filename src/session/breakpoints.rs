//! Desired breakpoints and their adapter-confirmed status
//!
//! The registry is the source of truth for user intent. DAP replaces a
//! file's breakpoint set atomically, so any change to a file leads to a
//! full re-submission of that file's desired set. Verification fields are
//! only ever written from adapter responses and events.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};
use crate::dap::{Breakpoint, SetBreakpointsArguments, Source, SourceBreakpoint};

/// One desired breakpoint and what the adapter said about it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakpointEntry {
    pub source_path: PathBuf,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub desired: bool,
    /// False is a legitimate outcome, e.g. a line without code
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter_id: Option<i64>,
    /// Line the adapter actually bound to, when it moved the breakpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BreakpointEntry {
    fn new(source_path: PathBuf, line: u32, condition: Option<String>) -> Self {
        Self {
            source_path,
            line,
            condition,
            desired: true,
            verified: false,
            adapter_id: None,
            actual_line: None,
            message: None,
        }
    }

    fn clear_verification(&mut self) {
        self.verified = false;
        self.adapter_id = None;
        self.actual_line = None;
        self.message = None;
    }

    fn apply(&mut self, bp: &Breakpoint) {
        self.verified = bp.verified;
        self.adapter_id = bp.id;
        self.actual_line = bp.line.filter(|l| *l != self.line);
        self.message = bp.message.clone();
    }

    fn matches_line(&self, line: u32) -> bool {
        self.line == line || self.actual_line == Some(line)
    }
}

#[derive(Debug, Default)]
struct FileBreakpoints {
    /// Kept sorted by line
    entries: Vec<BreakpointEntry>,
    /// Bumped on every change to `entries`
    generation: u64,
}

/// A file's desired set captured for one `setBreakpoints` request
#[derive(Debug, Clone)]
pub struct Submission {
    pub path: PathBuf,
    pub generation: u64,
    pub breakpoints: Vec<SourceBreakpoint>,
}

impl Submission {
    pub fn arguments(&self) -> SetBreakpointsArguments {
        SetBreakpointsArguments {
            source: Source::from_path(&self.path),
            breakpoints: self.breakpoints.clone(),
            source_modified: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    files: BTreeMap<PathBuf, FileBreakpoints>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a desired breakpoint, or update the condition of an existing one
    ///
    /// Returns true when a new entry was created.
    pub fn upsert(&mut self, path: &Path, line: u32, condition: Option<String>) -> Result<bool> {
        if line == 0 {
            return Err(Error::InvalidLocation(format!(
                "{}:{} (lines start at 1)",
                path.display(),
                line
            )));
        }

        let file = self.files.entry(path.to_path_buf()).or_default();
        file.generation += 1;

        match file.entries.binary_search_by_key(&line, |e| e.line) {
            Ok(idx) => {
                file.entries[idx].condition = condition;
                Ok(false)
            }
            Err(idx) => {
                file.entries
                    .insert(idx, BreakpointEntry::new(path.to_path_buf(), line, condition));
                Ok(true)
            }
        }
    }

    /// Remove a desired breakpoint
    pub fn remove(&mut self, path: &Path, line: u32) -> Result<BreakpointEntry> {
        let not_found = || Error::BreakpointNotFound {
            path: path.display().to_string(),
            line,
        };

        let file = self.files.get_mut(path).ok_or_else(not_found)?;
        let idx = file
            .entries
            .binary_search_by_key(&line, |e| e.line)
            .map_err(|_| not_found())?;

        file.generation += 1;
        let mut entry = file.entries.remove(idx);
        entry.desired = false;
        Ok(entry)
    }

    /// Remove every breakpoint; returns the files that had any
    pub fn clear_all(&mut self) -> Vec<PathBuf> {
        let mut affected = Vec::new();
        for (path, file) in self.files.iter_mut() {
            if !file.entries.is_empty() {
                file.entries.clear();
                file.generation += 1;
                affected.push(path.clone());
            }
        }
        affected
    }

    pub fn contains(&self, path: &Path, line: u32) -> bool {
        self.files
            .get(path)
            .is_some_and(|f| f.entries.iter().any(|e| e.line == line))
    }

    /// Capture the current desired set of a file for submission
    pub fn begin_submission(&mut self, path: &Path) -> Submission {
        let file = self.files.entry(path.to_path_buf()).or_default();
        Submission {
            path: path.to_path_buf(),
            generation: file.generation,
            breakpoints: file
                .entries
                .iter()
                .map(|e| SourceBreakpoint {
                    line: e.line,
                    condition: e.condition.clone(),
                })
                .collect(),
        }
    }

    /// Merge the adapter's answer to a submission
    ///
    /// Results correspond to the submitted breakpoints by position. A
    /// submission overtaken by a later change to the same file is ignored;
    /// the newer submission carries the truth. Returns whether it applied.
    pub fn apply_verification(&mut self, submission: &Submission, results: &[Breakpoint]) -> bool {
        let Some(file) = self.files.get_mut(&submission.path) else {
            return false;
        };
        if file.generation != submission.generation {
            tracing::debug!(
                path = %submission.path.display(),
                "Ignoring stale breakpoint verification"
            );
            return false;
        }

        if results.len() != submission.breakpoints.len() {
            tracing::warn!(
                path = %submission.path.display(),
                submitted = submission.breakpoints.len(),
                returned = results.len(),
                "Adapter returned a different number of breakpoints"
            );
        }

        for (requested, result) in submission.breakpoints.iter().zip(results) {
            if let Some(entry) = file.entries.iter_mut().find(|e| e.line == requested.line) {
                entry.apply(result);
            }
        }
        true
    }

    /// Merge a `breakpoint` event; returns whether an entry matched
    pub fn apply_event(&mut self, reason: &str, bp: &Breakpoint) -> bool {
        let known_id = bp.id.is_some_and(|id| {
            self.files
                .values()
                .any(|f| f.entries.iter().any(|e| e.adapter_id == Some(id)))
        });
        let entry = if known_id {
            self.find_by_adapter_id(bp.id)
        } else {
            self.find_by_location(bp)
        };
        let Some(entry) = entry else {
            tracing::debug!(reason, id = ?bp.id, "Breakpoint event for unknown breakpoint");
            return false;
        };

        if reason == "removed" {
            entry.clear_verification();
        } else {
            entry.apply(bp);
        }
        true
    }

    fn find_by_adapter_id(&mut self, id: Option<i64>) -> Option<&mut BreakpointEntry> {
        let id = id?;
        self.files
            .values_mut()
            .flat_map(|f| f.entries.iter_mut())
            .find(|e| e.adapter_id == Some(id))
    }

    fn find_by_location(&mut self, bp: &Breakpoint) -> Option<&mut BreakpointEntry> {
        let path = bp.source.as_ref()?.path.as_ref()?;
        let line = bp.line?;
        self.files
            .get_mut(Path::new(path))?
            .entries
            .iter_mut()
            .find(|e| e.matches_line(line))
    }

    /// All entries ordered by file and line
    pub fn list(&self) -> Vec<BreakpointEntry> {
        self.files
            .values()
            .flat_map(|f| f.entries.iter().cloned())
            .collect()
    }

    /// Files that currently have desired breakpoints
    pub fn files(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|(_, f)| !f.entries.is_empty())
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Forget adapter-side status, keeping intent
    pub fn reset_verification(&mut self) {
        for file in self.files.values_mut() {
            for entry in &mut file.entries {
                entry.clear_verification();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.files.values().map(|f| f.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verified(id: i64, line: u32) -> Breakpoint {
        Breakpoint {
            id: Some(id),
            verified: true,
            message: None,
            source: None,
            line: Some(line),
        }
    }

    fn rejected(message: &str) -> Breakpoint {
        Breakpoint {
            id: None,
            verified: false,
            message: Some(message.to_string()),
            source: None,
            line: None,
        }
    }

    #[test]
    fn test_upsert_is_idempotent_and_updates_condition() {
        let mut reg = BreakpointRegistry::new();
        let path = Path::new("/src/demo.py");
        assert!(reg.upsert(path, 5, None).unwrap());
        assert!(!reg.upsert(path, 5, Some("a > 1".into())).unwrap());

        let list = reg.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].condition.as_deref(), Some("a > 1"));
        assert!(list[0].desired);
        assert!(!list[0].verified);
    }

    #[test]
    fn test_line_zero_is_invalid() {
        let mut reg = BreakpointRegistry::new();
        assert!(matches!(
            reg.upsert(Path::new("/src/demo.py"), 0, None),
            Err(Error::InvalidLocation(_))
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_submission_is_full_file_set_in_line_order() {
        let mut reg = BreakpointRegistry::new();
        let path = Path::new("/src/demo.py");
        reg.upsert(path, 9, None).unwrap();
        reg.upsert(path, 2, Some("x".into())).unwrap();
        reg.upsert(Path::new("/src/other.py"), 1, None).unwrap();

        let sub = reg.begin_submission(path);
        let lines: Vec<u32> = sub.breakpoints.iter().map(|b| b.line).collect();
        assert_eq!(lines, vec![2, 9]);
        assert_eq!(sub.breakpoints[0].condition.as_deref(), Some("x"));
        assert_eq!(sub.arguments().source.path.as_deref(), Some("/src/demo.py"));
    }

    #[test]
    fn test_partial_verification_is_per_entry() {
        let mut reg = BreakpointRegistry::new();
        let path = Path::new("/src/demo.py");
        reg.upsert(path, 3, None).unwrap();
        reg.upsert(path, 5, None).unwrap();

        let sub = reg.begin_submission(path);
        assert!(reg.apply_verification(&sub, &[rejected("no code on line 3"), verified(1, 5)]));

        let list = reg.list();
        assert!(!list[0].verified);
        assert_eq!(list[0].message.as_deref(), Some("no code on line 3"));
        assert!(list[1].verified);
        assert_eq!(list[1].adapter_id, Some(1));
        assert_eq!(list[1].actual_line, None);
    }

    #[test]
    fn test_stale_submission_is_ignored() {
        let mut reg = BreakpointRegistry::new();
        let path = Path::new("/src/demo.py");
        reg.upsert(path, 5, None).unwrap();
        let old = reg.begin_submission(path);
        reg.upsert(path, 6, None).unwrap();

        assert!(!reg.apply_verification(&old, &[verified(1, 5)]));
        assert!(reg.list().iter().all(|e| !e.verified));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut reg = BreakpointRegistry::new();
        let path = Path::new("/src/demo.py");
        reg.upsert(path, 5, None).unwrap();
        reg.upsert(Path::new("/src/b.py"), 1, None).unwrap();

        assert!(matches!(
            reg.remove(path, 6),
            Err(Error::BreakpointNotFound { line: 6, .. })
        ));
        let removed = reg.remove(path, 5).unwrap();
        assert!(!removed.desired);
        assert!(!reg.contains(path, 5));

        // the emptied file still submits, as an empty set
        assert!(reg.begin_submission(path).breakpoints.is_empty());
        assert_eq!(reg.files(), vec![PathBuf::from("/src/b.py")]);

        assert_eq!(reg.clear_all(), vec![PathBuf::from("/src/b.py")]);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_breakpoint_events() {
        let mut reg = BreakpointRegistry::new();
        let path = Path::new("/src/demo.py");
        reg.upsert(path, 5, None).unwrap();
        reg.upsert(path, 7, None).unwrap();
        let sub = reg.begin_submission(path);
        reg.apply_verification(&sub, &[rejected("pending"), rejected("pending")]);

        // matched by location, then moved by the adapter
        let mut bp = verified(4, 8);
        bp.source = Some(Source::from_path(path));
        bp.line = Some(7);
        assert!(reg.apply_event("changed", &bp));
        bp.line = Some(8);
        assert!(reg.apply_event("changed", &bp));
        let entry = reg.list().into_iter().find(|e| e.line == 7).unwrap();
        assert!(entry.verified);
        assert_eq!(entry.actual_line, Some(8));

        // matched by id
        assert!(reg.apply_event("removed", &verified(4, 8)));
        assert!(!reg.list().iter().any(|e| e.verified));

        assert!(!reg.apply_event("changed", &verified(99, 1)));
    }
}
