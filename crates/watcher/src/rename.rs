//! Rename pairing
//!
//! The OS reports a rename as two records, one carrying the old name and one
//! the new, usually adjacent and in either order. [`RenameMatcher`] folds each
//! pair into a single [`Change::Renamed`] and turns halves that never find a
//! partner into plain removals or additions.

use crate::decoder::{DecodeError, DecodedRecord, RecordAction};
use std::collections::VecDeque;
use std::iter::FusedIterator;
use tracing::trace;

/// A change ready to be classified and reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(String),
    Removed(String),
    Touched(String),
    Renamed { old: String, new: String },
    Unknown(String),
}

impl Change {
    /// Name the change should be classified by (the new name for renames)
    pub fn name(&self) -> &str {
        match self {
            Change::Added(name)
            | Change::Removed(name)
            | Change::Touched(name)
            | Change::Unknown(name) => name,
            Change::Renamed { new, .. } => new,
        }
    }
}

/// Iterator adapter pairing rename halves within one decoded buffer
///
/// At most one old and one new name are held at a time. A second half of the
/// same kind arriving while its slot is occupied flushes the occupant as an
/// orphan first, so a name is never silently replaced. Decode errors pass
/// through untouched.
pub struct RenameMatcher<I> {
    records: I,
    pending_old: Option<String>,
    pending_new: Option<String>,

    /// Changes produced but not yet yielded (at most two)
    ready: VecDeque<Result<Change, DecodeError>>,

    /// Input is exhausted and orphans have been flushed
    finished: bool,
}

impl<I> RenameMatcher<I>
where
    I: Iterator<Item = Result<DecodedRecord, DecodeError>>,
{
    pub fn new(records: I) -> Self {
        Self {
            records,
            pending_old: None,
            pending_new: None,
            ready: VecDeque::with_capacity(2),
            finished: false,
        }
    }

    /// Feed one record; queues whatever it completes
    fn accept(&mut self, record: DecodedRecord) {
        match record.action {
            RecordAction::Added => self.push(Change::Added(record.name)),
            RecordAction::Removed => self.push(Change::Removed(record.name)),
            RecordAction::Modified => self.push(Change::Touched(record.name)),
            RecordAction::Unknown(code) => {
                trace!("Unknown action code {} for {}", code, record.name);
                self.push(Change::Unknown(record.name));
            }
            RecordAction::RenamedOld => {
                if let Some(stale) = self.pending_old.take() {
                    self.push(Change::Removed(stale));
                }
                match self.pending_new.take() {
                    Some(new) => self.push(Change::Renamed { old: record.name, new }),
                    None => self.pending_old = Some(record.name),
                }
            }
            RecordAction::RenamedNew => {
                if let Some(stale) = self.pending_new.take() {
                    self.push(Change::Added(stale));
                }
                match self.pending_old.take() {
                    Some(old) => self.push(Change::Renamed { old, new: record.name }),
                    None => self.pending_new = Some(record.name),
                }
            }
        }
    }

    fn push(&mut self, change: Change) {
        self.ready.push_back(Ok(change));
    }

    /// Orphaned halves at end of chain: old first, then new
    fn flush(&mut self) {
        if let Some(old) = self.pending_old.take() {
            trace!("Orphan rename half (old name) {}", old);
            self.push(Change::Removed(old));
        }
        if let Some(new) = self.pending_new.take() {
            trace!("Orphan rename half (new name) {}", new);
            self.push(Change::Added(new));
        }
    }
}

impl<I> Iterator for RenameMatcher<I>
where
    I: Iterator<Item = Result<DecodedRecord, DecodeError>>,
{
    type Item = Result<Change, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(change) = self.ready.pop_front() {
                return Some(change);
            }
            if self.finished {
                return None;
            }

            match self.records.next() {
                Some(Ok(record)) => self.accept(record),
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.finished = true;
                    self.flush();
                }
            }
        }
    }
}

impl<I> FusedIterator for RenameMatcher<I> where I: Iterator<Item = Result<DecodedRecord, DecodeError>> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(action: RecordAction, name: &str) -> Result<DecodedRecord, DecodeError> {
        Ok(DecodedRecord {
            action,
            name: name.to_string(),
            next_offset: 0,
        })
    }

    fn run(records: Vec<Result<DecodedRecord, DecodeError>>) -> Vec<Result<Change, DecodeError>> {
        RenameMatcher::new(records.into_iter()).collect()
    }

    fn renamed(old: &str, new: &str) -> Result<Change, DecodeError> {
        Ok(Change::Renamed {
            old: old.to_string(),
            new: new.to_string(),
        })
    }

    #[test]
    fn test_plain_actions_pass_through_in_order() {
        let changes = run(vec![
            record(RecordAction::Added, "a"),
            record(RecordAction::Modified, "a"),
            record(RecordAction::Removed, "a"),
            record(RecordAction::Unknown(42), "b"),
        ]);

        assert_eq!(
            changes,
            vec![
                Ok(Change::Added("a".into())),
                Ok(Change::Touched("a".into())),
                Ok(Change::Removed("a".into())),
                Ok(Change::Unknown("b".into())),
            ]
        );
    }

    #[test]
    fn test_rename_old_then_new() {
        let changes = run(vec![
            record(RecordAction::RenamedOld, "a"),
            record(RecordAction::RenamedNew, "b"),
        ]);
        assert_eq!(changes, vec![renamed("a", "b")]);
    }

    #[test]
    fn test_rename_new_then_old() {
        let changes = run(vec![
            record(RecordAction::RenamedNew, "b"),
            record(RecordAction::RenamedOld, "a"),
        ]);
        assert_eq!(changes, vec![renamed("a", "b")]);
    }

    #[test]
    fn test_rename_emitted_at_second_half() {
        let changes = run(vec![
            record(RecordAction::RenamedOld, "a"),
            record(RecordAction::Modified, "c"),
            record(RecordAction::RenamedNew, "b"),
        ]);
        assert_eq!(changes, vec![Ok(Change::Touched("c".into())), renamed("a", "b")]);
    }

    #[test]
    fn test_orphan_old_becomes_removed() {
        let changes = run(vec![record(RecordAction::RenamedOld, "a")]);
        assert_eq!(changes, vec![Ok(Change::Removed("a".into()))]);
    }

    #[test]
    fn test_orphan_new_becomes_added() {
        let changes = run(vec![record(RecordAction::RenamedNew, "b")]);
        assert_eq!(changes, vec![Ok(Change::Added("b".into()))]);
    }

    #[test]
    fn test_second_old_half_flushes_first() {
        let changes = run(vec![
            record(RecordAction::RenamedOld, "a"),
            record(RecordAction::RenamedOld, "c"),
            record(RecordAction::RenamedNew, "d"),
        ]);
        assert_eq!(changes, vec![Ok(Change::Removed("a".into())), renamed("c", "d")]);
    }

    #[test]
    fn test_second_new_half_flushes_first() {
        let changes = run(vec![
            record(RecordAction::RenamedNew, "b"),
            record(RecordAction::RenamedNew, "d"),
        ]);
        assert_eq!(
            changes,
            vec![Ok(Change::Added("b".into())), Ok(Change::Added("d".into()))]
        );
    }

    #[test]
    fn test_consecutive_renames() {
        let changes = run(vec![
            record(RecordAction::RenamedOld, "a"),
            record(RecordAction::RenamedNew, "b"),
            record(RecordAction::RenamedOld, "b"),
            record(RecordAction::RenamedNew, "c"),
        ]);
        assert_eq!(changes, vec![renamed("a", "b"), renamed("b", "c")]);
    }

    #[test]
    fn test_decode_errors_pass_through() {
        let changes = run(vec![
            record(RecordAction::RenamedOld, "a"),
            Err(DecodeError::OddNameLength { offset: 16, name_len: 3 }),
            record(RecordAction::RenamedNew, "b"),
        ]);
        assert_eq!(
            changes,
            vec![
                Err(DecodeError::OddNameLength { offset: 16, name_len: 3 }),
                renamed("a", "b"),
            ]
        );
    }

    #[test]
    fn test_change_name_uses_new_name() {
        let change = Change::Renamed { old: "a".into(), new: "b".into() };
        assert_eq!(change.name(), "b");
    }
}
