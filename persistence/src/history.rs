//! Bounded, branch-truncating history of recorded snapshots
//!
//! The history is a sequence of immutable records addressed by id, plus a
//! cursor pointing at the record the live state corresponds to. Recording
//! while the cursor is behind the tail drops the redo branch first, then the
//! sequence is trimmed from the front to stay within `depth`.

use crate::codec::read_json;
use crate::codec::write_json;
use crate::error::Result;
use crate::error::SessionError;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use tracing::warn;

/// Maximum number of records kept unless configured otherwise
pub const DEFAULT_DEPTH: usize = 53;

/// One recorded state: snapshot id and a human readable label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct HistoryRecord {
    pub id: String,
    pub label: String,
}

impl HistoryRecord {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

impl From<(String, String)> for HistoryRecord {
    fn from((id, label): (String, String)) -> Self {
        Self { id, label }
    }
}

impl From<HistoryRecord> for (String, String) {
    fn from(record: HistoryRecord) -> Self {
        (record.id, record.label)
    }
}

/// Persisted as `{"depth": .., "current": .., "records": [[id, label], ..]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    depth: usize,
    #[serde(with = "cursor")]
    current: Option<usize>,
    records: Vec<HistoryRecord>,
}

impl History {
    pub fn new(depth: usize) -> Result<Self> {
        if depth == 0 {
            return Err(SessionError::InvalidDepth(depth));
        }
        Ok(Self {
            depth,
            current: None,
            records: Vec::new(),
        })
    }

    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Index of the record matching the live state, `None` before the first record
    pub const fn current(&self) -> Option<usize> {
        self.current
    }

    /// Cursor with `-1` meaning nothing has been recorded
    pub fn cursor(&self) -> i64 {
        self.current.map_or(-1, |index| index as i64)
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&HistoryRecord> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.records.iter().any(|record| record.id == id)
    }

    /// Target index of an undo, if one is possible
    pub fn previous(&self) -> Option<usize> {
        self.current.and_then(|index| index.checked_sub(1))
    }

    /// Target index of a redo, if one is possible
    pub fn next(&self) -> Option<usize> {
        let next = self.current.map_or(0, |index| index + 1);
        (self.current.is_some() && next < self.records.len()).then_some(next)
    }

    /// Move the cursor; out-of-range indices are ignored
    pub fn set_current(&mut self, index: usize) -> bool {
        if index < self.records.len() {
            self.current = Some(index);
            true
        } else {
            false
        }
    }

    /// Remove every record from `index` on and return them, oldest first
    pub fn truncate_from(&mut self, index: usize) -> Vec<HistoryRecord> {
        if index >= self.records.len() {
            return Vec::new();
        }
        let removed = self.records.split_off(index);
        self.current = self.current.filter(|current| *current < index);
        if self.current.is_none() && !self.records.is_empty() {
            self.current = Some(self.records.len() - 1);
        }
        removed
    }

    /// Append `record` as the new tail, dropping the redo branch and any
    /// records beyond `depth`. Returns every record that was discarded.
    pub fn record(&mut self, record: HistoryRecord) -> Vec<HistoryRecord> {
        let branch_start = self.current.map_or(0, |index| index + 1);
        let mut discarded = self.truncate_from(branch_start);

        self.records.push(record);
        discarded.extend(self.trim_to_depth());
        self.current = Some(self.records.len() - 1);
        discarded
    }

    /// Change the depth, evicting the oldest records if the history is now too long
    pub fn set_depth(&mut self, depth: usize) -> Result<Vec<HistoryRecord>> {
        if depth == 0 {
            return Err(SessionError::InvalidDepth(depth));
        }
        self.depth = depth;
        Ok(self.trim_to_depth())
    }

    /// Drop everything and restore the default depth
    pub fn clear(&mut self) -> Vec<HistoryRecord> {
        self.current = None;
        self.depth = DEFAULT_DEPTH;
        std::mem::take(&mut self.records)
    }

    fn trim_to_depth(&mut self) -> Vec<HistoryRecord> {
        let excess = self.records.len().saturating_sub(self.depth);
        if excess == 0 {
            return Vec::new();
        }
        let evicted: Vec<_> = self.records.drain(..excess).collect();
        self.current = self.current.map(|index| index.saturating_sub(excess));
        evicted
    }

    /// Generate a timestamp-derived id not used by any record yet
    pub fn new_record_id(&self, now: DateTime<Utc>, taken: impl Fn(&str) -> bool) -> String {
        let base = format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros());
        if !self.contains_id(&base) && !taken(&base) {
            return base;
        }
        let mut suffix = 1u32;
        loop {
            let id = format!("{base}-{suffix}");
            if !self.contains_id(&id) && !taken(&id) {
                return id;
            }
            suffix += 1;
        }
    }

    /// Load a history file, repairing an out-of-range cursor or depth
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let mut history: Self = read_json(path)?;
        history.repair();
        Ok(Some(history))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(self, path)
    }

    fn repair(&mut self) {
        if self.depth == 0 {
            warn!("History file has depth 0, using {}", DEFAULT_DEPTH);
            self.depth = DEFAULT_DEPTH;
        }
        match self.current {
            Some(index) if index >= self.records.len() => {
                warn!("History cursor {} is out of range, moving to tail", index);
                self.current = self.records.len().checked_sub(1);
            }
            None if !self.records.is_empty() => {
                self.current = Some(self.records.len() - 1);
            }
            _ => {}
        }
        let evicted = self.trim_to_depth();
        if !evicted.is_empty() {
            warn!("History file exceeds depth {}, dropped {} records", self.depth, evicted.len());
        }
    }
}

impl Default for History {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            current: None,
            records: Vec::new(),
        }
    }
}

/// Serialize the cursor as a signed index with `-1` for "none"
mod cursor {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.map_or(-1, |index| index as i64))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Ok(usize::try_from(raw).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn labels(history: &History) -> Vec<&str> {
        history.records().iter().map(|r| r.label.as_str()).collect()
    }

    fn push(history: &mut History, n: usize) -> Vec<HistoryRecord> {
        history.record(HistoryRecord::new(format!("id{n}"), format!("L{n}")))
    }

    #[test]
    fn test_empty_history() {
        let history = History::default();
        assert_eq!(history.depth(), DEFAULT_DEPTH);
        assert_eq!(history.current(), None);
        assert_eq!(history.cursor(), -1);
        assert_eq!(history.previous(), None);
        assert_eq!(history.next(), None);
    }

    #[test]
    fn test_record_moves_cursor_to_tail() {
        let mut history = History::default();
        push(&mut history, 0);
        push(&mut history, 1);
        assert_eq!(history.current(), Some(1));
        assert_eq!(history.previous(), Some(0));
        assert_eq!(history.next(), None);
    }

    #[test]
    fn test_record_after_undo_drops_redo_branch() {
        let mut history = History::default();
        for n in 0..4 {
            push(&mut history, n);
        }
        assert!(history.set_current(1));

        let discarded = push(&mut history, 9);

        assert_eq!(labels(&history), vec!["L0", "L1", "L9"]);
        assert_eq!(history.current(), Some(2));
        let ids: Vec<_> = discarded.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["id2", "id3"]);
    }

    #[test]
    fn test_depth_evicts_oldest() {
        let mut history = History::new(3).unwrap();
        let mut evicted = Vec::new();
        for n in 0..5 {
            evicted.extend(push(&mut history, n));
        }
        assert_eq!(labels(&history), vec!["L2", "L3", "L4"]);
        assert_eq!(history.current(), Some(2));
        assert_eq!(evicted.len(), 2);
    }

    #[test]
    fn test_set_depth_trims_and_shifts_cursor() {
        let mut history = History::default();
        for n in 0..5 {
            push(&mut history, n);
        }
        history.set_current(3);

        let evicted = history.set_depth(2).unwrap();
        assert_eq!(evicted.len(), 3);
        assert_eq!(labels(&history), vec!["L3", "L4"]);
        assert_eq!(history.current(), Some(0));

        assert!(matches!(
            history.set_depth(0),
            Err(SessionError::InvalidDepth(0))
        ));
    }

    #[test]
    fn test_clear_resets_depth() {
        let mut history = History::new(4).unwrap();
        push(&mut history, 0);
        let cleared = history.clear();
        assert_eq!(cleared.len(), 1);
        assert!(history.is_empty());
        assert_eq!(history.depth(), DEFAULT_DEPTH);
        assert_eq!(history.cursor(), -1);
    }

    #[test]
    fn test_serialized_shape() {
        let mut history = History::new(5).unwrap();
        push(&mut history, 0);
        let value = serde_json::to_value(&history).unwrap();
        assert_eq!(
            value,
            json!({"depth": 5, "current": 0, "records": [["id0", "L0"]]})
        );

        let empty = serde_json::to_value(History::default()).unwrap();
        assert_eq!(empty["current"], json!(-1));
    }

    #[test]
    fn test_load_repairs_cursor() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("_history.json");
        std::fs::write(
            &path,
            r#"{"depth": 0, "current": 7, "records": [["a", "A"], ["b", "B"]]}"#,
        )
        .unwrap();

        let history = History::load(&path).unwrap().unwrap();
        assert_eq!(history.depth(), DEFAULT_DEPTH);
        assert_eq!(history.current(), Some(1));

        assert!(History::load(&dir.path().join("missing.json")).unwrap().is_none());
    }

    #[test]
    fn test_new_record_id_avoids_collisions() {
        let mut history = History::default();
        let now = Utc::now();
        let first = history.new_record_id(now, |_| false);
        history.record(HistoryRecord::new(first.clone(), "a"));

        let second = history.new_record_id(now, |_| false);
        assert_ne!(first, second);

        let third = history.new_record_id(now, |id| id == second);
        assert_ne!(third, second);
        assert_ne!(third, first);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Record,
        Undo,
        Redo,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Record), Just(Op::Undo), Just(Op::Redo)]
    }

    proptest! {
        #[test]
        fn prop_history_matches_reference_model(
            depth in 1usize..8,
            ops in proptest::collection::vec(op(), 0..60),
        ) {
            let mut history = History::new(depth).unwrap();
            let mut model: Vec<String> = Vec::new();
            let mut model_current: Option<usize> = None;

            for (step, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Record => {
                        let label = format!("L{step}");
                        let before = history.len();
                        let discarded = push_label(&mut history, &label);

                        model.truncate(model_current.map_or(0, |i| i + 1));
                        model.push(label);
                        if model.len() > depth {
                            model.drain(..model.len() - depth);
                        }
                        model_current = Some(model.len() - 1);

                        for record in &discarded {
                            prop_assert!(!history.contains_id(&record.id));
                        }
                        prop_assert_eq!(before + 1, history.len() + discarded.len());
                    }
                    Op::Undo => {
                        if let Some(target) = history.previous() {
                            history.set_current(target);
                        }
                        if let Some(index) = model_current.filter(|i| *i > 0) {
                            model_current = Some(index - 1);
                        }
                    }
                    Op::Redo => {
                        if let Some(target) = history.next() {
                            history.set_current(target);
                        }
                        if let Some(index) = model_current.filter(|i| i + 1 < model.len()) {
                            model_current = Some(index + 1);
                        }
                    }
                }

                prop_assert!(history.len() <= depth);
                prop_assert!(history.cursor() >= -1);
                prop_assert!(history.cursor() < history.len() as i64);
                prop_assert_eq!(history.current(), model_current);
                prop_assert_eq!(labels(&history), model.iter().map(String::as_str).collect::<Vec<_>>());
            }
        }
    }

    fn push_label(history: &mut History, label: &str) -> Vec<HistoryRecord> {
        history.record(HistoryRecord::new(format!("id-{label}"), label))
    }
}
