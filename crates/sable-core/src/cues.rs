//! Timed cue delivery

use crate::types::Cue;
use tracing::trace;

#[derive(Debug, Clone)]
struct Entry {
    cue: Cue,
    emitted: bool,
}

/// Cues of one session ordered by start time, each delivered at most once
#[derive(Debug, Clone, Default)]
pub struct CueTimeline {
    entries: Vec<Entry>,
}

impl CueTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert cues parsed from appended media. Exact duplicates are dropped.
    pub fn insert(&mut self, cues: impl IntoIterator<Item = Cue>) {
        for cue in cues {
            let start = cue.start_time();
            if !start.is_finite() {
                continue;
            }
            let idx = self.entries.partition_point(|e| e.cue.start_time() <= start);
            let duplicate = self.entries[..idx]
                .iter()
                .rev()
                .take_while(|e| e.cue.start_time() == start)
                .any(|e| e.cue == cue);
            if !duplicate {
                self.entries.insert(idx, Entry { cue, emitted: false });
            }
        }
    }

    /// Playhead advanced normally from `from` to `to`: cues starting in
    /// `[from, to)` that were not delivered yet, in order.
    pub fn advance(&mut self, from: f64, to: f64) -> Vec<Cue> {
        if to <= from {
            return Vec::new();
        }
        let first = self.entries.partition_point(|e| e.cue.start_time() < from);
        let mut due = Vec::new();
        for entry in self.entries[first..].iter_mut() {
            if entry.cue.start_time() >= to {
                break;
            }
            if !entry.emitted {
                entry.emitted = true;
                due.push(entry.cue.clone());
            }
        }
        if !due.is_empty() {
            trace!(from, to, count = due.len(), "Cues due");
        }
        due
    }

    /// Playhead jumped forward over `[from, to)`; cues in the span are never
    /// delivered. Backward jumps leave the timeline untouched.
    pub fn skip(&mut self, from: f64, to: f64) {
        if to <= from {
            return;
        }
        let first = self.entries.partition_point(|e| e.cue.start_time() < from);
        for entry in self.entries[first..].iter_mut() {
            if entry.cue.start_time() >= to {
                break;
            }
            entry.emitted = true;
        }
    }

    /// Drop cues ending before `before`
    pub fn evict(&mut self, before: f64) {
        self.entries.retain(|e| e.cue.end_time() >= before);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Id3Cue, TextCue};

    fn text(start: f64, label: &str) -> Cue {
        Cue::Text(TextCue {
            start_time: start,
            end_time: start + 1.0,
            text: label.to_string(),
            ..Default::default()
        })
    }

    fn labels(cues: &[Cue]) -> Vec<String> {
        cues.iter()
            .map(|c| match c {
                Cue::Text(t) => t.text.clone(),
                _ => String::new(),
            })
            .collect()
    }

    #[test]
    fn test_advance_emits_in_order_once() {
        let mut cues = CueTimeline::new();
        cues.insert(vec![text(3.0, "c"), text(1.0, "a"), text(2.0, "b")]);

        assert_eq!(labels(&cues.advance(0.0, 2.5)), vec!["a", "b"]);
        assert_eq!(labels(&cues.advance(2.5, 5.0)), vec!["c"]);
        // Going back over delivered cues does not repeat them
        assert!(cues.advance(0.0, 5.0).is_empty());
    }

    #[test]
    fn test_half_open_interval() {
        let mut cues = CueTimeline::new();
        cues.insert(vec![text(2.0, "edge")]);
        assert!(cues.advance(0.0, 2.0).is_empty());
        assert_eq!(labels(&cues.advance(2.0, 2.1)), vec!["edge"]);
    }

    #[test]
    fn test_skip_suppresses_span() {
        let mut cues = CueTimeline::new();
        cues.insert(vec![text(5.0, "skipped"), text(12.0, "after")]);
        cues.skip(4.0, 10.0);
        assert_eq!(labels(&cues.advance(4.0, 13.0)), vec!["after"]);
    }

    #[test]
    fn test_backward_jump_does_not_mark() {
        let mut cues = CueTimeline::new();
        cues.insert(vec![text(5.0, "later")]);
        cues.skip(10.0, 0.0);
        assert_eq!(labels(&cues.advance(0.0, 6.0)), vec!["later"]);
    }

    #[test]
    fn test_duplicates_dropped() {
        let mut cues = CueTimeline::new();
        cues.insert(vec![text(1.0, "a")]);
        cues.insert(vec![text(1.0, "a"), text(1.0, "other")]);
        assert_eq!(cues.len(), 2);
    }

    #[test]
    fn test_mixed_kinds_and_eviction() {
        let mut cues = CueTimeline::new();
        cues.insert(vec![
            text(1.0, "a"),
            Cue::Id3(Id3Cue {
                start_time: 20.0,
                end_time: 20.0,
                ..Default::default()
            }),
        ]);
        cues.evict(10.0);
        assert_eq!(cues.len(), 1);
        assert!(matches!(cues.advance(19.0, 21.0).as_slice(), [Cue::Id3(_)]));
    }
}
