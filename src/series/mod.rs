//! The series surface: a logical, possibly lazy, ordered mapping.
//!
//! A series is whatever can hand out cursors over itself. The
//! materialized container lives in [`sorted_map`]; derived series are
//! a stored template cursor wrapped in [`CursorSeries`].

pub mod sorted_map;

pub use sorted_map::{AppendOption, SortedMap, SortedMapCursor};

use crate::cursor::{CursorIter, SeriesCursor};

/// A logical ordered mapping from keys to values.
///
/// `version` is the monotonic mutation counter used for optimistic
/// reads and change detection; for derived series it tracks the
/// inputs. A completed series never changes again.
pub trait Series {
    type Key: Clone + Send;
    type Value: Clone + Send;
    type Cursor: SeriesCursor<Key = Self::Key, Value = Self::Value>;

    /// A fresh cursor positioned nowhere.
    fn cursor(&self) -> Self::Cursor;

    fn version(&self) -> u64;

    fn is_completed(&self) -> bool;

    /// Whether keys are ordered by insertion instead of by the
    /// comparer.
    fn is_indexed(&self) -> bool {
        false
    }

    fn first(&self) -> Option<(Self::Key, Self::Value)> {
        let mut c = self.cursor();
        if c.move_first() {
            c.current()
        } else {
            None
        }
    }

    fn last(&self) -> Option<(Self::Key, Self::Value)> {
        let mut c = self.cursor();
        if c.move_last() {
            c.current()
        } else {
            None
        }
    }

    /// Point lookup through a throwaway cursor.
    fn get(&self, key: &Self::Key) -> Option<Self::Value> {
        self.cursor().value_at(key)
    }

    fn is_empty(&self) -> bool {
        self.first().is_none()
    }

    /// Forward iteration over the current content.
    fn iter(&self) -> CursorIter<Self::Cursor> {
        CursorIter::new(self.cursor())
    }
}

/// A lazy series defined by a template cursor.
///
/// The template stays uninitialized; every `cursor()` call spins up
/// an independent copy, so a `CursorSeries` can be shared and
/// iterated concurrently like any other series.
#[derive(Clone, Debug)]
pub struct CursorSeries<Cu> {
    template: Cu,
}

impl<Cu: SeriesCursor> CursorSeries<Cu> {
    pub fn new(cursor: Cu) -> Self {
        Self {
            template: cursor.initialize(),
        }
    }
}

impl<Cu: SeriesCursor> Series for CursorSeries<Cu> {
    type Key = Cu::Key;
    type Value = Cu::Value;
    type Cursor = Cu;

    fn cursor(&self) -> Cu {
        self.template.initialize()
    }

    fn version(&self) -> u64 {
        self.template.version()
    }

    fn is_completed(&self) -> bool {
        match self.template.completer() {
            Some(completer) => completer.is_completed(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::CursorOps;

    #[test]
    fn cursor_series_is_reiterable() {
        let s = SortedMap::<u64, i64>::new();
        for (k, v) in [(1, 1), (2, 2), (3, 3)] {
            s.set(k, v).unwrap();
        }

        let doubled = s.cursor().map_values(|_, v| v * 2).into_series();
        let once: Vec<_> = doubled.iter().collect();
        let twice: Vec<_> = doubled.iter().collect();
        assert_eq!(once, twice);
        assert_eq!(once, vec![(1, 2), (2, 4), (3, 6)]);

        assert_eq!(doubled.first(), Some((1, 2)));
        assert_eq!(doubled.last(), Some((3, 6)));
        assert_eq!(doubled.get(&2), Some(4));
        assert_eq!(doubled.version(), s.version());
        assert!(!doubled.is_completed());

        s.complete().unwrap();
        assert!(doubled.is_completed());
    }
}
