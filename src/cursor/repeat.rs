use crate::{
    completion::Completer,
    cursor::{CursorState, Lookup, SeriesCursor},
};

/// A continuous view over a discrete cursor: for any requested key it
/// answers with the value at the greatest key at or before it.
///
/// This is the canonical continuous cursor; zipping it against a
/// discrete series samples it at the discrete side's keys.
#[derive(Clone, Debug)]
pub struct RepeatCursor<Cu> {
    inner: Cu,
}

impl<Cu: SeriesCursor> RepeatCursor<Cu> {
    pub fn new(inner: Cu) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> Cu {
        self.inner
    }
}

impl<Cu: SeriesCursor> SeriesCursor for RepeatCursor<Cu> {
    type Key = Cu::Key;
    type Value = Cu::Value;
    type Comparer = Cu::Comparer;

    fn state(&self) -> CursorState {
        self.inner.state()
    }

    fn comparer(&self) -> &Self::Comparer {
        self.inner.comparer()
    }

    fn move_first(&mut self) -> bool {
        self.inner.move_first()
    }

    fn move_last(&mut self) -> bool {
        self.inner.move_last()
    }

    fn move_next(&mut self) -> bool {
        self.inner.move_next()
    }

    fn move_previous(&mut self) -> bool {
        self.inner.move_previous()
    }

    fn move_at(&mut self, key: &Self::Key, dir: Lookup) -> bool {
        // Between stored keys the repeated view is defined, so an
        // exact or at-most lookup degrades to the previous element.
        let dir = match dir {
            Lookup::Eq | Lookup::Le => Lookup::Le,
            other => other,
        };
        self.inner.move_at(key, dir)
    }

    fn value_at(&self, key: &Self::Key) -> Option<Self::Value> {
        // Point lookups must not move this cursor; probe on a clone.
        let mut probe = self.inner.clone();
        if probe.move_at(key, Lookup::Le) {
            probe.current_value()
        } else {
            None
        }
    }

    fn current_key(&self) -> Option<&Self::Key> {
        self.inner.current_key()
    }

    fn current_value(&self) -> Option<Self::Value> {
        self.inner.current_value()
    }

    fn is_continuous(&self) -> bool {
        true
    }

    fn initialize(&self) -> Self {
        Self {
            inner: self.inner.initialize(),
        }
    }

    fn completer(&self) -> Option<Completer> {
        self.inner.completer()
    }

    fn version(&self) -> u64 {
        self.inner.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cursor::CursorOps, series::SortedMap};

    #[test]
    fn repeats_last_value_between_keys() {
        let s = SortedMap::<u64, &str>::new();
        s.set(10, "a").unwrap();
        s.set(20, "b").unwrap();

        let c = s.cursor().repeat();
        assert!(c.is_continuous());
        assert_eq!(c.value_at(&10), Some("a"));
        assert_eq!(c.value_at(&15), Some("a"));
        assert_eq!(c.value_at(&20), Some("b"));
        assert_eq!(c.value_at(&99), Some("b"));
        assert_eq!(c.value_at(&9), None);
    }

    #[test]
    fn exact_lookup_degrades_to_previous() {
        let s = SortedMap::<u64, &str>::new();
        s.set(10, "a").unwrap();
        s.set(20, "b").unwrap();

        let mut c = s.cursor().repeat();
        assert!(c.move_at(&15, Lookup::Eq));
        assert_eq!(c.current(), Some((10, "a")));
    }
}
