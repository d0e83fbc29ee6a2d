use crate::{
    completion::Completer,
    cursor::{CursorState, Lookup, SeriesCursor},
};

/// Skips elements whose value fails the predicate.
///
/// The filtered view keeps its own notion of state: the inner cursor
/// may be parked on an excluded element after a failed directional
/// scan. Filtering is never continuous.
#[derive(Clone, Debug)]
pub struct FilterCursor<Cu, P> {
    inner: Cu,
    predicate: P,
    state: CursorState,
}

impl<Cu: SeriesCursor, P> FilterCursor<Cu, P>
where
    P: Fn(&Cu::Key, &Cu::Value) -> bool + Clone + Send,
{
    pub fn new(inner: Cu, predicate: P) -> Self {
        Self {
            inner,
            predicate,
            state: CursorState::Uninitialized,
        }
    }

    fn passes_current(&self) -> bool {
        match (self.inner.current_key(), self.inner.current_value()) {
            (Some(k), Some(v)) => (self.predicate)(k, &v),
            _ => false,
        }
    }

    /// Advances the inner cursor in the given direction until the
    /// predicate holds or the end is reached.
    fn scan(&mut self, forward: bool) -> bool {
        loop {
            if self.passes_current() {
                self.state = CursorState::Positioned;
                return true;
            }
            let moved = if forward {
                self.inner.move_next()
            } else {
                self.inner.move_previous()
            };
            if !moved {
                self.state = if forward {
                    CursorState::AfterEnd
                } else {
                    CursorState::BeforeStart
                };
                return false;
            }
        }
    }
}

impl<Cu, P> SeriesCursor for FilterCursor<Cu, P>
where
    Cu: SeriesCursor,
    P: Fn(&Cu::Key, &Cu::Value) -> bool + Clone + Send,
{
    type Key = Cu::Key;
    type Value = Cu::Value;
    type Comparer = Cu::Comparer;

    fn state(&self) -> CursorState {
        self.state
    }

    fn comparer(&self) -> &Self::Comparer {
        self.inner.comparer()
    }

    fn move_first(&mut self) -> bool {
        if !self.inner.move_first() {
            self.state = CursorState::BeforeStart;
            return false;
        }
        self.scan(true)
    }

    fn move_last(&mut self) -> bool {
        if !self.inner.move_last() {
            self.state = CursorState::AfterEnd;
            return false;
        }
        self.scan(false)
    }

    fn move_next(&mut self) -> bool {
        if !self.inner.move_next() {
            self.state = CursorState::AfterEnd;
            return false;
        }
        self.scan(true)
    }

    fn move_previous(&mut self) -> bool {
        if !self.inner.move_previous() {
            self.state = CursorState::BeforeStart;
            return false;
        }
        self.scan(false)
    }

    fn move_at(&mut self, key: &Self::Key, dir: Lookup) -> bool {
        if !self.inner.move_at(key, dir) {
            self.state = if dir.is_forward() {
                CursorState::AfterEnd
            } else {
                CursorState::BeforeStart
            };
            return false;
        }
        match dir {
            Lookup::Eq => {
                if self.passes_current() {
                    self.state = CursorState::Positioned;
                    true
                } else {
                    self.state = CursorState::AfterEnd;
                    false
                }
            }
            Lookup::Gt | Lookup::Ge => self.scan(true),
            Lookup::Lt | Lookup::Le => self.scan(false),
        }
    }

    fn value_at(&self, key: &Self::Key) -> Option<Self::Value> {
        self.inner
            .value_at(key)
            .filter(|v| (self.predicate)(key, v))
    }

    fn current_key(&self) -> Option<&Self::Key> {
        if self.state == CursorState::Positioned {
            self.inner.current_key()
        } else {
            None
        }
    }

    fn current_value(&self) -> Option<Self::Value> {
        if self.state == CursorState::Positioned {
            self.inner.current_value()
        } else {
            None
        }
    }

    fn is_continuous(&self) -> bool {
        false
    }

    fn initialize(&self) -> Self {
        Self {
            inner: self.inner.initialize(),
            predicate: self.predicate.clone(),
            state: CursorState::Uninitialized,
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

    fn evens() -> SortedMap<u64, u64> {
        let s = SortedMap::new();
        for k in 1..=6 {
            s.set(k, k).unwrap();
        }
        s
    }

    #[test]
    fn forward_iteration_skips_failing_values() {
        let mut c = evens().cursor().filter_values(|_, v| v % 2 == 0);
        let mut seen = Vec::new();
        while c.move_next() {
            seen.push(c.current().unwrap());
        }
        assert_eq!(seen, vec![(2, 2), (4, 4), (6, 6)]);
        assert_eq!(c.state(), CursorState::AfterEnd);
    }

    #[test]
    fn backward_iteration() {
        let mut c = evens().cursor().filter_values(|_, v| v % 2 == 1);
        assert!(c.move_last());
        assert_eq!(c.current_key(), Some(&5));
        assert!(c.move_previous());
        assert_eq!(c.current_key(), Some(&3));
        assert!(c.move_previous());
        assert_eq!(c.current_key(), Some(&1));
        assert!(!c.move_previous());
    }

    #[test]
    fn directional_lookup_respects_direction() {
        let mut c = evens().cursor().filter_values(|_, v| v % 2 == 0);

        // 3 fails the predicate; Ge must keep scanning forward.
        assert!(c.move_at(&3, Lookup::Ge));
        assert_eq!(c.current_key(), Some(&4));

        assert!(c.move_at(&3, Lookup::Le));
        assert_eq!(c.current_key(), Some(&2));

        assert!(!c.move_at(&3, Lookup::Eq));
        assert!(c.move_at(&4, Lookup::Eq));
        assert_eq!(c.current_key(), Some(&4));
    }

    #[test]
    fn point_lookup_applies_predicate() {
        let c = evens().cursor().filter_values(|_, v| v % 2 == 0);
        assert_eq!(c.value_at(&4), Some(4));
        assert_eq!(c.value_at(&3), None);
    }
}
