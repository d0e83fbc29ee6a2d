use crate::{
    completion::Completer,
    cursor::{CursorState, Lookup, SeriesCursor},
};

/// Lazily applies `f(&key, value)` to the inner cursor's values.
/// Navigation delegates; the function only runs on value access.
#[derive(Clone, Debug)]
pub struct MapCursor<Cu, F> {
    inner: Cu,
    f: F,
}

impl<Cu, F> MapCursor<Cu, F> {
    pub fn new(inner: Cu, f: F) -> Self {
        Self { inner, f }
    }

    pub fn into_inner(self) -> Cu {
        self.inner
    }
}

impl<Cu, F, V2> SeriesCursor for MapCursor<Cu, F>
where
    Cu: SeriesCursor,
    F: Fn(&Cu::Key, Cu::Value) -> V2 + Clone + Send,
    V2: Clone + Send,
{
    type Key = Cu::Key;
    type Value = V2;
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
        self.inner.move_at(key, dir)
    }

    fn value_at(&self, key: &Self::Key) -> Option<Self::Value> {
        self.inner.value_at(key).map(|v| (self.f)(key, v))
    }

    fn current_key(&self) -> Option<&Self::Key> {
        self.inner.current_key()
    }

    fn current_value(&self) -> Option<Self::Value> {
        let key = self.inner.current_key()?;
        let value = self.inner.current_value()?;
        Some((self.f)(key, value))
    }

    fn is_continuous(&self) -> bool {
        self.inner.is_continuous()
    }

    fn initialize(&self) -> Self {
        Self {
            inner: self.inner.initialize(),
            f: self.f.clone(),
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
    fn values_transform_lazily_keys_pass_through() {
        let s = SortedMap::<u64, u64>::new();
        for k in 1..=3 {
            s.set(k, k * 10).unwrap();
        }

        let mut c = s.cursor().map_values(|k, v| (k + v) as i64);
        assert!(c.move_first());
        assert_eq!(c.current(), Some((1, 11)));
        assert!(c.move_next());
        assert!(c.move_next());
        assert_eq!(c.current(), Some((3, 33)));
        assert!(!c.move_next());

        assert_eq!(c.value_at(&2), Some(22));
        assert_eq!(c.value_at(&4), None);
    }

    #[test]
    fn lookup_delegates() {
        let s = SortedMap::<u64, u64>::new();
        for k in [10, 20, 30] {
            s.set(k, k).unwrap();
        }
        let mut c = s.cursor().map_values(|_, v| v * 2);
        assert!(c.move_at(&25, Lookup::Le));
        assert_eq!(c.current(), Some((20, 40)));
        assert!(c.move_at(&25, Lookup::Ge));
        assert_eq!(c.current(), Some((30, 60)));
        assert!(!c.move_at(&25, Lookup::Eq));
    }
}
