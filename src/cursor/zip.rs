use crate::{
    comparer::KeyComparer,
    completion::Completer,
    cursor::{CursorState, Lookup, SeriesCursor},
    error::{Error, Result},
};
use std::cmp::Ordering;

/// Inner join of two cursors by key.
///
/// Both inputs must agree on the comparer. A discrete side drives the
/// join by key alignment; a continuous side is not advanced but
/// sampled at the other side's keys. When both sides are continuous
/// the join emits on the union of their discrete keys, with whichever
/// side discretely advances supplying the pivot.
#[derive(Clone, Debug)]
pub struct ZipCursor<L, R>
where
    L: SeriesCursor,
    R: SeriesCursor<Key = L::Key, Comparer = L::Comparer>,
{
    left: L,
    right: R,
    state: CursorState,
    current: Option<(L::Key, L::Value, R::Value)>,
}

impl<L, R> ZipCursor<L, R>
where
    L: SeriesCursor,
    R: SeriesCursor<Key = L::Key, Comparer = L::Comparer>,
{
    pub fn new(left: L, right: R) -> Result<Self> {
        if left.comparer() != right.comparer() {
            return Err(Error::ComparerMismatch);
        }
        Ok(Self {
            left,
            right,
            state: CursorState::Uninitialized,
            current: None,
        })
    }

    fn cmp_keys(&self, a: &L::Key, b: &L::Key) -> Ordering {
        self.left.comparer().compare(a, b)
    }

    fn set_current(&mut self, key: L::Key, lv: L::Value, rv: R::Value) -> bool {
        self.current = Some((key, lv, rv));
        self.state = CursorState::Positioned;
        true
    }

    fn park(&mut self, forward: bool) -> bool {
        self.state = if forward {
            CursorState::AfterEnd
        } else {
            CursorState::BeforeStart
        };
        false
    }

    /// Peeks the next/previous discrete key of a child without moving
    /// it; cursors are cheap to clone by contract.
    fn peek<Cu: SeriesCursor>(cursor: &Cu, forward: bool) -> Option<Cu::Key> {
        let mut probe = cursor.clone();
        let moved = if forward {
            probe.move_next()
        } else {
            probe.move_previous()
        };
        if moved {
            probe.current_key().cloned()
        } else {
            None
        }
    }

    fn ensure(&mut self, forward: bool) -> (bool, bool) {
        let l = match self.left.state() {
            CursorState::Positioned => true,
            _ if forward => self.left.move_next(),
            _ => self.left.move_previous(),
        };
        let r = match self.right.state() {
            CursorState::Positioned => true,
            _ if forward => self.right.move_next(),
            _ => self.right.move_previous(),
        };
        (l, r)
    }

    fn align_forward(&mut self, mut l_ok: bool, mut r_ok: bool) -> bool {
        loop {
            if !l_ok || !r_ok {
                return self.park(true);
            }
            let ord = self.cmp_keys(
                self.left.current_key().unwrap(),
                self.right.current_key().unwrap(),
            );
            match ord {
                Ordering::Less => l_ok = self.left.move_next(),
                Ordering::Greater => r_ok = self.right.move_next(),
                Ordering::Equal => {
                    let key = self.left.current_key().unwrap().clone();
                    let lv = self.left.current_value().unwrap();
                    let rv = self.right.current_value().unwrap();
                    return self.set_current(key, lv, rv);
                }
            }
        }
    }

    fn align_backward(&mut self, mut l_ok: bool, mut r_ok: bool) -> bool {
        loop {
            if !l_ok || !r_ok {
                return self.park(false);
            }
            let ord = self.cmp_keys(
                self.left.current_key().unwrap(),
                self.right.current_key().unwrap(),
            );
            match ord {
                Ordering::Greater => l_ok = self.left.move_previous(),
                Ordering::Less => r_ok = self.right.move_previous(),
                Ordering::Equal => {
                    let key = self.left.current_key().unwrap().clone();
                    let lv = self.left.current_value().unwrap();
                    let rv = self.right.current_value().unwrap();
                    return self.set_current(key, lv, rv);
                }
            }
        }
    }

    fn step_discrete(&mut self, forward: bool) -> bool {
        let (mut l_ok, r_ok) = self.ensure(forward);
        if self.state == CursorState::Positioned {
            l_ok = if forward {
                self.left.move_next()
            } else {
                self.left.move_previous()
            };
        }
        if forward {
            self.align_forward(l_ok, r_ok)
        } else {
            self.align_backward(l_ok, r_ok)
        }
    }

    /// Left side discrete, right side sampled.
    fn step_sample_right(&mut self, forward: bool) -> bool {
        loop {
            let moved = if forward {
                self.left.move_next()
            } else {
                self.left.move_previous()
            };
            if !moved {
                return self.park(forward);
            }
            let key = self.left.current_key().unwrap().clone();
            if let Some(rv) = self.right.value_at(&key) {
                let lv = self.left.current_value().unwrap();
                return self.set_current(key, lv, rv);
            }
        }
    }

    /// Right side discrete, left side sampled.
    fn step_sample_left(&mut self, forward: bool) -> bool {
        loop {
            let moved = if forward {
                self.right.move_next()
            } else {
                self.right.move_previous()
            };
            if !moved {
                return self.park(forward);
            }
            let key = self.right.current_key().unwrap().clone();
            if let Some(lv) = self.left.value_at(&key) {
                let rv = self.right.current_value().unwrap();
                return self.set_current(key, lv, rv);
            }
        }
    }

    /// Both sides continuous: emit on the union of discrete keys.
    fn step_union(&mut self, forward: bool) -> bool {
        loop {
            let ln = Self::peek(&self.left, forward);
            let rn = Self::peek(&self.right, forward);
            let pivot = match (ln, rn) {
                (None, None) => return self.park(forward),
                (Some(k), None) => {
                    self.advance_left(forward);
                    k
                }
                (None, Some(k)) => {
                    self.advance_right(forward);
                    k
                }
                (Some(lk), Some(rk)) => match self.cmp_keys(&lk, &rk) {
                    Ordering::Equal => {
                        self.advance_left(forward);
                        self.advance_right(forward);
                        lk
                    }
                    Ordering::Less if forward => {
                        self.advance_left(forward);
                        lk
                    }
                    Ordering::Less => {
                        self.advance_right(forward);
                        rk
                    }
                    Ordering::Greater if forward => {
                        self.advance_right(forward);
                        rk
                    }
                    Ordering::Greater => {
                        self.advance_left(forward);
                        lk
                    }
                },
            };
            if let (Some(lv), Some(rv)) =
                (self.left.value_at(&pivot), self.right.value_at(&pivot))
            {
                return self.set_current(pivot, lv, rv);
            }
        }
    }

    fn advance_left(&mut self, forward: bool) {
        if forward {
            self.left.move_next();
        } else {
            self.left.move_previous();
        }
    }

    fn advance_right(&mut self, forward: bool) {
        if forward {
            self.right.move_next();
        } else {
            self.right.move_previous();
        }
    }

    fn step(&mut self, forward: bool) -> bool {
        match (self.left.is_continuous(), self.right.is_continuous()) {
            (false, false) => self.step_discrete(forward),
            (false, true) => self.step_sample_right(forward),
            (true, false) => self.step_sample_left(forward),
            (true, true) => self.step_union(forward),
        }
    }
}

impl<L, R> SeriesCursor for ZipCursor<L, R>
where
    L: SeriesCursor,
    R: SeriesCursor<Key = L::Key, Comparer = L::Comparer>,
{
    type Key = L::Key;
    type Value = (L::Value, R::Value);
    type Comparer = L::Comparer;

    fn state(&self) -> CursorState {
        self.state
    }

    fn comparer(&self) -> &Self::Comparer {
        self.left.comparer()
    }

    fn move_first(&mut self) -> bool {
        self.left = self.left.initialize();
        self.right = self.right.initialize();
        self.state = CursorState::Uninitialized;
        self.current = None;
        self.step(true)
    }

    fn move_last(&mut self) -> bool {
        self.left = self.left.initialize();
        self.right = self.right.initialize();
        self.state = CursorState::Uninitialized;
        self.current = None;
        self.step(false)
    }

    fn move_next(&mut self) -> bool {
        self.step(true)
    }

    fn move_previous(&mut self) -> bool {
        self.step(false)
    }

    fn move_at(&mut self, key: &Self::Key, dir: Lookup) -> bool {
        match (self.left.is_continuous(), self.right.is_continuous()) {
            (false, false) => {
                let l_ok = self.left.move_at(key, dir);
                let r_ok = self.right.move_at(key, dir);
                match dir {
                    Lookup::Eq => {
                        if l_ok && r_ok {
                            let k = self.left.current_key().unwrap().clone();
                            let lv = self.left.current_value().unwrap();
                            let rv = self.right.current_value().unwrap();
                            self.set_current(k, lv, rv)
                        } else {
                            self.park(true)
                        }
                    }
                    Lookup::Gt | Lookup::Ge => self.align_forward(l_ok, r_ok),
                    Lookup::Lt | Lookup::Le => self.align_backward(l_ok, r_ok),
                }
            }
            (false, true) => self.seek_sample(key, dir, true),
            (true, false) => self.seek_sample(key, dir, false),
            (true, true) => self.seek_union(key, dir),
        }
    }

    fn value_at(&self, key: &Self::Key) -> Option<Self::Value> {
        Some((self.left.value_at(key)?, self.right.value_at(key)?))
    }

    fn current_key(&self) -> Option<&Self::Key> {
        if self.state == CursorState::Positioned {
            self.current.as_ref().map(|(k, _, _)| k)
        } else {
            None
        }
    }

    fn current_value(&self) -> Option<Self::Value> {
        if self.state == CursorState::Positioned {
            self.current
                .as_ref()
                .map(|(_, lv, rv)| (lv.clone(), rv.clone()))
        } else {
            None
        }
    }

    fn is_continuous(&self) -> bool {
        self.left.is_continuous() && self.right.is_continuous()
    }

    fn initialize(&self) -> Self {
        Self {
            left: self.left.initialize(),
            right: self.right.initialize(),
            state: CursorState::Uninitialized,
            current: None,
        }
    }

    fn completer(&self) -> Option<Completer> {
        match (self.left.completer(), self.right.completer()) {
            (Some(a), Some(b)) => Some(Completer::pair(a, b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    fn version(&self) -> u64 {
        self.left.version().max(self.right.version())
    }
}

impl<L, R> ZipCursor<L, R>
where
    L: SeriesCursor,
    R: SeriesCursor<Key = L::Key, Comparer = L::Comparer>,
{
    /// Lookup when exactly one side is discrete; the discrete side is
    /// positioned and the continuous side sampled at its keys.
    fn seek_sample(&mut self, key: &L::Key, dir: Lookup, left_discrete: bool) -> bool {
        let ok = if left_discrete {
            self.left.move_at(key, dir)
        } else {
            self.right.move_at(key, dir)
        };
        if !ok {
            return self.park(dir.is_forward() || dir == Lookup::Eq);
        }
        if dir == Lookup::Eq {
            let (k, sampled) = if left_discrete {
                let k = self.left.current_key().unwrap().clone();
                let s = self.right.value_at(&k);
                (k, s.is_some())
            } else {
                let k = self.right.current_key().unwrap().clone();
                let s = self.left.value_at(&k);
                (k, s.is_some())
            };
            if !sampled {
                return self.park(true);
            }
            let lv = if left_discrete {
                self.left.current_value().unwrap()
            } else {
                self.left.value_at(&k).unwrap()
            };
            let rv = if left_discrete {
                self.right.value_at(&k).unwrap()
            } else {
                self.right.current_value().unwrap()
            };
            return self.set_current(k, lv, rv);
        }

        // Directional: try the landing key, then keep scanning in the
        // requested direction until the sample hits.
        loop {
            let k = if left_discrete {
                self.left.current_key().unwrap().clone()
            } else {
                self.right.current_key().unwrap().clone()
            };
            let pair = (self.left.value_at(&k), self.right.value_at(&k));
            if let (Some(lv), Some(rv)) = pair {
                return self.set_current(k, lv, rv);
            }
            let moved = match (left_discrete, dir.is_forward()) {
                (true, true) => self.left.move_next(),
                (true, false) => self.left.move_previous(),
                (false, true) => self.right.move_next(),
                (false, false) => self.right.move_previous(),
            };
            if !moved {
                return self.park(dir.is_forward());
            }
        }
    }

    /// Lookup on the union of discrete keys when both sides are
    /// continuous.
    fn seek_union(&mut self, key: &L::Key, dir: Lookup) -> bool {
        if dir == Lookup::Eq {
            return match (self.left.value_at(key), self.right.value_at(key)) {
                (Some(lv), Some(rv)) => {
                    self.left.move_at(key, Lookup::Le);
                    self.right.move_at(key, Lookup::Le);
                    self.set_current(key.clone(), lv, rv)
                }
                _ => self.park(true),
            };
        }

        let l_ok = self.left.move_at(key, dir);
        let r_ok = self.right.move_at(key, dir);
        let lk = l_ok.then(|| self.left.current_key().unwrap().clone());
        let rk = r_ok.then(|| self.right.current_key().unwrap().clone());
        let forward = dir.is_forward();
        let pivot = match (lk, rk) {
            (None, None) => return self.park(forward),
            (Some(k), None) | (None, Some(k)) => k,
            (Some(a), Some(b)) => match (self.cmp_keys(&a, &b), forward) {
                (Ordering::Less, true) | (Ordering::Greater, false) => a,
                _ => b,
            },
        };
        // Re-anchor both sides at the pivot so that further union
        // stepping enumerates every discrete key.
        let anchor = if forward { Lookup::Le } else { Lookup::Ge };
        self.left.move_at(&pivot, anchor);
        self.right.move_at(&pivot, anchor);
        match (self.left.value_at(&pivot), self.right.value_at(&pivot)) {
            (Some(lv), Some(rv)) => self.set_current(pivot, lv, rv),
            _ => self.step_union(forward),
        }
    }
}

/// `Zip` fused with a binary value function, skipping the
/// intermediate pair value.
#[derive(Clone)]
pub struct ZipMapCursor<L, R, F>
where
    L: SeriesCursor,
    R: SeriesCursor<Key = L::Key, Comparer = L::Comparer>,
{
    zip: ZipCursor<L, R>,
    f: F,
}

impl<L, R, F> std::fmt::Debug for ZipMapCursor<L, R, F>
where
    L: SeriesCursor,
    R: SeriesCursor<Key = L::Key, Comparer = L::Comparer>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipMapCursor").finish_non_exhaustive()
    }
}

impl<L, R, F, V2> ZipMapCursor<L, R, F>
where
    L: SeriesCursor,
    R: SeriesCursor<Key = L::Key, Comparer = L::Comparer>,
    F: Fn(&L::Key, L::Value, R::Value) -> V2 + Clone + Send,
    V2: Clone + Send,
{
    pub fn new(left: L, right: R, f: F) -> Result<Self> {
        Ok(Self {
            zip: ZipCursor::new(left, right)?,
            f,
        })
    }
}

impl<L, R, F, V2> SeriesCursor for ZipMapCursor<L, R, F>
where
    L: SeriesCursor,
    R: SeriesCursor<Key = L::Key, Comparer = L::Comparer>,
    F: Fn(&L::Key, L::Value, R::Value) -> V2 + Clone + Send,
    V2: Clone + Send,
{
    type Key = L::Key;
    type Value = V2;
    type Comparer = L::Comparer;

    fn state(&self) -> CursorState {
        self.zip.state()
    }

    fn comparer(&self) -> &Self::Comparer {
        self.zip.comparer()
    }

    fn move_first(&mut self) -> bool {
        self.zip.move_first()
    }

    fn move_last(&mut self) -> bool {
        self.zip.move_last()
    }

    fn move_next(&mut self) -> bool {
        self.zip.move_next()
    }

    fn move_previous(&mut self) -> bool {
        self.zip.move_previous()
    }

    fn move_at(&mut self, key: &Self::Key, dir: Lookup) -> bool {
        self.zip.move_at(key, dir)
    }

    fn value_at(&self, key: &Self::Key) -> Option<Self::Value> {
        let (lv, rv) = self.zip.value_at(key)?;
        Some((self.f)(key, lv, rv))
    }

    fn current_key(&self) -> Option<&Self::Key> {
        self.zip.current_key()
    }

    fn current_value(&self) -> Option<Self::Value> {
        let (k, lv, rv) = self.zip.current.as_ref()?;
        if self.zip.state == CursorState::Positioned {
            Some((self.f)(k, lv.clone(), rv.clone()))
        } else {
            None
        }
    }

    fn is_continuous(&self) -> bool {
        self.zip.is_continuous()
    }

    fn initialize(&self) -> Self {
        Self {
            zip: self.zip.initialize(),
            f: self.f.clone(),
        }
    }

    fn completer(&self) -> Option<Completer> {
        self.zip.completer()
    }

    fn version(&self) -> u64 {
        self.zip.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cursor::{CursorIter, CursorOps},
        series::SortedMap,
    };

    fn series(pairs: &[(u64, i64)]) -> SortedMap<u64, i64> {
        let s = SortedMap::new();
        for &(k, v) in pairs {
            s.set(k, v).unwrap();
        }
        s
    }

    #[test]
    fn inner_join_on_intersection() {
        let a = series(&[(1, 10), (2, 20), (4, 40)]);
        let b = series(&[(2, 2), (3, 3), (4, 4)]);

        let zipped = a.cursor().zip(b.cursor()).unwrap();
        let out: Vec<_> = CursorIter::new(zipped).collect();
        assert_eq!(out, vec![(2, (20, 2)), (4, (40, 4))]);
    }

    #[test]
    fn zip_then_map_concatenates() {
        let a = SortedMap::<u64, String>::new();
        for (k, v) in [(1, "a"), (2, "b"), (4, "d")] {
            a.set(k, v.to_string()).unwrap();
        }
        let b = SortedMap::<u64, String>::new();
        for (k, v) in [(2, "B"), (3, "C"), (4, "D")] {
            b.set(k, v.to_string()).unwrap();
        }

        let joined = a
            .cursor()
            .zip_map(b.cursor(), |_, x, y| format!("{}{}", x, y))
            .unwrap();
        let out: Vec<_> = CursorIter::new(joined).collect();
        assert_eq!(
            out,
            vec![(2, "bB".to_string()), (4, "dD".to_string())]
        );
    }

    #[test]
    fn backward_iteration_mirrors_forward() {
        let a = series(&[(1, 1), (2, 2), (3, 3)]);
        let b = series(&[(2, 20), (3, 30), (5, 50)]);

        let mut c = a.cursor().zip(b.cursor()).unwrap();
        assert!(c.move_last());
        assert_eq!(c.current_key(), Some(&3));
        assert!(c.move_previous());
        assert_eq!(c.current_key(), Some(&2));
        assert!(!c.move_previous());
    }

    #[test]
    fn lookup_aligns_toward_direction() {
        let a = series(&[(1, 1), (3, 3), (5, 5)]);
        let b = series(&[(3, 30), (4, 40), (5, 50)]);

        let mut c = a.cursor().zip(b.cursor()).unwrap();
        assert!(c.move_at(&2, Lookup::Ge));
        assert_eq!(c.current_key(), Some(&3));

        assert!(c.move_at(&4, Lookup::Le));
        assert_eq!(c.current_key(), Some(&3));

        assert!(c.move_at(&5, Lookup::Eq));
        assert_eq!(c.current(), Some((5, (5, 50))));

        assert!(!c.move_at(&2, Lookup::Eq));
        assert!(!c.move_at(&6, Lookup::Ge));
    }

    #[test]
    fn continuous_side_is_sampled_not_advanced() {
        let quotes = series(&[(10, 100), (20, 200)]);
        let trades = series(&[(12, 1), (20, 2), (25, 3)]);

        // Repeat the quote at or before each trade.
        let c = trades
            .cursor()
            .zip(quotes.cursor().repeat())
            .unwrap();
        let out: Vec<_> = CursorIter::new(c).collect();
        assert_eq!(out, vec![(12, (1, 100)), (20, (2, 200)), (25, (3, 200))]);
    }

    #[test]
    fn both_continuous_emit_on_union_of_keys() {
        let a = series(&[(10, 1), (30, 3)]);
        let b = series(&[(20, 2), (40, 4)]);

        let c = a
            .cursor()
            .repeat()
            .zip(b.cursor().repeat())
            .unwrap();
        assert!(c.is_continuous());
        let out: Vec<_> = CursorIter::new(c).collect();
        // 10 is skipped: b has no value at or before 10.
        assert_eq!(out, vec![(20, (1, 2)), (30, (3, 2)), (40, (3, 4))]);
    }

    #[test]
    fn zip_of_zip_nests() {
        let a = series(&[(1, 1), (2, 2), (3, 3)]);
        let b = series(&[(1, 10), (2, 20), (3, 30)]);
        let c = series(&[(2, 200), (3, 300)]);

        let nested = a
            .cursor()
            .zip(b.cursor())
            .unwrap()
            .zip(c.cursor())
            .unwrap();
        let out: Vec<_> = CursorIter::new(nested).collect();
        assert_eq!(out, vec![(2, ((2, 20), 200)), (3, ((3, 30), 300))]);
    }

    #[test]
    fn zip_commutes_with_map_on_keys() {
        let a = series(&[(1, 1), (2, 2), (4, 4)]);
        let b = series(&[(2, 20), (4, 40), (8, 80)]);

        let mapped_first: Vec<_> = CursorIter::new(
            a.cursor()
                .map_values(|_, v| v * 2)
                .zip(b.cursor())
                .unwrap(),
        )
        .collect();
        let mapped_after: Vec<_> = CursorIter::new(
            a.cursor()
                .zip(b.cursor())
                .unwrap()
                .map_values(|_, (x, y)| (x * 2, y)),
        )
        .collect();
        assert_eq!(mapped_first, mapped_after);
    }

    #[test]
    fn value_at_requires_both_sides() {
        let a = series(&[(1, 1), (2, 2)]);
        let b = series(&[(2, 20)]);
        let c = a.cursor().zip(b.cursor()).unwrap();
        assert_eq!(c.value_at(&2), Some((2, 20)));
        assert_eq!(c.value_at(&1), None);
    }
}
