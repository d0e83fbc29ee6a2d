//! The materialized sorted container: two parallel arrays under a
//! write latch, with monotonic version publication and completion
//! broadcasting.

use crate::{
    comparer::{KeyComparer, NaturalOrder},
    completion::{Completer, CompleterCore},
    cursor::{CursorState, Lookup, SeekMiss, SeriesCursor},
    error::{Error, Result},
    optimistic,
    series::Series,
};
use std::{
    cmp::Ordering as CmpOrdering,
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use parking_lot::RwLock;

/// How `try_append` treats keys that overlap the target's tail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOption {
    /// Fail when `other.first <= self.last`.
    RejectOnOverlap,
    /// Remove own keys at or above `other.first`, then append all of
    /// `other`.
    DropOldOverlap,
    /// Require the overlapping range to be element-wise equal and
    /// append only the strictly newer suffix.
    IgnoreEqualOverlap,
    /// Like `IgnoreEqualOverlap`, but fail when there is no overlap
    /// at all.
    RequireEqualOverlap,
}

const MIN_CAPACITY: usize = 4;
// Capacity doubles until the growth step hits this ceiling.
const MAX_GROWTH_STEP: usize = 1 << 16;

fn reserve_one<T>(vec: &mut Vec<T>) {
    if vec.len() == vec.capacity() {
        let step = vec.capacity().clamp(MIN_CAPACITY, MAX_GROWTH_STEP);
        vec.reserve_exact(step);
    }
}

/// The latch-protected payload: parallel key/value arrays.
#[derive(Debug)]
struct Storage<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
    indexed: bool,
}

impl<K: Clone, V: Clone> Storage<K, V> {
    fn len(&self) -> usize {
        self.keys.len()
    }

    fn pair_at(&self, index: usize) -> (K, V) {
        (self.keys[index].clone(), self.values[index].clone())
    }

    fn first_pair(&self) -> Option<(K, V)> {
        (!self.keys.is_empty()).then(|| self.pair_at(0))
    }

    fn last_pair(&self) -> Option<(K, V)> {
        (!self.keys.is_empty()).then(|| self.pair_at(self.len() - 1))
    }

    /// Binary search in sorted mode, like `slice::binary_search_by`
    /// but driven by the series comparer.
    fn search<C: KeyComparer<K>>(&self, comparer: &C, key: &K) -> std::result::Result<usize, usize> {
        let mut lo = 0;
        let mut hi = self.keys.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match comparer.compare(&self.keys[mid], key) {
                CmpOrdering::Less => lo = mid + 1,
                CmpOrdering::Greater => hi = mid,
                CmpOrdering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    fn position_eq<C: KeyComparer<K>>(&self, comparer: &C, key: &K) -> Option<usize> {
        if self.indexed {
            self.keys.iter().position(|k| comparer.eq_keys(k, key))
        } else {
            self.search(comparer, key).ok()
        }
    }

    /// Resolves `key` per `dir` into an element index, or a refined
    /// miss reason. Indexed series resolve directional lookups
    /// relative to the exact key's insertion position.
    fn locate<C: KeyComparer<K>>(
        &self,
        comparer: &C,
        key: &K,
        dir: Lookup,
    ) -> std::result::Result<usize, SeekMiss> {
        let len = self.len();
        if len == 0 {
            return Err(SeekMiss::Empty);
        }
        if self.indexed {
            let pos = self
                .keys
                .iter()
                .position(|k| comparer.eq_keys(k, key))
                .ok_or(SeekMiss::NotFound)?;
            return match dir {
                Lookup::Eq | Lookup::Le | Lookup::Ge => Ok(pos),
                Lookup::Lt => {
                    if pos > 0 {
                        Ok(pos - 1)
                    } else {
                        Err(SeekMiss::BelowRange)
                    }
                }
                Lookup::Gt => {
                    if pos + 1 < len {
                        Ok(pos + 1)
                    } else {
                        Err(SeekMiss::AboveRange)
                    }
                }
            };
        }
        match dir {
            Lookup::Eq => self.search(comparer, key).map_err(|ins| {
                if ins == 0 {
                    SeekMiss::BelowRange
                } else if ins == len {
                    SeekMiss::AboveRange
                } else {
                    SeekMiss::NotFound
                }
            }),
            Lookup::Le => match self.search(comparer, key) {
                Ok(i) => Ok(i),
                Err(0) => Err(SeekMiss::BelowRange),
                Err(ins) => Ok(ins - 1),
            },
            Lookup::Lt => {
                let ins = match self.search(comparer, key) {
                    Ok(i) => i,
                    Err(ins) => ins,
                };
                if ins == 0 {
                    Err(SeekMiss::BelowRange)
                } else {
                    Ok(ins - 1)
                }
            }
            Lookup::Ge => match self.search(comparer, key) {
                Ok(i) => Ok(i),
                Err(ins) if ins == len => Err(SeekMiss::AboveRange),
                Err(ins) => Ok(ins),
            },
            Lookup::Gt => {
                let ins = match self.search(comparer, key) {
                    Ok(i) => i + 1,
                    Err(ins) => ins,
                };
                if ins == len {
                    Err(SeekMiss::AboveRange)
                } else {
                    Ok(ins)
                }
            }
        }
    }

    fn insert_at(&mut self, index: usize, key: K, value: V) {
        reserve_one(&mut self.keys);
        reserve_one(&mut self.values);
        self.keys.insert(index, key);
        self.values.insert(index, value);
    }

    /// Removal shifts the tail left; the freed slots are dropped so
    /// no stale values are retained.
    fn remove_at(&mut self, index: usize) -> (K, V) {
        (self.keys.remove(index), self.values.remove(index))
    }

    fn remove_range(&mut self, range: std::ops::Range<usize>) -> usize {
        let count = range.len();
        self.keys.drain(range.clone());
        self.values.drain(range);
        count
    }
}

enum Outcome<R> {
    Changed(R),
    Unchanged(R),
}

/// Shared series state: comparer, version counters, latch-protected
/// storage and the completion broadcaster.
struct SeriesCore<K, V, C> {
    comparer: C,
    version: AtomicU64,
    next_version: AtomicU64,
    storage: RwLock<Storage<K, V>>,
    completer: Arc<CompleterCore>,
}

impl<K, V, C> SeriesCore<K, V, C>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
    C: KeyComparer<K>,
{
    /// The single-writer discipline: take the latch, pre-bump
    /// `next_version`, mutate, publish on change (rolling back the
    /// pre-bump otherwise), notify subscribers after the publish.
    fn write<R>(&self, f: impl FnOnce(&mut Storage<K, V>) -> Result<Outcome<R>>) -> Result<R> {
        let mut guard = self.storage.write();
        if self.completer.is_completed() {
            return Err(Error::Completed);
        }
        let next = self.next_version.fetch_add(1, Ordering::AcqRel) + 1;
        match f(&mut guard) {
            Ok(Outcome::Changed(out)) => {
                self.version.store(next, Ordering::Release);
                drop(guard);
                self.completer.notify(false, false);
                Ok(out)
            }
            Ok(Outcome::Unchanged(out)) => {
                self.next_version
                    .store(self.version.load(Ordering::Acquire), Ordering::Release);
                Ok(out)
            }
            Err(e) => {
                self.next_version
                    .store(self.version.load(Ordering::Acquire), Ordering::Release);
                Err(e)
            }
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Storage<K, V>) -> R) -> R {
        f(&self.storage.read())
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

/// An ordered, versioned, append-aware `K -> V` container.
///
/// The handle is an `Arc` over the shared core: clones are cheap and
/// all of them mutate the same series. Cursors hold the same core and
/// keep it alive.
pub struct SortedMap<K, V, C = NaturalOrder> {
    core: Arc<SeriesCore<K, V, C>>,
}

impl<K, V, C> Clone for SortedMap<K, V, C> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<K, V, C> Debug for SortedMap<K, V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedMap")
            .field("version", &self.core.version.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<K, V> SortedMap<K, V, NaturalOrder>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
    NaturalOrder: KeyComparer<K>,
{
    pub fn new() -> Self {
        Self::with_comparer(NaturalOrder)
    }

    /// An indexed series keeps insertion order instead of key order.
    pub fn new_indexed() -> Self {
        Self::build(NaturalOrder, true)
    }
}

impl<K, V> Default for SortedMap<K, V, NaturalOrder>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
    NaturalOrder: KeyComparer<K>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C> SortedMap<K, V, C>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
    C: KeyComparer<K>,
{
    pub fn with_comparer(comparer: C) -> Self {
        Self::build(comparer, false)
    }

    fn build(comparer: C, indexed: bool) -> Self {
        Self {
            core: Arc::new(SeriesCore {
                comparer,
                version: AtomicU64::new(0),
                next_version: AtomicU64::new(0),
                storage: RwLock::new(Storage {
                    keys: Vec::new(),
                    values: Vec::new(),
                    indexed,
                }),
                completer: Arc::new(CompleterCore::default()),
            }),
        }
    }

    pub fn comparer(&self) -> &C {
        &self.core.comparer
    }

    pub fn len(&self) -> usize {
        self.core.read(|s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn version(&self) -> u64 {
        self.core.version()
    }

    pub fn is_completed(&self) -> bool {
        self.core.completer.is_completed()
    }

    pub fn is_indexed(&self) -> bool {
        self.core.read(|s| s.indexed)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.core
            .read(|s| s.position_eq(&self.core.comparer, key).is_some())
    }

    pub fn index_of_key(&self, key: &K) -> Option<usize> {
        self.core.read(|s| s.position_eq(&self.core.comparer, key))
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.core.read(|s| {
            s.position_eq(&self.core.comparer, key)
                .map(|i| s.values[i].clone())
        })
    }

    /// Point lookup that surfaces a missing key as an error.
    pub fn get_required(&self, key: &K) -> Result<V> {
        self.get(key).ok_or(Error::KeyNotFound)
    }

    pub fn first(&self) -> Option<(K, V)> {
        self.core.read(|s| s.first_pair())
    }

    pub fn last(&self) -> Option<(K, V)> {
        self.core.read(|s| s.last_pair())
    }

    /// Both endpoints from one consistent version window.
    pub fn endpoints(&self) -> Option<((K, V), (K, V))> {
        optimistic::read(&self.core.version, &self.core.next_version, || {
            self.core.read(|s| match (s.first_pair(), s.last_pair()) {
                (Some(first), Some(last)) => Some((first, last)),
                _ => None,
            })
        })
    }

    pub fn cursor(&self) -> SortedMapCursor<K, V, C> {
        SortedMapCursor {
            core: self.core.clone(),
            state: CursorState::Uninitialized,
            index: 0,
            version_seen: 0,
            current: None,
        }
    }

    pub fn iter(&self) -> crate::cursor::CursorIter<SortedMapCursor<K, V, C>> {
        crate::cursor::CursorIter::new(self.cursor())
    }

    /// An independent deep copy of the current content. The copy
    /// starts at version 0, not completed, with no subscribers.
    pub fn fork(&self) -> Self {
        let out = Self::build(self.core.comparer.clone(), self.is_indexed());
        self.core.read(|s| {
            let mut target = out.core.storage.write();
            target.keys = s.keys.clone();
            target.values = s.values.clone();
            target.indexed = s.indexed;
        });
        out
    }

    /// Insert or replace. `Ok(true)` when a new key was inserted.
    pub fn set(&self, key: K, value: V) -> Result<bool> {
        let comparer = self.core.comparer.clone();
        self.core.write(move |s| {
            if s.indexed {
                match s.keys.iter().position(|k| comparer.eq_keys(k, &key)) {
                    Some(i) => {
                        s.values[i] = value;
                        Ok(Outcome::Changed(false))
                    }
                    None => {
                        reserve_one(&mut s.keys);
                        reserve_one(&mut s.values);
                        s.keys.push(key);
                        s.values.push(value);
                        Ok(Outcome::Changed(true))
                    }
                }
            } else {
                match s.search(&comparer, &key) {
                    Ok(i) => {
                        s.values[i] = value;
                        Ok(Outcome::Changed(false))
                    }
                    Err(ins) => {
                        s.insert_at(ins, key, value);
                        Ok(Outcome::Changed(true))
                    }
                }
            }
        })
    }

    /// Insert a new key; an existing key is surfaced as an error.
    pub fn add(&self, key: K, value: V) -> Result<()> {
        let comparer = self.core.comparer.clone();
        self.core.write(move |s| {
            if s.position_eq(&comparer, &key).is_some() {
                return Err(Error::Duplicate);
            }
            if s.indexed {
                reserve_one(&mut s.keys);
                reserve_one(&mut s.values);
                s.keys.push(key);
                s.values.push(value);
            } else {
                let ins = match s.search(&comparer, &key) {
                    Err(ins) => ins,
                    Ok(_) => unreachable!("checked for duplicates above"),
                };
                s.insert_at(ins, key, value);
            }
            Ok(Outcome::Changed(()))
        })
    }

    /// Like `add`, but a duplicate is an `Ok(false)` outcome.
    pub fn try_add(&self, key: K, value: V) -> Result<bool> {
        match self.add(key, value) {
            Ok(()) => Ok(true),
            Err(Error::Duplicate) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Prepend; the key must sort strictly before the current first.
    pub fn add_first(&self, key: K, value: V) -> Result<()> {
        let comparer = self.core.comparer.clone();
        self.core.write(move |s| {
            if let Some(first) = s.keys.first() {
                if !s.indexed && comparer.compare(&key, first) != CmpOrdering::Less {
                    return Err(Error::OutOfOrder);
                }
            }
            s.insert_at(0, key, value);
            Ok(Outcome::Changed(()))
        })
    }

    /// Append; the key must sort strictly after the current last.
    pub fn add_last(&self, key: K, value: V) -> Result<()> {
        let comparer = self.core.comparer.clone();
        self.core.write(move |s| {
            if let Some(last) = s.keys.last() {
                if !s.indexed && comparer.compare(&key, last) != CmpOrdering::Greater {
                    return Err(Error::OutOfOrder);
                }
            }
            reserve_one(&mut s.keys);
            reserve_one(&mut s.values);
            s.keys.push(key);
            s.values.push(value);
            Ok(Outcome::Changed(()))
        })
    }

    /// Out-of-order prepend reported as `Ok(false)`.
    pub fn try_add_first(&self, key: K, value: V) -> Result<bool> {
        match self.add_first(key, value) {
            Ok(()) => Ok(true),
            Err(Error::OutOfOrder) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Out-of-order append reported as `Ok(false)`.
    pub fn try_add_last(&self, key: K, value: V) -> Result<bool> {
        match self.add_last(key, value) {
            Ok(()) => Ok(true),
            Err(Error::OutOfOrder) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove one key; the removed value when it was present.
    pub fn try_remove(&self, key: &K) -> Result<Option<V>> {
        let comparer = self.core.comparer.clone();
        let key = key.clone();
        self.core.write(move |s| match s.position_eq(&comparer, &key) {
            Some(i) => {
                let (_, v) = s.remove_at(i);
                Ok(Outcome::Changed(Some(v)))
            }
            None => Ok(Outcome::Unchanged(None)),
        })
    }

    pub fn try_remove_first(&self) -> Result<Option<(K, V)>> {
        self.core.write(|s| {
            if s.len() == 0 {
                Ok(Outcome::Unchanged(None))
            } else {
                Ok(Outcome::Changed(Some(s.remove_at(0))))
            }
        })
    }

    pub fn try_remove_last(&self) -> Result<Option<(K, V)>> {
        self.core.write(|s| {
            if s.len() == 0 {
                Ok(Outcome::Unchanged(None))
            } else {
                let last = s.len() - 1;
                Ok(Outcome::Changed(Some(s.remove_at(last))))
            }
        })
    }

    /// Bulk removal of the half-range selected by `dir`: `Eq` removes
    /// one key, `Lt`/`Le` everything from the left up to the pivot,
    /// `Gt`/`Ge` everything from the pivot to the right. A pivot that
    /// misses on the removal side removes nothing.
    pub fn try_remove_many(&self, key: &K, dir: Lookup) -> Result<usize> {
        let comparer = self.core.comparer.clone();
        let key = key.clone();
        self.core
            .write(move |s| match s.locate(&comparer, &key, dir) {
                Err(_) => Ok(Outcome::Unchanged(0)),
                Ok(i) => {
                    let range = match dir {
                        Lookup::Eq => i..i + 1,
                        Lookup::Lt | Lookup::Le => 0..i + 1,
                        Lookup::Gt | Lookup::Ge => i..s.len(),
                    };
                    Ok(Outcome::Changed(s.remove_range(range)))
                }
            })
    }

    /// One-way transition to the completed state; releases every
    /// pending waiter. Idempotent.
    pub fn complete(&self) -> Result<()> {
        let _guard = self.core.storage.write();
        self.core.completer.complete();
        Ok(())
    }

    /// Append another series' content after this one, with `option`
    /// arbitrating overlap. Returns the number of elements appended.
    pub fn try_append<S2>(&self, other: &S2, option: AppendOption) -> Result<usize>
    where
        S2: Series<Key = K, Value = V>,
        V: PartialEq,
    {
        let incoming: Vec<(K, V)> = other.iter().collect();
        let comparer = self.core.comparer.clone();
        self.core.write(move |s| {
            if incoming.is_empty() {
                return match option {
                    AppendOption::RequireEqualOverlap => {
                        Err(Error::OverlapViolation("nothing to append and no overlap"))
                    }
                    _ => Ok(Outcome::Unchanged(0)),
                };
            }
            let overlap = match (s.keys.last(), incoming.first()) {
                (Some(last), Some((first, _))) => {
                    comparer.compare(first, last) != CmpOrdering::Greater
                }
                _ => false,
            };
            match option {
                AppendOption::RejectOnOverlap if overlap => {
                    return Err(Error::OverlapViolation(
                        "appended series starts at or before the current last key",
                    ));
                }
                AppendOption::DropOldOverlap if overlap => {
                    let (first, _) = &incoming[0];
                    if let Ok(i) = s.locate(&comparer, first, Lookup::Ge) {
                        s.remove_range(i..s.len());
                    }
                }
                AppendOption::IgnoreEqualOverlap | AppendOption::RequireEqualOverlap => {
                    if !overlap {
                        if option == AppendOption::RequireEqualOverlap {
                            return Err(Error::OverlapViolation(
                                "no overlap with the appended series",
                            ));
                        }
                    } else {
                        // The overlapping range is the intersection
                        // [other.first, min(self.last, other.last)];
                        // both sides are compared over exactly that
                        // window.
                        let last = s.keys.last().cloned().unwrap();
                        let (first, _) = incoming[0].clone();
                        let (incoming_last, _) = incoming[incoming.len() - 1].clone();
                        let own_tail: Vec<(K, V)> = match s.locate(&comparer, &first, Lookup::Ge) {
                            Ok(i) => (i..s.len())
                                .take_while(|&j| {
                                    comparer.compare(&s.keys[j], &incoming_last)
                                        != CmpOrdering::Greater
                                })
                                .map(|j| s.pair_at(j))
                                .collect(),
                            Err(_) => Vec::new(),
                        };
                        let incoming_head: Vec<&(K, V)> = incoming
                            .iter()
                            .take_while(|(k, _)| {
                                comparer.compare(k, &last) != CmpOrdering::Greater
                            })
                            .collect();
                        let equal = own_tail.len() == incoming_head.len()
                            && own_tail.iter().zip(incoming_head.iter()).all(
                                |((ak, av), (bk, bv))| {
                                    comparer.eq_keys(ak, bk) && av == bv
                                },
                            );
                        if !equal {
                            return Err(Error::OverlapViolation(
                                "overlapping range differs element-wise",
                            ));
                        }
                    }
                }
                _ => {}
            }

            let mut appended = 0;
            for (k, v) in incoming {
                let fits = match s.keys.last() {
                    Some(last) => comparer.compare(&k, last) == CmpOrdering::Greater,
                    None => true,
                };
                if fits {
                    reserve_one(&mut s.keys);
                    reserve_one(&mut s.values);
                    s.keys.push(k);
                    s.values.push(v);
                    appended += 1;
                } else if !matches!(
                    option,
                    AppendOption::IgnoreEqualOverlap | AppendOption::RequireEqualOverlap
                ) {
                    return Err(Error::OutOfOrder);
                }
            }
            if appended == 0 {
                Ok(Outcome::Unchanged(0))
            } else {
                Ok(Outcome::Changed(appended))
            }
        })
    }

    pub(crate) fn completer_handle(&self) -> Completer {
        Completer::leaf(self.core.completer.clone())
    }
}

impl<K, V> FromIterator<(K, V)> for SortedMap<K, V, NaturalOrder>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
    NaturalOrder: KeyComparer<K>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let out = Self::new();
        for (k, v) in iter {
            // Duplicates keep the latest value, like repeated `set`.
            let _ = out.set(k, v);
        }
        out
    }
}

impl<K, V, C> Series for SortedMap<K, V, C>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
    C: KeyComparer<K>,
{
    type Key = K;
    type Value = V;
    type Cursor = SortedMapCursor<K, V, C>;

    fn cursor(&self) -> Self::Cursor {
        SortedMap::cursor(self)
    }

    fn version(&self) -> u64 {
        SortedMap::version(self)
    }

    fn is_completed(&self) -> bool {
        SortedMap::is_completed(self)
    }

    fn is_indexed(&self) -> bool {
        SortedMap::is_indexed(self)
    }

    fn first(&self) -> Option<(K, V)> {
        SortedMap::first(self)
    }

    fn last(&self) -> Option<(K, V)> {
        SortedMap::last(self)
    }

    fn get(&self, key: &K) -> Option<V> {
        SortedMap::get(self, key)
    }

    fn is_empty(&self) -> bool {
        SortedMap::is_empty(self)
    }
}

/// Cursor over a [`SortedMap`].
///
/// The cursor caches its current pair, so a positioned cursor stays
/// usable while writers mutate the container: each step revalidates
/// against the published version and relocates by the cached key when
/// the content moved underneath it. A cursor parked past either end
/// keeps the last pair it observed as a resume anchor, which is what
/// lets a live tail pick up appended elements.
pub struct SortedMapCursor<K, V, C = NaturalOrder> {
    core: Arc<SeriesCore<K, V, C>>,
    state: CursorState,
    index: usize,
    version_seen: u64,
    current: Option<(K, V)>,
}

impl<K: Clone, V: Clone, C> Clone for SortedMapCursor<K, V, C> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            state: self.state,
            index: self.index,
            version_seen: self.version_seen,
            current: self.current.clone(),
        }
    }
}

impl<K, V, C> Debug for SortedMapCursor<K, V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedMapCursor")
            .field("state", &self.state)
            .field("index", &self.index)
            .field("version_seen", &self.version_seen)
            .finish_non_exhaustive()
    }
}

enum Step<K, V> {
    Position(usize, (K, V)),
    Park,
}

impl<K, V, C> SortedMapCursor<K, V, C>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
    C: KeyComparer<K>,
{
    fn position(&mut self, index: usize, pair: (K, V), version: u64) -> bool {
        self.state = CursorState::Positioned;
        self.index = index;
        self.current = Some(pair);
        self.version_seen = version;
        true
    }

    /// Parks past an end. The cached pair is retained as the resume
    /// anchor; `anchor` replaces it only when explicitly provided
    /// (lookup misses anchor near the requested key).
    fn park(&mut self, forward: bool, anchor: Option<(K, V)>, version: u64) -> bool {
        self.state = if forward {
            CursorState::AfterEnd
        } else {
            CursorState::BeforeStart
        };
        self.version_seen = version;
        if anchor.is_some() {
            self.current = anchor;
        }
        false
    }

    fn step(&mut self, forward: bool) -> bool {
        let (step, version) = {
            let g = self.core.storage.read();
            let version = self.core.version();
            let len = g.len();
            let target = match self.state {
                CursorState::Uninitialized => {
                    if forward {
                        Some(0)
                    } else {
                        len.checked_sub(1)
                    }
                }
                CursorState::BeforeStart => {
                    if forward {
                        Some(0)
                    } else if version != self.version_seen {
                        // The source changed while parked; resume
                        // below the anchored key.
                        match &self.current {
                            Some((key, _)) => g.locate(&self.core.comparer, key, Lookup::Lt).ok(),
                            None => None,
                        }
                    } else {
                        None
                    }
                }
                CursorState::AfterEnd => {
                    if !forward {
                        len.checked_sub(1)
                    } else if version != self.version_seen {
                        match &self.current {
                            Some((key, _)) => g.locate(&self.core.comparer, key, Lookup::Gt).ok(),
                            None => Some(0),
                        }
                    } else {
                        None
                    }
                }
                CursorState::Positioned => {
                    if version == self.version_seen {
                        if forward {
                            Some(self.index + 1)
                        } else {
                            self.index.checked_sub(1)
                        }
                    } else {
                        let key = &self.current.as_ref().unwrap().0;
                        let dir = if forward { Lookup::Gt } else { Lookup::Lt };
                        g.locate(&self.core.comparer, key, dir).ok()
                    }
                }
            };
            match target {
                Some(i) if i < len => (Step::Position(i, g.pair_at(i)), version),
                _ => (Step::Park, version),
            }
        };
        match step {
            Step::Position(i, pair) => self.position(i, pair, version),
            Step::Park => self.park(forward, None, version),
        }
    }
}

impl<K, V, C> SeriesCursor for SortedMapCursor<K, V, C>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
    C: KeyComparer<K>,
{
    type Key = K;
    type Value = V;
    type Comparer = C;

    fn state(&self) -> CursorState {
        self.state
    }

    fn comparer(&self) -> &C {
        &self.core.comparer
    }

    fn move_first(&mut self) -> bool {
        let (decision, version) = {
            let g = self.core.storage.read();
            let version = self.core.version();
            if g.len() == 0 {
                (None, version)
            } else {
                (Some((0, g.pair_at(0))), version)
            }
        };
        match decision {
            Some((i, pair)) => self.position(i, pair, version),
            None => {
                self.current = None;
                self.park(false, None, version)
            }
        }
    }

    fn move_last(&mut self) -> bool {
        let (decision, version) = {
            let g = self.core.storage.read();
            let version = self.core.version();
            if g.len() == 0 {
                (None, version)
            } else {
                let last = g.len() - 1;
                (Some((last, g.pair_at(last))), version)
            }
        };
        match decision {
            Some((i, pair)) => self.position(i, pair, version),
            None => {
                self.current = None;
                self.park(true, None, version)
            }
        }
    }

    fn move_next(&mut self) -> bool {
        self.step(true)
    }

    fn move_previous(&mut self) -> bool {
        self.step(false)
    }

    fn move_at(&mut self, key: &K, dir: Lookup) -> bool {
        let (decision, version) = {
            let g = self.core.storage.read();
            let version = self.core.version();
            match g.locate(&self.core.comparer, key, dir) {
                Ok(i) => (Ok((i, g.pair_at(i))), version),
                Err(miss) => {
                    // Anchor near the requested key so that a later
                    // directional move resumes from the gap.
                    let anchor = g
                        .locate(&self.core.comparer, key, Lookup::Le)
                        .ok()
                        .map(|i| g.pair_at(i));
                    (Err((miss, anchor)), version)
                }
            }
        };
        match decision {
            Ok((i, pair)) => self.position(i, pair, version),
            Err((miss, anchor)) => {
                let forward = match miss {
                    SeekMiss::BelowRange | SeekMiss::Empty => false,
                    SeekMiss::AboveRange => true,
                    SeekMiss::NotFound => dir.is_forward() || dir == Lookup::Eq,
                };
                self.park(forward, anchor, version)
            }
        }
    }

    fn value_at(&self, key: &K) -> Option<V> {
        self.core.read(|s| {
            s.position_eq(&self.core.comparer, key)
                .map(|i| s.values[i].clone())
        })
    }

    fn current_key(&self) -> Option<&K> {
        if self.state == CursorState::Positioned {
            self.current.as_ref().map(|(k, _)| k)
        } else {
            None
        }
    }

    fn current_value(&self) -> Option<V> {
        if self.state == CursorState::Positioned {
            self.current.as_ref().map(|(_, v)| v.clone())
        } else {
            None
        }
    }

    fn initialize(&self) -> Self {
        Self {
            core: self.core.clone(),
            state: CursorState::Uninitialized,
            index: 0,
            version_seen: 0,
            current: None,
        }
    }

    fn completer(&self) -> Option<Completer> {
        Some(Completer::leaf(self.core.completer.clone()))
    }

    fn version(&self) -> u64 {
        self.core.version()
    }
}
