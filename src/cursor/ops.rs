//! Named builder methods for composing lazy cursor graphs, plus the
//! scalar arithmetic and comparison cursors they produce.

use crate::{
    completion::Completer,
    cursor::{
        filter::FilterCursor, map::MapCursor, repeat::RepeatCursor, zip::ZipCursor,
        zip::ZipMapCursor, CursorState, Lookup, SeriesCursor,
    },
    error::Result,
    series::CursorSeries,
};
use std::ops::{Add, Div, Mul, Sub};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Applies `value op constant` (or the reversed form) to the inner
/// cursor's values. Keys and order are untouched.
#[derive(Clone, Debug)]
pub struct OpCursor<Cu: SeriesCursor> {
    inner: Cu,
    op: ArithOp,
    operand: Cu::Value,
    reversed: bool,
}

impl<Cu> OpCursor<Cu>
where
    Cu: SeriesCursor,
    Cu::Value: Add<Output = Cu::Value>
        + Sub<Output = Cu::Value>
        + Mul<Output = Cu::Value>
        + Div<Output = Cu::Value>
        + Copy,
{
    fn new(inner: Cu, op: ArithOp, operand: Cu::Value, reversed: bool) -> Self {
        Self {
            inner,
            op,
            operand,
            reversed,
        }
    }

    fn apply(&self, v: Cu::Value) -> Cu::Value {
        match (self.op, self.reversed) {
            (ArithOp::Add, _) => v + self.operand,
            (ArithOp::Sub, false) => v - self.operand,
            (ArithOp::Sub, true) => self.operand - v,
            (ArithOp::Mul, _) => v * self.operand,
            (ArithOp::Div, false) => v / self.operand,
            (ArithOp::Div, true) => self.operand / v,
        }
    }
}

impl<Cu> SeriesCursor for OpCursor<Cu>
where
    Cu: SeriesCursor,
    Cu::Value: Add<Output = Cu::Value>
        + Sub<Output = Cu::Value>
        + Mul<Output = Cu::Value>
        + Div<Output = Cu::Value>
        + Copy,
{
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
        self.inner.move_at(key, dir)
    }

    fn value_at(&self, key: &Self::Key) -> Option<Self::Value> {
        self.inner.value_at(key).map(|v| self.apply(v))
    }

    fn current_key(&self) -> Option<&Self::Key> {
        self.inner.current_key()
    }

    fn current_value(&self) -> Option<Self::Value> {
        self.inner.current_value().map(|v| self.apply(v))
    }

    fn is_continuous(&self) -> bool {
        self.inner.is_continuous()
    }

    fn initialize(&self) -> Self {
        Self {
            inner: self.inner.initialize(),
            op: self.op,
            operand: self.operand,
            reversed: self.reversed,
        }
    }

    fn completer(&self) -> Option<Completer> {
        self.inner.completer()
    }

    fn version(&self) -> u64 {
        self.inner.version()
    }
}

/// Comparison against a constant; yields `bool` values in key order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Clone, Debug)]
pub struct CompareCursor<Cu: SeriesCursor> {
    inner: Cu,
    op: CmpOp,
    operand: Cu::Value,
}

impl<Cu> CompareCursor<Cu>
where
    Cu: SeriesCursor,
    Cu::Value: PartialOrd,
{
    fn new(inner: Cu, op: CmpOp, operand: Cu::Value) -> Self {
        Self { inner, op, operand }
    }

    fn apply(&self, v: &Cu::Value) -> bool {
        match self.op {
            CmpOp::Lt => *v < self.operand,
            CmpOp::Le => *v <= self.operand,
            CmpOp::Gt => *v > self.operand,
            CmpOp::Ge => *v >= self.operand,
            CmpOp::Eq => *v == self.operand,
            CmpOp::Ne => *v != self.operand,
        }
    }
}

impl<Cu> SeriesCursor for CompareCursor<Cu>
where
    Cu: SeriesCursor,
    Cu::Value: PartialOrd,
{
    type Key = Cu::Key;
    type Value = bool;
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
        self.inner.value_at(key).map(|v| self.apply(&v))
    }

    fn current_key(&self) -> Option<&Self::Key> {
        self.inner.current_key()
    }

    fn current_value(&self) -> Option<Self::Value> {
        self.inner.current_value().map(|v| self.apply(&v))
    }

    fn is_continuous(&self) -> bool {
        self.inner.is_continuous()
    }

    fn initialize(&self) -> Self {
        Self {
            inner: self.inner.initialize(),
            op: self.op,
            operand: self.operand.clone(),
        }
    }

    fn completer(&self) -> Option<Completer> {
        self.inner.completer()
    }

    fn version(&self) -> u64 {
        self.inner.version()
    }
}

/// Builder methods that turn a cursor into a lazy derived view.
/// Everything here returns a concrete composed cursor type, so
/// chained pipelines monomorphize.
pub trait CursorOps: SeriesCursor + Sized {
    fn map_values<V2, F>(self, f: F) -> MapCursor<Self, F>
    where
        F: Fn(&Self::Key, Self::Value) -> V2 + Clone + Send,
        V2: Clone + Send,
    {
        MapCursor::new(self, f)
    }

    fn filter_values<P>(self, predicate: P) -> FilterCursor<Self, P>
    where
        P: Fn(&Self::Key, &Self::Value) -> bool + Clone + Send,
    {
        FilterCursor::new(self, predicate)
    }

    /// Continuous view repeating the last value at or before any
    /// requested key.
    fn repeat(self) -> RepeatCursor<Self> {
        RepeatCursor::new(self)
    }

    fn zip<R>(self, right: R) -> Result<ZipCursor<Self, R>>
    where
        R: SeriesCursor<Key = Self::Key, Comparer = Self::Comparer>,
    {
        ZipCursor::new(self, right)
    }

    fn zip_map<R, F, V2>(self, right: R, f: F) -> Result<ZipMapCursor<Self, R, F>>
    where
        R: SeriesCursor<Key = Self::Key, Comparer = Self::Comparer>,
        F: Fn(&Self::Key, Self::Value, R::Value) -> V2 + Clone + Send,
        V2: Clone + Send,
    {
        ZipMapCursor::new(self, right, f)
    }

    /// Wrap as a lazily evaluated series; this cursor becomes the
    /// template that `Series::cursor` initializes copies of.
    fn into_series(self) -> CursorSeries<Self> {
        CursorSeries::new(self)
    }

    fn add(self, constant: Self::Value) -> OpCursor<Self>
    where
        Self::Value: Add<Output = Self::Value>
            + Sub<Output = Self::Value>
            + Mul<Output = Self::Value>
            + Div<Output = Self::Value>
            + Copy,
    {
        OpCursor::new(self, ArithOp::Add, constant, false)
    }

    fn sub(self, constant: Self::Value) -> OpCursor<Self>
    where
        Self::Value: Add<Output = Self::Value>
            + Sub<Output = Self::Value>
            + Mul<Output = Self::Value>
            + Div<Output = Self::Value>
            + Copy,
    {
        OpCursor::new(self, ArithOp::Sub, constant, false)
    }

    /// `constant - value`.
    fn rev_sub(self, constant: Self::Value) -> OpCursor<Self>
    where
        Self::Value: Add<Output = Self::Value>
            + Sub<Output = Self::Value>
            + Mul<Output = Self::Value>
            + Div<Output = Self::Value>
            + Copy,
    {
        OpCursor::new(self, ArithOp::Sub, constant, true)
    }

    fn mul(self, constant: Self::Value) -> OpCursor<Self>
    where
        Self::Value: Add<Output = Self::Value>
            + Sub<Output = Self::Value>
            + Mul<Output = Self::Value>
            + Div<Output = Self::Value>
            + Copy,
    {
        OpCursor::new(self, ArithOp::Mul, constant, false)
    }

    fn div(self, constant: Self::Value) -> OpCursor<Self>
    where
        Self::Value: Add<Output = Self::Value>
            + Sub<Output = Self::Value>
            + Mul<Output = Self::Value>
            + Div<Output = Self::Value>
            + Copy,
    {
        OpCursor::new(self, ArithOp::Div, constant, false)
    }

    /// `constant / value`.
    fn rev_div(self, constant: Self::Value) -> OpCursor<Self>
    where
        Self::Value: Add<Output = Self::Value>
            + Sub<Output = Self::Value>
            + Mul<Output = Self::Value>
            + Div<Output = Self::Value>
            + Copy,
    {
        OpCursor::new(self, ArithOp::Div, constant, true)
    }

    fn lt(self, constant: Self::Value) -> CompareCursor<Self>
    where
        Self::Value: PartialOrd,
    {
        CompareCursor::new(self, CmpOp::Lt, constant)
    }

    fn le(self, constant: Self::Value) -> CompareCursor<Self>
    where
        Self::Value: PartialOrd,
    {
        CompareCursor::new(self, CmpOp::Le, constant)
    }

    fn gt(self, constant: Self::Value) -> CompareCursor<Self>
    where
        Self::Value: PartialOrd,
    {
        CompareCursor::new(self, CmpOp::Gt, constant)
    }

    fn ge(self, constant: Self::Value) -> CompareCursor<Self>
    where
        Self::Value: PartialOrd,
    {
        CompareCursor::new(self, CmpOp::Ge, constant)
    }

    fn eq_value(self, constant: Self::Value) -> CompareCursor<Self>
    where
        Self::Value: PartialOrd,
    {
        CompareCursor::new(self, CmpOp::Eq, constant)
    }

    fn ne_value(self, constant: Self::Value) -> CompareCursor<Self>
    where
        Self::Value: PartialOrd,
    {
        CompareCursor::new(self, CmpOp::Ne, constant)
    }
}

impl<Cu: SeriesCursor> CursorOps for Cu {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cursor::CursorIter, series::SortedMap};

    fn base() -> SortedMap<u64, i64> {
        let s = SortedMap::new();
        for (k, v) in [(1, 10), (2, 20), (3, 30)] {
            s.set(k, v).unwrap();
        }
        s
    }

    #[test]
    fn scalar_add_leaves_source_untouched() {
        let s = base();
        let shifted: Vec<_> = CursorIter::new(s.cursor().add(5)).collect();
        assert_eq!(shifted, vec![(1, 15), (2, 25), (3, 35)]);

        // Source unchanged; derived version tracks the source.
        assert_eq!(s.get(&1), Some(10));
        assert_eq!(s.cursor().add(5).version(), s.version());
    }

    #[test]
    fn reversed_forms() {
        let s = base();
        let out: Vec<_> = CursorIter::new(s.cursor().rev_sub(100)).collect();
        assert_eq!(out, vec![(1, 90), (2, 80), (3, 70)]);

        let out: Vec<_> = CursorIter::new(s.cursor().rev_div(60)).collect();
        assert_eq!(out, vec![(1, 6), (2, 3), (3, 2)]);
    }

    #[test]
    fn chained_arithmetic() {
        let s = base();
        let out: Vec<_> = CursorIter::new(s.cursor().mul(2).sub(5)).collect();
        assert_eq!(out, vec![(1, 15), (2, 35), (3, 55)]);
    }

    #[test]
    fn comparison_yields_bools_in_key_order() {
        let s = base();
        let out: Vec<_> = CursorIter::new(s.cursor().gt(15)).collect();
        assert_eq!(out, vec![(1, false), (2, true), (3, true)]);

        let out: Vec<_> = CursorIter::new(s.cursor().eq_value(20)).collect();
        assert_eq!(out, vec![(1, false), (2, true), (3, false)]);
    }

    #[test]
    fn point_lookup_through_op() {
        let s = base();
        let c = s.cursor().add(1);
        assert_eq!(c.value_at(&2), Some(21));
        assert_eq!(c.value_at(&9), None);
    }
}
