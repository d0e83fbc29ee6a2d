//! The cursor contract and the combinators built on top of it.
//!
//! A cursor is a navigable position over a series. Concrete cursor
//! types are carried by value through the combinators so that
//! composed navigation monomorphizes; the `SeriesCursor` trait is the
//! uniform surface at API boundaries.

pub mod filter;
pub mod map;
pub mod ops;
pub mod repeat;
pub mod zip;

pub use filter::FilterCursor;
pub use map::MapCursor;
pub use ops::{CmpOp, CompareCursor, CursorOps, OpCursor};
pub use repeat::RepeatCursor;
pub use zip::{ZipCursor, ZipMapCursor};

use crate::{comparer::KeyComparer, completion::Completer};

/// How `move_at` resolves a lookup, including what to do on a miss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// Exactly the requested key.
    Eq,
    /// The largest key strictly less than the requested one.
    Lt,
    /// The largest key less than or equal to the requested one.
    Le,
    /// The smallest key strictly greater than the requested one.
    Gt,
    /// The smallest key greater than or equal to the requested one.
    Ge,
}

impl Lookup {
    pub(crate) fn is_forward(self) -> bool {
        matches!(self, Lookup::Gt | Lookup::Ge)
    }
}

/// Navigation state of a cursor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CursorState {
    #[default]
    Uninitialized,
    BeforeStart,
    Positioned,
    AfterEnd,
}

/// Refined reason for a failed lookup; consumed by ranged removal to
/// decide whether the pivot selects anything at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SeekMiss {
    /// The container holds no elements.
    Empty,
    /// Every key is greater than what the lookup can accept.
    BelowRange,
    /// Every key is smaller than what the lookup can accept.
    AboveRange,
    /// The requested key falls inside the range but is absent.
    NotFound,
}

/// A navigable position over an ordered series.
///
/// All navigation is synchronous; waiting for a live series to grow
/// is layered on separately by [`crate::AsyncCursor`]. Cursors are
/// cheap to clone and a clone is an independent position over the
/// same logical source.
pub trait SeriesCursor: Clone + Send {
    type Key: Clone + Send;
    type Value: Clone + Send;
    type Comparer: KeyComparer<Self::Key>;

    fn state(&self) -> CursorState;
    fn comparer(&self) -> &Self::Comparer;

    /// Move to the first element. `false` leaves the cursor before
    /// the start of an empty series.
    fn move_first(&mut self) -> bool;
    /// Move to the last element.
    fn move_last(&mut self) -> bool;
    /// Move forward. After the source grew, a cursor parked after the
    /// end resumes from the last key it observed.
    fn move_next(&mut self) -> bool;
    /// Move backward.
    fn move_previous(&mut self) -> bool;
    /// Position at the element selected by `key` and `dir`. `false`
    /// leaves the cursor before the start or after the end, depending
    /// on which side of the range the miss fell on.
    fn move_at(&mut self, key: &Self::Key, dir: Lookup) -> bool;

    /// Point lookup that does not move the cursor. Continuous cursors
    /// answer for any key, discrete ones only for stored keys.
    fn value_at(&self, key: &Self::Key) -> Option<Self::Value>;

    /// The current key; `Some` only when positioned.
    fn current_key(&self) -> Option<&Self::Key>;
    /// The current value; computed lazily by derived cursors.
    fn current_value(&self) -> Option<Self::Value>;
    fn current(&self) -> Option<(Self::Key, Self::Value)> {
        Some((self.current_key()?.clone(), self.current_value()?))
    }

    /// Whether this cursor yields a value for every key asked of it,
    /// not only at its discrete positions. Affects zip semantics.
    fn is_continuous(&self) -> bool {
        false
    }

    /// A fresh uninitialized cursor over the same source. Derived
    /// series store a template cursor and spin up copies on demand.
    fn initialize(&self) -> Self;

    /// Handle to the source's completion broadcaster, when the source
    /// can go live. `None` means the source never changes under this
    /// cursor.
    fn completer(&self) -> Option<Completer>;

    /// The source version observed through this cursor. Derived
    /// cursors report the version of the most recently mutated input.
    fn version(&self) -> u64;
}

/// Drains a cursor forward; handy in tests and for materializing
/// small series.
#[derive(Debug)]
pub struct CursorIter<Cu> {
    cursor: Cu,
}

impl<Cu> CursorIter<Cu> {
    pub fn new(cursor: Cu) -> Self {
        Self { cursor }
    }
}

impl<Cu: SeriesCursor> Iterator for CursorIter<Cu> {
    type Item = (Cu::Key, Cu::Value);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.move_next() {
            self.cursor.current()
        } else {
            None
        }
    }
}
