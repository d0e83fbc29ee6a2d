//! Ordered, versioned, reactive series with a lazy cursor algebra.
//!
//! A series maps a totally ordered key to a value. It can be a
//! materialized [`SortedMap`], a lazy view derived through the cursor
//! combinators (map, filter, arithmetic, zip), or a facade over
//! remotely stored chunks. Consumers drive navigation through
//! cursors; a live series additionally supports an async tail that
//! waits for new elements instead of reporting the end.
//!
//! ```
//! use rill::{CursorIter, CursorOps, SortedMap};
//!
//! let prices = SortedMap::<u64, i64>::new();
//! prices.set(1, 10).unwrap();
//! prices.set(2, 20).unwrap();
//!
//! let shifted: Vec<_> = CursorIter::new(prices.cursor().add(5)).collect();
//! assert_eq!(shifted, vec![(1, 15), (2, 25)]);
//! ```

pub mod comparer;
pub mod completion;
pub mod cursor;
pub mod error;
pub mod remote;
pub mod series;

mod optimistic;

pub use comparer::{AffineComparer, FnComparer, KeyComparer, NaturalOrder};
pub use completion::{
    AsyncCursor, CancellationToken, Completer, Subscription, SubscriptionHandle,
};
pub use cursor::{
    CompareCursor, CursorIter, CursorOps, CursorState, FilterCursor, Lookup, MapCursor, OpCursor,
    RepeatCursor, SeriesCursor, ZipCursor, ZipMapCursor,
};
pub use error::{Error, Result};
pub use remote::{ChunkKey, ChunkLock, ChunkStore, MapId, MemoryChunkStore, RemoteChunksSeries};
pub use series::{AppendOption, CursorSeries, Series, SortedMap, SortedMapCursor};
