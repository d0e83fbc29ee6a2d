//! Reactive completion: how a consumer parked at the end of a live
//! series learns that more data arrived, or that no more ever will.
//!
//! A series owns a broadcast core; consumers register weak
//! subscriptions against it. Writers notify after publishing a new
//! version, so a waiter that wakes and retries observes content at
//! least as new as the write that woke it. Wakeups are dispatched
//! through `tokio::sync::Notify`, which hands the resumed task to the
//! runtime's worker pool.

use crate::{
    cursor::SeriesCursor,
    error::{Error, Result},
};
use async_stream::try_stream;
use futures_core::stream::BoxStream;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Weak,
};
use tokio::sync::Notify;
pub use tokio_util::sync::CancellationToken;
use tracing::trace;

/// One consumer's registration against a completion broadcaster.
///
/// Carries a request counter: a subscriber asks for N further
/// notifications and a notify consumes one. A quiesced subscriber
/// (zero requests) is only woken by a forced notification, which is
/// what completion uses.
#[derive(Debug, Default)]
pub struct Subscription {
    requests: AtomicU64,
    notify: Notify,
}

impl Subscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for one more notification.
    pub fn request_one(&self) {
        self.requests.fetch_add(1, Ordering::AcqRel);
    }

    /// Withdraw a pending notification request, e.g. on cancellation.
    pub fn cancel_request(&self) {
        let mut cur = self.requests.load(Ordering::Acquire);
        while cur > 0 {
            match self.requests.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(seen) => cur = seen,
            }
        }
    }

    /// Resolves when the subscription is next woken.
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    /// Wake the subscriber. A regular wake consumes one request and
    /// is a no-op for a quiesced subscriber; `force` (completion) and
    /// `cancel` (broadcaster teardown) wake unconditionally.
    pub fn try_complete(&self, force: bool, cancel: bool) {
        if force || cancel {
            self.notify.notify_one();
            return;
        }
        let mut cur = self.requests.load(Ordering::Acquire);
        while cur > 0 {
            match self.requests.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.notify.notify_one();
                    return;
                }
                Err(seen) => cur = seen,
            }
        }
    }
}

/// Zero, one or many weak subscribers. The one-subscriber shape keeps
/// the common notify path a single upgrade.
#[derive(Debug, Default)]
enum SubscriberSet {
    #[default]
    Empty,
    One(Weak<Subscription>),
    Many(Vec<Weak<Subscription>>),
}

/// Broadcast core owned by one series.
#[derive(Debug, Default)]
pub(crate) struct CompleterCore {
    completed: AtomicBool,
    subscribers: Mutex<SubscriberSet>,
}

impl CompleterCore {
    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// One-way transition; wakes every subscriber with force set.
    pub(crate) fn complete(&self) {
        if !self.completed.swap(true, Ordering::AcqRel) {
            trace!("series completed, releasing waiters");
            self.notify(true, false);
        }
    }

    pub(crate) fn subscribe(&self, sub: &Arc<Subscription>) {
        let weak = Arc::downgrade(sub);
        let mut set = self.subscribers.lock();
        *set = match std::mem::take(&mut *set) {
            SubscriberSet::Empty => SubscriberSet::One(weak),
            SubscriberSet::One(prev) => {
                if prev.strong_count() == 0 {
                    SubscriberSet::One(weak)
                } else {
                    SubscriberSet::Many(vec![prev, weak])
                }
            }
            SubscriberSet::Many(mut subs) => {
                subs.retain(|w| w.strong_count() > 0);
                subs.push(weak);
                SubscriberSet::Many(subs)
            }
        };
    }

    pub(crate) fn unsubscribe(&self, sub: &Arc<Subscription>) {
        let mut set = self.subscribers.lock();
        *set = match std::mem::take(&mut *set) {
            SubscriberSet::One(w) if !w.ptr_eq(&Arc::downgrade(sub)) => SubscriberSet::One(w),
            SubscriberSet::One(_) | SubscriberSet::Empty => SubscriberSet::Empty,
            SubscriberSet::Many(mut subs) => {
                subs.retain(|w| w.strong_count() > 0 && !w.ptr_eq(&Arc::downgrade(sub)));
                match subs.len() {
                    0 => SubscriberSet::Empty,
                    1 => SubscriberSet::One(subs.pop().expect("len checked")),
                    _ => SubscriberSet::Many(subs),
                }
            }
        };
    }

    /// Wake current subscribers; dead weak registrations are pruned
    /// on the way through.
    pub(crate) fn notify(&self, force: bool, cancel: bool) {
        let mut set = self.subscribers.lock();
        match &mut *set {
            SubscriberSet::Empty => {}
            SubscriberSet::One(w) => match w.upgrade() {
                Some(sub) => sub.try_complete(force, cancel),
                None => *set = SubscriberSet::Empty,
            },
            SubscriberSet::Many(subs) => {
                subs.retain(|w| match w.upgrade() {
                    Some(sub) => {
                        sub.try_complete(force, cancel);
                        true
                    }
                    None => false,
                });
            }
        }
    }
}

/// Cloneable handle to the completion broadcaster(s) behind a cursor.
///
/// Most cursors sit over a single source; a zip over two live
/// sources carries both legs and counts as completed only when every
/// leg is.
#[derive(Clone, Debug)]
pub struct Completer {
    inner: CompleterInner,
}

#[derive(Clone, Debug)]
enum CompleterInner {
    Leaf(Arc<CompleterCore>),
    Pair(Box<(Completer, Completer)>),
}

impl Completer {
    pub(crate) fn leaf(core: Arc<CompleterCore>) -> Self {
        Self {
            inner: CompleterInner::Leaf(core),
        }
    }

    /// Merge the completers of two zipped inputs.
    pub fn pair(a: Completer, b: Completer) -> Self {
        Self {
            inner: CompleterInner::Pair(Box::new((a, b))),
        }
    }

    pub fn is_completed(&self) -> bool {
        match &self.inner {
            CompleterInner::Leaf(core) => core.is_completed(),
            CompleterInner::Pair(legs) => legs.0.is_completed() && legs.1.is_completed(),
        }
    }

    /// Register `sub` with every leg; the returned handle unregisters
    /// on drop.
    pub fn subscribe(&self, sub: &Arc<Subscription>) -> SubscriptionHandle {
        let mut handle = SubscriptionHandle {
            registrations: Vec::new(),
        };
        self.register(sub, &mut handle);
        handle
    }

    fn register(&self, sub: &Arc<Subscription>, handle: &mut SubscriptionHandle) {
        match &self.inner {
            CompleterInner::Leaf(core) => {
                core.subscribe(sub);
                handle.registrations.push((core.clone(), sub.clone()));
            }
            CompleterInner::Pair(legs) => {
                legs.0.register(sub, handle);
                legs.1.register(sub, handle);
            }
        }
    }
}

/// Keeps a subscription registered; dropping it unsubscribes from
/// every leg it was registered with.
#[derive(Debug)]
pub struct SubscriptionHandle {
    registrations: Vec<(Arc<CompleterCore>, Arc<Subscription>)>,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        for (core, sub) in &self.registrations {
            core.unsubscribe(sub);
        }
    }
}

struct LiveSubscription {
    subscription: Arc<Subscription>,
    _handle: SubscriptionHandle,
}

/// A cursor that awaits further updates instead of reporting the end
/// of a live series.
///
/// Wraps any [`SeriesCursor`]. When the underlying source exposes no
/// completion broadcaster it is treated as frozen and the async walk
/// simply drains it.
pub struct AsyncCursor<Cu: SeriesCursor> {
    cursor: Cu,
    live: Option<LiveSubscription>,
}

impl<Cu: SeriesCursor> AsyncCursor<Cu> {
    pub fn new(cursor: Cu) -> Self {
        Self { cursor, live: None }
    }

    pub fn cursor(&self) -> &Cu {
        &self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut Cu {
        &mut self.cursor
    }

    pub fn into_inner(self) -> Cu {
        self.cursor
    }

    /// Advance to the next element, suspending while the source has
    /// nothing new.
    ///
    /// Resolves `Ok(true)` positioned on the next element, `Ok(false)`
    /// when the source is completed and exhausted, and
    /// `Err(Error::Cancelled)` when `cancel` fires first.
    pub async fn try_move_next(&mut self, cancel: &CancellationToken) -> Result<bool> {
        if self.cursor.move_next() {
            return Ok(true);
        }

        let completer = match self.cursor.completer() {
            Some(completer) => completer,
            None => return Ok(false),
        };
        if completer.is_completed() {
            return Ok(self.cursor.move_next());
        }

        let subscription = {
            let live = self.live.get_or_insert_with(|| {
                let subscription = Arc::new(Subscription::new());
                trace!("registering live subscription");
                let handle = completer.subscribe(&subscription);
                LiveSubscription {
                    subscription,
                    _handle: handle,
                }
            });
            live.subscription.clone()
        };

        loop {
            let notified = subscription.notified();
            subscription.request_one();

            // An update may have been published between the failed
            // attempt and the request registration.
            if self.cursor.move_next() {
                return Ok(true);
            }
            if completer.is_completed() {
                return Ok(self.cursor.move_next());
            }

            tokio::select! {
                _ = notified => {
                    if self.cursor.move_next() {
                        return Ok(true);
                    }
                    if completer.is_completed() {
                        return Ok(self.cursor.move_next());
                    }
                }
                _ = cancel.cancelled() => {
                    subscription.cancel_request();
                    return Err(Error::Cancelled);
                }
            }
        }
    }

    /// `try_move_next` fused with the current pair.
    pub async fn next_pair(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<(Cu::Key, Cu::Value)>> {
        if self.try_move_next(cancel).await? {
            Ok(self.cursor.current())
        } else {
            Ok(None)
        }
    }

    /// The live walk as a stream of pairs; ends when the source
    /// completes, errors when cancelled.
    pub fn into_stream(
        self,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<(Cu::Key, Cu::Value)>>
    where
        Cu: 'static,
    {
        Box::pin(try_stream! {
            let mut this = self;
            while this.try_move_next(&cancel).await? {
                let pair = this
                    .cursor
                    .current()
                    .expect("cursor positioned after successful move");
                yield pair;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cursor::CursorOps, series::SortedMap};
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn live_tail_sees_writes_then_completion() {
        let series = SortedMap::<u64, String>::new();
        let mut tail = AsyncCursor::new(series.cursor());
        let cancel = CancellationToken::new();

        let writer = {
            let series = series.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                series.set(1, "x".to_string()).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                series.set(2, "y".to_string()).unwrap();
                series.complete().unwrap();
            })
        };

        let first = timeout(Duration::from_secs(5), tail.try_move_next(&cancel))
            .await
            .unwrap()
            .unwrap();
        assert!(first);
        assert_eq!(tail.cursor().current_key(), Some(&1));

        let second = timeout(Duration::from_secs(5), tail.try_move_next(&cancel))
            .await
            .unwrap()
            .unwrap();
        assert!(second);
        assert_eq!(tail.cursor().current_key(), Some(&2));

        let done = timeout(Duration::from_secs(5), tail.try_move_next(&cancel))
            .await
            .unwrap()
            .unwrap();
        assert!(!done);

        writer.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_resolves_promptly() {
        let series = SortedMap::<u64, u64>::new();
        let mut tail = AsyncCursor::new(series.cursor());
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let out = timeout(Duration::from_secs(5), tail.try_move_next(&cancel))
            .await
            .unwrap();
        assert!(matches!(out, Err(Error::Cancelled)));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn completed_series_drains_without_waiting() {
        let series = SortedMap::<u64, u64>::new();
        series.set(1, 10).unwrap();
        series.complete().unwrap();

        let mut tail = AsyncCursor::new(series.cursor());
        let cancel = CancellationToken::new();
        assert!(tail.try_move_next(&cancel).await.unwrap());
        assert!(!tail.try_move_next(&cancel).await.unwrap());
    }

    #[tokio::test]
    async fn stream_adapter_yields_pairs_until_completion() {
        let series = SortedMap::<u64, u64>::new();
        let writer = {
            let series = series.clone();
            tokio::spawn(async move {
                for k in 1..=3 {
                    series.set(k, k * 10).unwrap();
                }
                series.complete().unwrap();
            })
        };

        let stream = AsyncCursor::new(series.cursor()).into_stream(CancellationToken::new());
        let pairs: Vec<_> = timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
            .await
            .unwrap()
            .into_iter()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(pairs, vec![(1, 10), (2, 20), (3, 30)]);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn live_tail_through_a_derived_cursor() {
        let series = SortedMap::<u64, u64>::new();
        let mut tail = AsyncCursor::new(series.cursor().map_values(|_, v| v + 1));
        let cancel = CancellationToken::new();

        let writer = {
            let series = series.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                series.set(7, 70).unwrap();
                series.complete().unwrap();
            })
        };

        assert!(timeout(Duration::from_secs(5), tail.try_move_next(&cancel))
            .await
            .unwrap()
            .unwrap());
        assert_eq!(tail.cursor().current(), Some((7, 71)));
        assert!(!tail.try_move_next(&cancel).await.unwrap());
        writer.await.unwrap();
    }

    #[test]
    fn wait_is_pending_until_write() {
        use tokio_test::{assert_pending, assert_ready, task};

        let series = SortedMap::<u64, u64>::new();
        let mut tail = AsyncCursor::new(series.cursor());
        let cancel = CancellationToken::new();
        {
            let mut wait = task::spawn(tail.try_move_next(&cancel));
            assert_pending!(wait.poll());

            series.set(1, 10).unwrap();
            assert!(wait.is_woken());
            assert!(assert_ready!(wait.poll()).unwrap());
        }
        assert_eq!(tail.cursor().current(), Some((1, 10)));
    }

    #[test]
    fn subscriber_set_shapes() {
        let core = CompleterCore::default();
        let a = Arc::new(Subscription::new());
        let b = Arc::new(Subscription::new());

        core.subscribe(&a);
        a.request_one();
        core.notify(false, false);
        // Consumed the single request; a further regular notify is a no-op.
        assert_eq!(a.requests.load(Ordering::Acquire), 0);

        core.subscribe(&b);
        a.request_one();
        b.request_one();
        core.notify(false, false);
        assert_eq!(a.requests.load(Ordering::Acquire), 0);
        assert_eq!(b.requests.load(Ordering::Acquire), 0);

        core.unsubscribe(&a);
        b.request_one();
        core.notify(false, false);
        assert_eq!(b.requests.load(Ordering::Acquire), 0);

        drop(b);
        core.notify(true, false);
    }
}
