//! A facade over remotely stored chunked series.
//!
//! The remote map is a series whose values are themselves sorted
//! chunks, addressed by the affine distance of the chunk's key from
//! the origin. Transport is pluggable through the five
//! [`ChunkStore`] hooks; this module owns the local index snapshot,
//! the chunk cache and the locking discipline around remote writes.

pub mod memory;

pub use memory::MemoryChunkStore;

use crate::{
    comparer::{AffineComparer, NaturalOrder},
    cursor::Lookup,
    error::{Error, Result},
    series::SortedMap,
};
use async_trait::async_trait;
use derive_more::{Display, From};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Opaque identifier of one remote chunked map.
#[derive(Clone, Copy, Debug, Display, From, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapId(pub u128);

/// Address of a chunk: the affine distance of the chunk's first key
/// from the key origin.
#[derive(Clone, Copy, Debug, Display, From, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey(pub i64);

/// Scoped exclusive hold on one remote chunk.
///
/// Dropping the handle releases the remote lock on every exit path,
/// success or failure; the store side watches the paired receiver.
#[derive(Debug)]
pub struct ChunkLock {
    _release: oneshot::Sender<()>,
}

impl ChunkLock {
    /// Returns the guard and the receiver that resolves when the
    /// guard is dropped.
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { _release: tx }, rx)
    }
}

/// The five remote hooks. Implementations own transport, encoding
/// and persistence; all failures surface to callers as
/// [`Error::Remote`] with the cause attached.
#[async_trait]
pub trait ChunkStore<K, V>: Send + Sync
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    /// Chunk index entries changed since `since_version`; passing 0
    /// loads the full index.
    async fn load_keys(
        &self,
        map_id: MapId,
        since_version: u64,
    ) -> anyhow::Result<BTreeMap<ChunkKey, u64>>;

    async fn load_chunk(
        &self,
        map_id: MapId,
        chunk_key: ChunkKey,
    ) -> anyhow::Result<Option<SortedMap<K, V>>>;

    /// Persists a chunk; returns the new map version.
    async fn save_chunk(
        &self,
        map_id: MapId,
        chunk_key: ChunkKey,
        chunk: SortedMap<K, V>,
    ) -> anyhow::Result<u64>;

    /// Remote counterpart of ranged removal over chunk keys; returns
    /// the new map version.
    async fn remove_chunks(
        &self,
        map_id: MapId,
        chunk_key: ChunkKey,
        dir: Lookup,
    ) -> anyhow::Result<u64>;

    async fn lock_chunk(&self, map_id: MapId, chunk_key: ChunkKey) -> anyhow::Result<ChunkLock>;
}

#[async_trait]
impl<K, V, T> ChunkStore<K, V> for Arc<T>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    T: ChunkStore<K, V>,
{
    async fn load_keys(
        &self,
        map_id: MapId,
        since_version: u64,
    ) -> anyhow::Result<BTreeMap<ChunkKey, u64>> {
        (**self).load_keys(map_id, since_version).await
    }

    async fn load_chunk(
        &self,
        map_id: MapId,
        chunk_key: ChunkKey,
    ) -> anyhow::Result<Option<SortedMap<K, V>>> {
        (**self).load_chunk(map_id, chunk_key).await
    }

    async fn save_chunk(
        &self,
        map_id: MapId,
        chunk_key: ChunkKey,
        chunk: SortedMap<K, V>,
    ) -> anyhow::Result<u64> {
        (**self).save_chunk(map_id, chunk_key, chunk).await
    }

    async fn remove_chunks(
        &self,
        map_id: MapId,
        chunk_key: ChunkKey,
        dir: Lookup,
    ) -> anyhow::Result<u64> {
        (**self).remove_chunks(map_id, chunk_key, dir).await
    }

    async fn lock_chunk(&self, map_id: MapId, chunk_key: ChunkKey) -> anyhow::Result<ChunkLock> {
        (**self).lock_chunk(map_id, chunk_key).await
    }
}

/// One logical view of the remote index plus whatever chunks have
/// been pulled so far. Snapshots are immutable as a whole: a refresh
/// installs a new one and existing readers keep the old `Arc` until
/// they re-initialize.
struct ChunkSnapshot<K, V> {
    index: BTreeMap<ChunkKey, u64>,
    cache: Mutex<HashMap<ChunkKey, SortedMap<K, V>>>,
}

impl<K, V> ChunkSnapshot<K, V> {
    fn empty() -> Self {
        Self {
            index: BTreeMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

/// Series facade over a remotely chunked map.
pub struct RemoteChunksSeries<K, V, S>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
    S: ChunkStore<K, V>,
{
    map_id: MapId,
    store: Arc<S>,
    snapshot: RwLock<Arc<ChunkSnapshot<K, V>>>,
    map_version: AtomicU64,
}

impl<K, V, S> RemoteChunksSeries<K, V, S>
where
    K: Clone + Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: ChunkStore<K, V>,
    NaturalOrder: AffineComparer<K>,
{
    /// Connects to a remote map and synchronizes the local chunk
    /// index from it.
    pub async fn open(map_id: MapId, store: S) -> Result<Self> {
        let this = Self {
            map_id,
            store: Arc::new(store),
            snapshot: RwLock::new(Arc::new(ChunkSnapshot::empty())),
            map_version: AtomicU64::new(0),
        };
        this.refresh().await?;
        debug!(%map_id, chunks = this.chunk_keys().len(), "opened remote chunked series");
        Ok(this)
    }

    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    /// The last map version observed from the remote.
    pub fn map_version(&self) -> u64 {
        self.map_version.load(Ordering::Acquire)
    }

    /// The chunk address a key belongs to.
    pub fn chunk_key_for(&self, key: &K) -> ChunkKey {
        ChunkKey(NaturalOrder.chunk_distance(key))
    }

    /// Chunk keys in the current snapshot, in order.
    pub fn chunk_keys(&self) -> Vec<ChunkKey> {
        self.snapshot.read().index.keys().copied().collect()
    }

    /// Pulls index entries changed since the last observed version
    /// and installs a new snapshot. Cached chunks whose version did
    /// not move are carried over.
    pub async fn refresh(&self) -> Result<()> {
        self.refresh_with(None).await
    }

    async fn refresh_with(&self, seed: Option<(ChunkKey, SortedMap<K, V>)>) -> Result<()> {
        let since = self.map_version();
        let delta = self
            .store
            .load_keys(self.map_id, since)
            .await
            .map_err(Error::Remote)?;
        let old = self.snapshot.read().clone();

        let mut index = old.index.clone();
        let mut max_seen = since;
        for (ck, version) in delta {
            max_seen = max_seen.max(version);
            index.insert(ck, version);
        }

        let mut cache = HashMap::new();
        {
            let old_cache = old.cache.lock();
            for (ck, chunk) in old_cache.iter() {
                if index.get(ck) == old.index.get(ck) && index.contains_key(ck) {
                    cache.insert(*ck, chunk.clone());
                }
            }
        }
        if let Some((ck, chunk)) = seed {
            cache.insert(ck, chunk);
        }

        *self.snapshot.write() = Arc::new(ChunkSnapshot {
            index,
            cache: Mutex::new(cache),
        });
        self.map_version.fetch_max(max_seen, Ordering::AcqRel);
        trace!(since, "installed remote index snapshot");
        Ok(())
    }

    fn cached(&self, chunk_key: ChunkKey) -> Option<SortedMap<K, V>> {
        let snapshot = self.snapshot.read().clone();
        if !snapshot.index.contains_key(&chunk_key) {
            return None;
        }
        let cache = snapshot.cache.lock();
        cache.get(&chunk_key).cloned()
    }

    /// Loads a chunk into the current snapshot's cache; the caller
    /// must already hold the remote lock.
    async fn load_and_cache(&self, chunk_key: ChunkKey) -> Result<Option<SortedMap<K, V>>> {
        let chunk = self
            .store
            .load_chunk(self.map_id, chunk_key)
            .await
            .map_err(Error::Remote)?;
        if let Some(chunk) = &chunk {
            let snapshot = self.snapshot.read().clone();
            snapshot.cache.lock().insert(chunk_key, chunk.clone());
            trace!(%chunk_key, "cached remote chunk");
        }
        Ok(chunk)
    }

    /// A chunk by address: local cache first, remote load under the
    /// remote lock on a miss.
    pub async fn chunk(&self, chunk_key: ChunkKey) -> Result<Option<SortedMap<K, V>>> {
        if !self.snapshot.read().index.contains_key(&chunk_key) {
            return Ok(None);
        }
        if let Some(chunk) = self.cached(chunk_key) {
            return Ok(Some(chunk));
        }
        let _lock = self
            .store
            .lock_chunk(self.map_id, chunk_key)
            .await
            .map_err(Error::Remote)?;
        self.load_and_cache(chunk_key).await
    }

    /// The chunk whose range covers `key`, resolved through the
    /// index: the greatest chunk address at or below the key's.
    pub async fn chunk_containing(&self, key: &K) -> Result<Option<(ChunkKey, SortedMap<K, V>)>> {
        let target = self.chunk_key_for(key);
        let ck = {
            let snapshot = self.snapshot.read().clone();
            snapshot.index.range(..=target).next_back().map(|(ck, _)| *ck)
        };
        match ck {
            Some(ck) => Ok(self.chunk(ck).await?.map(|chunk| (ck, chunk))),
            None => Ok(None),
        }
    }

    /// Point lookup through the containing chunk.
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        match self.chunk_containing(key).await? {
            Some((_, chunk)) => Ok(chunk.get(key)),
            None => Ok(None),
        }
    }

    /// Persists `chunk` at `chunk_key`: remote lock, save, local
    /// cache update, index refresh. Returns the new map version.
    pub async fn save(&self, chunk_key: ChunkKey, chunk: &SortedMap<K, V>) -> Result<u64> {
        let _lock = self
            .store
            .lock_chunk(self.map_id, chunk_key)
            .await
            .map_err(Error::Remote)?;
        let version = self
            .store
            .save_chunk(self.map_id, chunk_key, chunk.fork())
            .await
            .map_err(Error::Remote)?;
        debug!(%chunk_key, version, "saved remote chunk");
        self.refresh_with(Some((chunk_key, chunk.fork()))).await?;
        self.map_version.fetch_max(version, Ordering::AcqRel);
        Ok(version)
    }

    /// Upserts one element: the containing chunk (or a fresh chunk
    /// addressed at the key) is rewritten and persisted. Either the
    /// chunk is durably saved or an error is surfaced; there is no
    /// silent path.
    pub async fn set(&self, key: K, value: V) -> Result<u64> {
        let ck = {
            let target = self.chunk_key_for(&key);
            let snapshot = self.snapshot.read().clone();
            snapshot
                .index
                .range(..=target)
                .next_back()
                .map(|(ck, _)| *ck)
                .unwrap_or(target)
        };
        let _lock = self
            .store
            .lock_chunk(self.map_id, ck)
            .await
            .map_err(Error::Remote)?;
        let base = match self.cached(ck) {
            Some(chunk) => Some(chunk),
            None => self.load_and_cache(ck).await?,
        };
        let chunk = match base {
            Some(existing) => existing.fork(),
            None => SortedMap::with_comparer(NaturalOrder),
        };
        chunk.set(key, value)?;
        let version = self
            .store
            .save_chunk(self.map_id, ck, chunk.fork())
            .await
            .map_err(Error::Remote)?;
        self.refresh_with(Some((ck, chunk))).await?;
        self.map_version.fetch_max(version, Ordering::AcqRel);
        Ok(version)
    }

    /// Ranged removal over chunk addresses, mirrored remotely and
    /// locally. Returns the new map version.
    pub async fn remove(&self, chunk_key: ChunkKey, dir: Lookup) -> Result<u64> {
        let _lock = self
            .store
            .lock_chunk(self.map_id, chunk_key)
            .await
            .map_err(Error::Remote)?;
        let version = self
            .store
            .remove_chunks(self.map_id, chunk_key, dir)
            .await
            .map_err(Error::Remote)?;

        let old = self.snapshot.read().clone();
        let mut index = old.index.clone();
        let removed: Vec<ChunkKey> = index
            .keys()
            .copied()
            .filter(|ck| match dir {
                Lookup::Eq => *ck == chunk_key,
                Lookup::Lt => *ck < chunk_key,
                Lookup::Le => *ck <= chunk_key,
                Lookup::Gt => *ck > chunk_key,
                Lookup::Ge => *ck >= chunk_key,
            })
            .collect();
        for ck in &removed {
            index.remove(ck);
        }
        let mut cache = HashMap::new();
        {
            let old_cache = old.cache.lock();
            for (ck, chunk) in old_cache.iter() {
                if index.contains_key(ck) {
                    cache.insert(*ck, chunk.clone());
                }
            }
        }
        *self.snapshot.write() = Arc::new(ChunkSnapshot {
            index,
            cache: Mutex::new(cache),
        });
        self.map_version.fetch_max(version, Ordering::AcqRel);
        debug!(%chunk_key, ?dir, removed = removed.len(), "removed remote chunks");
        Ok(version)
    }

    /// Materializes the whole remote map as a series of chunks. This
    /// loads every chunk not yet cached.
    pub async fn to_series(&self) -> Result<SortedMap<ChunkKey, SortedMap<K, V>>> {
        let out = SortedMap::<ChunkKey, SortedMap<K, V>>::new();
        for ck in self.chunk_keys() {
            if let Some(chunk) = self.chunk(ck).await? {
                out.set(ck, chunk)?;
            }
        }
        Ok(out)
    }
}
