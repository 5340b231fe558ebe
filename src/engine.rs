//! The orchestrator: the async public surface over the store and its
//! indexes.
//!
//! One writer at a time (a tokio mutex over the store), any number of
//! readers on the last published snapshot. Blocking work — disk I/O,
//! compression, hashing, index scans — runs on the blocking pool;
//! provider inference is awaited before the writer lease is taken.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::checksum::sha256;
use crate::error::{Result, WaxError};
use crate::index::fusion::{self, QueryClassifier};
use crate::options::{
    RememberBatchOptions, RememberOptions, SearchMode, SearchOptions, StoreOptions,
};
use crate::provider::{validate_embedding, ChunkStrategy, Chunker, EmbeddingProvider};
use crate::store::frames::Metadata;
use crate::store::{AppendFrame, FrameMeta, Snapshot, Store, StoreStats};
use crate::structured::store::{FactRemove, FactUpsert};
use crate::structured::{AsOf, Direction, EdgeQueryResult, EntityKey, FactView};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One search hit.
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub frame_id: u64,
    pub score: f64,
    pub created_at_ms: i64,
    pub metadata: Metadata,
}

/// One recalled context item, payload included.
#[derive(Debug, Clone, Serialize)]
pub struct ContextItem {
    pub frame_id: u64,
    pub score: f64,
    pub created_at_ms: i64,
    pub text: String,
    pub metadata: Metadata,
}

struct Inner {
    store: tokio::sync::Mutex<Option<Store>>,
    snapshot: RwLock<Arc<Snapshot>>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    classifier: QueryClassifier,
    opts: StoreOptions,
}

/// The Wax memory engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Open (or create) a store at `path`.
    pub async fn open(path: impl AsRef<Path>, opts: StoreOptions) -> Result<Self> {
        Self::open_with_provider(path, opts, None).await
    }

    /// Open with an embedding provider enabling the vector lane.
    pub async fn open_with_provider(
        path: impl AsRef<Path>,
        opts: StoreOptions,
        provider: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let opts_clone = opts.clone();
        let store =
            tokio::task::spawn_blocking(move || Store::open(&path, opts_clone))
                .await
                .map_err(|_| WaxError::Cancelled)??;
        let snapshot = store.snapshot();
        Ok(Self {
            inner: Arc::new(Inner {
                store: tokio::sync::Mutex::new(Some(store)),
                snapshot: RwLock::new(snapshot),
                provider,
                classifier: QueryClassifier::new(),
                opts,
            }),
        })
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.snapshot.read().expect("snapshot lock"))
    }

    fn publish(&self, snapshot: Arc<Snapshot>) {
        *self.inner.snapshot.write().expect("snapshot lock") = snapshot;
    }

    /// Run a closure against the store on the blocking pool, holding
    /// the writer lease, then republish the snapshot.
    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Store) -> Result<T> + Send + 'static,
    {
        let mut guard = self.inner.store.lock().await;
        let store = guard
            .take()
            .ok_or_else(|| WaxError::io("store is closed".to_string()))?;
        let (store, result) = tokio::task::spawn_blocking(move || {
            let mut store = store;
            let result = f(&mut store);
            (store, result)
        })
        .await
        .map_err(|_| WaxError::Cancelled)?;
        let snapshot = store.snapshot();
        *guard = Some(store);
        drop(guard);
        self.publish(snapshot);
        result
    }

    /// Resolve the embedding for a text: explicit vector first, then
    /// the provider. Runs before any lock is taken.
    async fn resolve_embedding(
        &self,
        text: String,
        explicit: Option<Vec<f32>>,
    ) -> Result<Option<Vec<f32>>> {
        let Some(provider) = self.inner.provider.clone() else {
            // Without a provider an explicit vector is stored verbatim.
            return Ok(explicit);
        };
        let dimensions = provider.dimensions();
        let normalize = provider.normalize();
        let vector = match explicit {
            Some(vector) => vector,
            None => {
                tokio::task::spawn_blocking(move || provider.embed(&text))
                    .await
                    .map_err(|_| WaxError::Cancelled)??
            }
        };
        validate_embedding(&vector, dimensions, false)?;
        let vector = if normalize {
            l2_normalize(vector)
        } else {
            vector
        };
        Ok(Some(vector))
    }

    // ── Write surface ──────────────────────────────────────────────

    /// Store one text as a frame; returns its frame id.
    pub async fn remember(&self, text: &str, opts: RememberOptions) -> Result<u64> {
        let embedding = self
            .resolve_embedding(text.to_string(), opts.embedding.clone())
            .await?;
        let created_at_ms = opts.created_at_ms.unwrap_or_else(now_ms);
        let payload = text.as_bytes().to_vec();
        let index_text = Some(text.to_string());
        let auto_flush = self.inner.opts.auto_flush;
        let flush_every = self.inner.opts.flush_every;
        let dedup = opts.dedup;
        let kind = opts.kind;
        let metadata = opts.metadata;

        self.with_store(move |store| {
            if dedup {
                if let Some(existing) = store.find_by_payload(&sha256(&payload)) {
                    tracing::debug!(frame_id = existing, "dedup hit, frame reused");
                    return Ok(existing);
                }
            }
            let frame_id = store.append_frame(AppendFrame {
                kind,
                payload,
                metadata,
                embedding,
                created_at_ms,
                index_text,
            })?;
            if auto_flush || (flush_every > 0 && store.staged_len() as u32 >= flush_every) {
                store.commit()?;
            }
            Ok(frame_id)
        })
        .await
    }

    /// Batch ingestion: one writer lease, optional deferred fsync, one
    /// commit at the end.
    pub async fn remember_many(
        &self,
        items: Vec<(String, RememberOptions)>,
        batch: RememberBatchOptions,
    ) -> Result<Vec<u64>> {
        // All provider inference happens before the lease is taken.
        let mut prepared = Vec::with_capacity(items.len());
        for (text, opts) in items {
            let embedding = self
                .resolve_embedding(text.clone(), opts.embedding.clone())
                .await?;
            prepared.push((text, opts, embedding));
        }
        let auto_flush = self.inner.opts.auto_flush;

        self.with_store(move |store| {
            if batch.skip_sync {
                store.set_skip_sync(true);
            }
            let mut ids = Vec::with_capacity(prepared.len());
            let outcome = (|| -> Result<()> {
                for (text, opts, embedding) in prepared {
                    let created_at_ms = opts.created_at_ms.unwrap_or_else(now_ms);
                    if opts.dedup {
                        if let Some(existing) =
                            store.find_by_payload(&sha256(text.as_bytes()))
                        {
                            ids.push(existing);
                            continue;
                        }
                    }
                    let frame_id = store.append_frame(AppendFrame {
                        kind: opts.kind,
                        payload: text.as_bytes().to_vec(),
                        metadata: opts.metadata,
                        embedding,
                        created_at_ms,
                        index_text: Some(text),
                    })?;
                    ids.push(frame_id);
                    if !batch.single_commit && auto_flush {
                        store.commit()?;
                    }
                }
                if batch.single_commit {
                    store.commit()?;
                }
                Ok(())
            })();
            store.set_skip_sync(false);
            outcome.map(|()| ids)
        })
        .await
    }

    /// Split `text` with the supplied chunker and remember every chunk
    /// as an independent frame.
    pub async fn remember_chunked(
        &self,
        text: &str,
        chunker: &dyn Chunker,
        strategy: ChunkStrategy,
        opts: RememberOptions,
    ) -> Result<Vec<u64>> {
        let chunks = chunker.chunk(text, strategy)?;
        let items = chunks
            .into_iter()
            .map(|chunk| (chunk, opts.clone()))
            .collect();
        self.remember_many(items, RememberBatchOptions::default())
            .await
    }

    /// Tombstone an earlier frame.
    pub async fn forget(&self, frame_id: u64) -> Result<u64> {
        let auto_flush = self.inner.opts.auto_flush;
        self.with_store(move |store| {
            let id = store.tombstone(frame_id, now_ms())?;
            if auto_flush {
                store.commit()?;
            }
            Ok(id)
        })
        .await
    }

    /// Commit everything staged.
    pub async fn flush(&self) -> Result<()> {
        self.with_store(|store| store.commit()).await
    }

    /// Flush and release the store. Idempotent; in-flight operations
    /// finish first because they hold the same writer lease.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.inner.store.lock().await;
        let Some(store) = guard.take() else {
            return Ok(());
        };
        let (store, result) = tokio::task::spawn_blocking(move || {
            let mut store = store;
            let result = if store.options().read_only {
                Ok(())
            } else {
                store.commit()
            };
            (store, result)
        })
        .await
        .map_err(|_| WaxError::Cancelled)?;
        result?;
        drop(store);
        Ok(())
    }

    /// Rewrite the file into a fresh layout.
    pub async fn compact(&self) -> Result<()> {
        let mut guard = self.inner.store.lock().await;
        let store = guard
            .take()
            .ok_or_else(|| WaxError::io("store is closed".to_string()))?;
        let compacted = tokio::task::spawn_blocking(move || {
            let mut store = store;
            store.commit()?;
            store.compact()
        })
        .await
        .map_err(|_| WaxError::Cancelled)??;
        let snapshot = compacted.snapshot();
        *guard = Some(compacted);
        drop(guard);
        self.publish(snapshot);
        Ok(())
    }

    // ── Read surface ───────────────────────────────────────────────

    /// Ranked hits for a query.
    pub async fn search(&self, query: &str, opts: SearchOptions) -> Result<Vec<Hit>> {
        let snapshot = self.snapshot();
        let (alpha, want_vector) = match opts.mode {
            SearchMode::Text => (0.0, false),
            SearchMode::Hybrid(explicit) => {
                let alpha = explicit.unwrap_or_else(|| {
                    self.inner
                        .opts
                        .fusion
                        .alpha_for(self.inner.classifier.classify(query))
                });
                (alpha, true)
            }
        };

        // The vector lane needs a query embedding; skip it without a
        // provider or an empty index.
        let query_vector = if want_vector
            && self.inner.provider.is_some()
            && !snapshot.vectors.is_empty()
        {
            self.resolve_embedding(query.to_string(), None).await?
        } else {
            None
        };

        let query = query.to_string();
        let fusion_k0 = self.inner.opts.fusion.k0;
        let hits = tokio::task::spawn_blocking(move || -> Result<Vec<Hit>> {
            let lane_k = opts.top_k.saturating_mul(2).max(1);
            let alive = |id: u64| {
                snapshot.is_alive(id)
                    && opts.time_range.map_or(true, |range| {
                        snapshot
                            .frames
                            .get(&id)
                            .is_some_and(|m| range.contains(m.created_at_ms))
                    })
            };

            let ranked: Vec<(u64, f64)> = match opts.mode {
                SearchMode::Text => snapshot.text.search(&query, lane_k, &alive),
                SearchMode::Hybrid(_) => {
                    let text_lane = snapshot.text.search(&query, lane_k, &alive);
                    let vector_lane = match &query_vector {
                        Some(vector) => snapshot.vectors.search(vector, lane_k, &alive)?,
                        None => Vec::new(),
                    };
                    fusion::fuse(&text_lane, &vector_lane, alpha, fusion_k0)
                }
            };

            Ok(ranked
                .into_iter()
                .filter(|(_, score)| *score >= opts.min_score)
                .take(opts.top_k)
                .filter_map(|(frame_id, score)| {
                    snapshot.frames.get(&frame_id).map(|meta| Hit {
                        frame_id,
                        score,
                        created_at_ms: meta.created_at_ms,
                        metadata: meta.metadata.clone(),
                    })
                })
                .collect())
        })
        .await
        .map_err(|_| WaxError::Cancelled)??;
        Ok(hits)
    }

    /// Search and hydrate payload text for the top `limit` hits.
    pub async fn recall(&self, query: &str, limit: usize) -> Result<Vec<ContextItem>> {
        let hits = self
            .search(query, SearchOptions::default().top_k(limit))
            .await?;
        self.with_store(move |store| {
            let mut items = Vec::with_capacity(hits.len());
            for hit in hits {
                if let Some((meta, payload)) = store.get_frame(hit.frame_id)? {
                    items.push(ContextItem {
                        frame_id: hit.frame_id,
                        score: hit.score,
                        created_at_ms: meta.created_at_ms,
                        text: String::from_utf8_lossy(&payload).into_owned(),
                        metadata: meta.metadata,
                    });
                }
            }
            Ok(items)
        })
        .await
    }

    /// Fetch one frame's metadata and payload.
    pub async fn get(&self, frame_id: u64) -> Result<Option<(FrameMeta, Vec<u8>)>> {
        self.with_store(move |store| store.get_frame(frame_id)).await
    }

    /// Engine and store counters.
    pub async fn runtime_stats(&self) -> Result<StoreStats> {
        self.with_store(|store| store.stats()).await
    }

    /// Re-hash every live segment.
    pub async fn verify(&self) -> Result<()> {
        self.with_store(|store| store.verify()).await
    }

    // ── Structured surface ─────────────────────────────────────────

    /// Upsert a structured fact; returns the fact row id.
    pub async fn upsert_fact(&self, upsert: FactUpsert) -> Result<u64> {
        let auto_flush = self.inner.opts.auto_flush;
        self.with_store(move |store| {
            let row = store.stage_upsert(upsert)?;
            if auto_flush {
                store.commit()?;
            }
            Ok(row)
        })
        .await
    }

    /// Bi-temporally close the current fact for (subject, predicate).
    pub async fn remove_fact(&self, remove: FactRemove) -> Result<bool> {
        let auto_flush = self.inner.opts.auto_flush;
        self.with_store(move |store| {
            let closed = store.stage_remove(remove)?;
            if closed && auto_flush {
                store.commit()?;
            }
            Ok(closed)
        })
        .await
    }

    /// Discard staged structured mutations.
    pub async fn rollback_facts(&self) -> Result<()> {
        self.with_store(|store| {
            store.rollback_structured();
            Ok(())
        })
        .await
    }

    /// As-of fact query against the committed snapshot.
    pub async fn get_facts(
        &self,
        subject: Option<EntityKey>,
        predicate: Option<String>,
        as_of: AsOf,
    ) -> Result<Vec<FactView>> {
        let snapshot = self.snapshot();
        Ok(tokio::task::spawn_blocking(move || {
            snapshot
                .structured
                .get_facts(subject.as_ref(), predicate.as_deref(), as_of)
        })
        .await
        .map_err(|_| WaxError::Cancelled)?)
    }

    /// Bounded BFS over entity references.
    pub async fn get_edges(
        &self,
        entity: EntityKey,
        direction: Direction,
        depth: u32,
        max_traversal: usize,
        max_results: usize,
    ) -> Result<EdgeQueryResult> {
        let snapshot = self.snapshot();
        Ok(tokio::task::spawn_blocking(move || {
            snapshot
                .structured
                .get_edges(&entity, direction, depth, max_traversal, max_results)
        })
        .await
        .map_err(|_| WaxError::Cancelled)?)
    }
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderIdentity;
    use tempfile::TempDir;

    /// Deterministic bag-of-words embedder: each token hashes to one of
    /// eight buckets.
    struct BagProvider;

    impl EmbeddingProvider for BagProvider {
        fn dimensions(&self) -> u32 {
            8
        }

        fn normalize(&self) -> bool {
            true
        }

        fn identity(&self) -> ProviderIdentity {
            ProviderIdentity {
                provider: "test".into(),
                model: "bag-of-words".into(),
                dimensions: 8,
                normalized: true,
            }
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut vector = vec![0.0f32; 8];
            for token in crate::index::text::tokenize(text) {
                let bucket = token.bytes().map(u64::from).sum::<u64>() % 8;
                vector[bucket as usize] += 1.0;
            }
            Ok(vector)
        }
    }

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    fn opts() -> StoreOptions {
        StoreOptions::default().wal_size(64 * 1024)
    }

    #[test]
    fn test_remember_and_recall() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.mv2s");
        rt().block_on(async {
            let engine = Engine::open(&path, opts()).await.unwrap();
            let a = engine
                .remember("the quick brown fox", RememberOptions::default())
                .await
                .unwrap();
            let b = engine
                .remember("lazy dog sleeps", RememberOptions::default())
                .await
                .unwrap();
            assert!(b > a, "frame ids strictly increase");

            let items = engine.recall("quick fox", 5).await.unwrap();
            assert_eq!(items[0].frame_id, a);
            assert_eq!(items[0].text, "the quick brown fox");

            engine.close().await.unwrap();
            // close is idempotent.
            engine.close().await.unwrap();
        });
    }

    #[test]
    fn test_operations_after_close_fail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.mv2s");
        rt().block_on(async {
            let engine = Engine::open(&path, opts()).await.unwrap();
            engine.close().await.unwrap();
            let err = engine
                .remember("late", RememberOptions::default())
                .await
                .unwrap_err();
            assert!(err.to_string().contains("closed"));
        });
    }

    #[test]
    fn test_text_search_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.mv2s");
        rt().block_on(async {
            let engine = Engine::open(&path, opts()).await.unwrap();
            engine
                .remember("rust storage engines", RememberOptions::default())
                .await
                .unwrap();
            engine
                .remember("gardening on weekends", RememberOptions::default())
                .await
                .unwrap();

            let hits = engine
                .search(
                    "storage",
                    SearchOptions::default().mode(SearchMode::Text).top_k(5),
                )
                .await
                .unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].frame_id, 1);
        });
    }

    #[test]
    fn test_hybrid_search_three_frames() {
        // Frames: "the quick brown fox", "lazy dog sleeps",
        // "quick brown dog"; query "quick dog" at alpha 0.5 must rank
        // [frame3, frame1, frame2].
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.mv2s");
        rt().block_on(async {
            let engine = Engine::open_with_provider(&path, opts(), Some(Arc::new(BagProvider)))
                .await
                .unwrap();
            for text in ["the quick brown fox", "lazy dog sleeps", "quick brown dog"] {
                engine.remember(text, RememberOptions::default()).await.unwrap();
            }

            let hits = engine
                .search(
                    "quick dog",
                    SearchOptions::default()
                        .mode(SearchMode::Hybrid(Some(0.5)))
                        .top_k(3),
                )
                .await
                .unwrap();
            let order: Vec<u64> = hits.iter().map(|h| h.frame_id).collect();
            assert_eq!(order, vec![3, 1, 2]);
        });
    }

    #[test]
    fn test_search_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.mv2s");
        rt().block_on(async {
            let engine = Engine::open_with_provider(&path, opts(), Some(Arc::new(BagProvider)))
                .await
                .unwrap();
            for text in ["alpha beta", "beta gamma", "gamma delta", "delta alpha"] {
                engine.remember(text, RememberOptions::default()).await.unwrap();
            }
            let first = engine
                .search("alpha gamma", SearchOptions::default())
                .await
                .unwrap();
            for _ in 0..5 {
                let again = engine
                    .search("alpha gamma", SearchOptions::default())
                    .await
                    .unwrap();
                let a: Vec<(u64, f64)> = first.iter().map(|h| (h.frame_id, h.score)).collect();
                let b: Vec<(u64, f64)> = again.iter().map(|h| (h.frame_id, h.score)).collect();
                assert_eq!(a, b);
            }
        });
    }

    #[test]
    fn test_time_range_filter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.mv2s");
        rt().block_on(async {
            let engine = Engine::open(&path, opts()).await.unwrap();
            engine
                .remember(
                    "early note about wax",
                    RememberOptions::default().created_at_ms(100),
                )
                .await
                .unwrap();
            engine
                .remember(
                    "late note about wax",
                    RememberOptions::default().created_at_ms(900),
                )
                .await
                .unwrap();

            let hits = engine
                .search(
                    "wax",
                    SearchOptions::default()
                        .mode(SearchMode::Text)
                        .time_range(0, 500),
                )
                .await
                .unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].created_at_ms, 100);
        });
    }

    #[test]
    fn test_forget_hides_from_search() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.mv2s");
        rt().block_on(async {
            let engine = Engine::open(&path, opts()).await.unwrap();
            let id = engine
                .remember("secret to forget", RememberOptions::default())
                .await
                .unwrap();
            engine.forget(id).await.unwrap();

            let hits = engine
                .search("secret", SearchOptions::default().mode(SearchMode::Text))
                .await
                .unwrap();
            assert!(hits.is_empty());
            assert!(engine.get(id).await.unwrap().is_none());
        });
    }

    #[test]
    fn test_remember_many_batches() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.mv2s");
        rt().block_on(async {
            let engine = Engine::open(&path, opts().auto_flush(false)).await.unwrap();
            let items: Vec<(String, RememberOptions)> = (0..10)
                .map(|i| (format!("bulk item number {i}"), RememberOptions::default()))
                .collect();
            let ids = engine
                .remember_many(
                    items,
                    RememberBatchOptions {
                        skip_sync: true,
                        single_commit: true,
                    },
                )
                .await
                .unwrap();
            assert_eq!(ids, (1..=10).collect::<Vec<u64>>());
            let stats = engine.runtime_stats().await.unwrap();
            assert_eq!(stats.frame_count, 10);
        });
    }

    #[test]
    fn test_dedup_returns_existing_frame() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.mv2s");
        rt().block_on(async {
            let engine = Engine::open(&path, opts()).await.unwrap();
            let a = engine
                .remember("same payload", RememberOptions::default())
                .await
                .unwrap();
            let b = engine
                .remember("same payload", RememberOptions::default().dedup(true))
                .await
                .unwrap();
            assert_eq!(a, b);
            assert_eq!(engine.runtime_stats().await.unwrap().frame_count, 1);
        });
    }

    #[test]
    fn test_remember_chunked_splits_into_frames() {
        struct ParagraphChunker;
        impl Chunker for ParagraphChunker {
            fn chunk(&self, text: &str, _strategy: ChunkStrategy) -> Result<Vec<String>> {
                Ok(text
                    .split("\n\n")
                    .filter(|c| !c.trim().is_empty())
                    .map(|c| c.trim().to_string())
                    .collect())
            }
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.mv2s");
        rt().block_on(async {
            let engine = Engine::open(&path, opts()).await.unwrap();
            let ids = engine
                .remember_chunked(
                    "first paragraph here\n\nsecond paragraph there",
                    &ParagraphChunker,
                    ChunkStrategy::Tokens {
                        target_tokens: 128,
                        overlap_tokens: 0,
                    },
                    RememberOptions::default(),
                )
                .await
                .unwrap();
            assert_eq!(ids, vec![1, 2]);

            let hits = engine
                .search(
                    "second paragraph",
                    SearchOptions::default().mode(SearchMode::Text),
                )
                .await
                .unwrap();
            assert_eq!(hits[0].frame_id, 2);
        });
    }

    #[test]
    fn test_structured_passthrough() {
        use crate::structured::FactValue;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.mv2s");
        rt().block_on(async {
            let engine = Engine::open(&path, opts()).await.unwrap();
            engine
                .upsert_fact(FactUpsert {
                    subject: EntityKey::new("alice", "person"),
                    predicate: "works_at".into(),
                    object: FactValue::EntityRef(EntityKey::new("acme", "org")),
                    valid_from_ms: 100,
                    valid_to_ms: None,
                    asserted_at_ms: 100,
                    evidence: Vec::new(),
                })
                .await
                .unwrap();

            let facts = engine
                .get_facts(Some(EntityKey::new("alice", "person")), None, AsOf::LATEST)
                .await
                .unwrap();
            assert_eq!(facts.len(), 1);

            let edges = engine
                .get_edges(
                    EntityKey::new("alice", "person"),
                    Direction::Outgoing,
                    3,
                    100,
                    100,
                )
                .await
                .unwrap();
            assert_eq!(edges.edges.len(), 1);
            assert_eq!(edges.edges[0].to, EntityKey::new("acme", "org"));
            assert!(!edges.was_truncated);
        });
    }
}
