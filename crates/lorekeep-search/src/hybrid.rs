//! Hybrid retrieval engine: lexical + vector with RRF fusion and reranking.
//!
//! The pipeline per query:
//! 1. lexical search over `4 × topK` candidates
//! 2. strong-signal shortcut: a decisive lexical top hit skips the vector leg
//! 3. embed the query, vector search over `2 × topK` candidates
//! 4. merge by `(item_id, chunk_index)`, drop candidates whose item is no
//!    longer active, fuse with weighted RRF, keep the top `max(4 × topK, 12)`
//! 5. rerank (passthrough when unconfigured), blend with a rank-dependent
//!    weight, attach item provenance, return the top `topK`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lorekeep_core::{
    defaults, ChunkHit, EmbeddingProvider, Error, ItemStatus, NotebookItem, RerankProvider,
    Result, RetrievalScope, SearchPassage, SourceScope,
};
use lorekeep_db::{PgChunkSearch, PgItemRepository};
use lorekeep_vector::VectorStore;

use crate::rrf::{self, FusedCandidate};

/// Who is asking, and what they may see.
#[derive(Debug, Clone, Copy)]
pub struct SearchContext {
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub scope: RetrievalScope,
}

/// Lexical candidate source.
#[async_trait]
pub trait LexicalBackend: Send + Sync {
    async fn search(&self, ctx: &SearchContext, query: &str, limit: i64)
        -> Result<Vec<ChunkHit>>;
}

/// Vector candidate source.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Vector size the backing collection expects.
    fn dimension(&self) -> usize;

    async fn search(
        &self,
        ctx: &SearchContext,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkHit>>;
}

/// Resolves which of a set of items are still live, and their metadata.
#[async_trait]
pub trait ItemLookup: Send + Sync {
    async fn active_by_ids(&self, ctx: &SearchContext, ids: &[Uuid])
        -> Result<Vec<NotebookItem>>;
}

#[async_trait]
impl LexicalBackend for PgChunkSearch {
    async fn search(
        &self,
        ctx: &SearchContext,
        query: &str,
        limit: i64,
    ) -> Result<Vec<ChunkHit>> {
        PgChunkSearch::search(self, ctx.company_id, ctx.user_id, ctx.scope, query, limit).await
    }
}

#[async_trait]
impl VectorBackend for VectorStore {
    fn dimension(&self) -> usize {
        VectorStore::dimension(self)
    }

    async fn search(
        &self,
        ctx: &SearchContext,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        VectorStore::search(self, vector, ctx.company_id, ctx.user_id, ctx.scope, limit).await
    }
}

#[async_trait]
impl ItemLookup for PgItemRepository {
    async fn active_by_ids(
        &self,
        ctx: &SearchContext,
        ids: &[Uuid],
    ) -> Result<Vec<NotebookItem>> {
        PgItemRepository::active_by_ids(self, ctx.company_id, ctx.user_id, ctx.scope, ids).await
    }
}

/// The hybrid retrieval engine.
pub struct HybridSearchEngine {
    lexical: Arc<dyn LexicalBackend>,
    vector: Arc<dyn VectorBackend>,
    items: Arc<dyn ItemLookup>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<dyn RerankProvider>>,
}

impl HybridSearchEngine {
    pub fn new(
        lexical: Arc<dyn LexicalBackend>,
        vector: Arc<dyn VectorBackend>,
        items: Arc<dyn ItemLookup>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Option<Arc<dyn RerankProvider>>,
    ) -> Self {
        Self {
            lexical,
            vector,
            items,
            embedder,
            reranker,
        }
    }

    /// Run the full retrieval pipeline for one query.
    pub async fn search(
        &self,
        ctx: &SearchContext,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchPassage>> {
        let query = query.trim();
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();

        let lexical_hits = self
            .lexical
            .search(ctx, query, (top_k * 4) as i64)
            .await?;

        if let Some(passages) = self
            .try_shortcut(ctx, query, top_k, &lexical_hits)
            .await?
        {
            info!(
                subsystem = "search",
                component = "hybrid",
                op = "search",
                company_id = %ctx.company_id,
                shortcut = true,
                result_count = passages.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Search served from lexical shortcut"
            );
            return Ok(passages);
        }

        let query_vector = self.embedder.embed_query(query).await?;
        if query_vector.len() != self.vector.dimension() {
            return Err(Error::EmbeddingDimMismatch {
                expected: self.vector.dimension(),
                actual: query_vector.len(),
            });
        }
        let vector_hits = self.vector.search(ctx, &query_vector, top_k * 2).await?;

        debug!(
            subsystem = "search",
            component = "hybrid",
            lexical_hits = lexical_hits.len(),
            vector_hits = vector_hits.len(),
            "Candidate lists retrieved"
        );

        // Live-item filter before fusion: vector entries can outlive their
        // source item between a delete and the vector store catching up.
        let mut fused = rrf::fuse(
            &[
                (&lexical_hits[..], defaults::RRF_LEXICAL_WEIGHT),
                (&vector_hits[..], defaults::RRF_VECTOR_WEIGHT),
            ],
            defaults::RRF_K,
        );
        let live = self.live_items(ctx, fused.iter().map(|c| &c.hit)).await?;
        fused.retain(|c| live.contains_key(&c.hit.item_id));
        fused.truncate((top_k * 4).max(defaults::RERANK_MIN_CANDIDATES));

        let ranked = self.rerank_and_blend(query, fused).await;

        let passages: Vec<SearchPassage> = ranked
            .into_iter()
            .filter_map(|c| live.get(&c.hit.item_id).map(|item| passage(item, &c.hit, c.score)))
            .take(top_k)
            .collect();

        info!(
            subsystem = "search",
            component = "hybrid",
            op = "search",
            company_id = %ctx.company_id,
            shortcut = false,
            result_count = passages.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Search complete"
        );
        Ok(passages)
    }

    /// Decide whether the lexical ranking alone is authoritative, and if so
    /// build the response from it. A lone hit is compared against a zero
    /// second-best score.
    async fn try_shortcut(
        &self,
        ctx: &SearchContext,
        _query: &str,
        top_k: usize,
        lexical_hits: &[ChunkHit],
    ) -> Result<Option<Vec<SearchPassage>>> {
        let Some(top) = lexical_hits.first() else {
            return Ok(None);
        };
        let second = lexical_hits.get(1).map(|h| h.score).unwrap_or(0.0);
        if top.score < defaults::LEXICAL_SHORTCUT_SCORE
            || top.score - second < defaults::LEXICAL_SHORTCUT_GAP
        {
            return Ok(None);
        }

        // Deduplicate by chunk key, keeping the best-ranked occurrence.
        let mut seen = HashMap::new();
        let mut unique: Vec<&ChunkHit> = Vec::new();
        for hit in lexical_hits {
            if seen.insert((hit.item_id, hit.chunk_index), ()).is_none() {
                unique.push(hit);
            }
        }

        let live = self.live_items(ctx, unique.iter().copied()).await?;
        let passages = unique
            .into_iter()
            .filter_map(|hit| live.get(&hit.item_id).map(|item| passage(item, hit, hit.score)))
            .take(top_k)
            .collect();
        Ok(Some(passages))
    }

    /// Resolve candidate items and drop everything no longer servable: items
    /// that were deleted, opted out of indexing, or moved outside the
    /// requested scope since their chunks were written.
    async fn live_items<'a>(
        &self,
        ctx: &SearchContext,
        hits: impl Iterator<Item = &'a ChunkHit>,
    ) -> Result<HashMap<Uuid, NotebookItem>> {
        let mut ids: Vec<Uuid> = hits.map(|h| h.item_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let items = self.items.active_by_ids(ctx, &ids).await?;
        Ok(items
            .into_iter()
            .filter(|i| servable(i, ctx))
            .map(|i| (i.id, i))
            .collect())
    }

    /// Rerank the candidate set and blend reranker scores with the retrieval
    /// signal. Without a configured reranker (or when it fails) the fused
    /// order and scores pass through unchanged.
    async fn rerank_and_blend(
        &self,
        query: &str,
        fused: Vec<FusedCandidate>,
    ) -> Vec<FusedCandidate> {
        let Some(reranker) = &self.reranker else {
            return fused;
        };
        if fused.is_empty() {
            return fused;
        }

        let documents: Vec<String> = fused.iter().map(|c| c.hit.text.clone()).collect();
        let ranking = match reranker.rerank(query, &documents).await {
            Ok(ranking) => ranking,
            Err(e) => {
                warn!(
                    subsystem = "search",
                    component = "hybrid",
                    error = %e,
                    "Reranker failed, keeping fused order"
                );
                return fused;
            }
        };

        let max_fused = fused
            .iter()
            .map(|c| c.score)
            .fold(f32::MIN, f32::max)
            .max(f32::EPSILON);

        // The reranker is most trustworthy near the top of its own ranking;
        // further down, the retrieval signal keeps more of the weight.
        let mut blended: Vec<FusedCandidate> = ranking
            .into_iter()
            .enumerate()
            .filter_map(|(position, (index, rerank_score))| {
                fused.get(index).map(|candidate| {
                    let retrieval_weight = if position < 3 {
                        defaults::BLEND_WEIGHT_TOP
                    } else if position < 10 {
                        defaults::BLEND_WEIGHT_MID
                    } else {
                        defaults::BLEND_WEIGHT_TAIL
                    };
                    let normalized = candidate.score / max_fused;
                    FusedCandidate {
                        hit: candidate.hit.clone(),
                        score: retrieval_weight * normalized
                            + (1.0 - retrieval_weight) * rerank_score,
                    }
                })
            })
            .collect();
        blended.sort_by(|a, b| b.score.total_cmp(&a.score));
        blended
    }
}

/// Whether an item may appear in results for this request: active, indexable,
/// and visible under the requested scope. Applied on top of whatever the
/// `ItemLookup` backend returns.
fn servable(item: &NotebookItem, ctx: &SearchContext) -> bool {
    if item.status != ItemStatus::Active || !item.is_indexable {
        return false;
    }
    match ctx.scope {
        RetrievalScope::Personal => item.owner_user_id == ctx.user_id,
        RetrievalScope::Company => item.source_scope == SourceScope::Company,
        RetrievalScope::All => {
            item.owner_user_id == ctx.user_id || item.source_scope == SourceScope::Company
        }
    }
}

fn passage(item: &NotebookItem, hit: &ChunkHit, score: f32) -> SearchPassage {
    SearchPassage {
        item_id: hit.item_id,
        chunk_index: hit.chunk_index,
        title: item.title.clone(),
        snippet: hit.text.clone(),
        source_type: hit.source_type,
        source_locator: hit.source_locator.clone(),
        source_scope: item.source_scope,
        filename: item.media.as_ref().map(|m| m.filename.clone()),
        score,
    }
}
