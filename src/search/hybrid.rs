//! 判例混合检索引擎
//!
//! 两段式：关键词预筛（domain term + text match，上限 candidate_limit）把大语料收窄成
//! 候选集，再用查询向量对候选做余弦重排。一篇判决被切成多个 chunk，同一 doc_id 取
//! 最高分那条去重，取前 top_n 篇后按 doc_id 回填原文摘录。
//!
//! 顺序保证：预筛 → 重排 → 去重 → 回填，各步只消费前一步的输出。

use std::sync::Arc;

use serde::Serialize;

use crate::llm::EmbeddingProvider;
use crate::search::{ChunkHit, SearchError, SearchStore};

/// 重排后的 (chunk, 余弦分) 对；分数只在同一次查询的结果集内可比
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: ChunkHit,
    pub score: f32,
}

/// 去重回填后的判例参考，advising 一次调用内有效
#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    pub doc_id: String,
    pub case_name: String,
    /// 三位小数
    pub score: f32,
    pub excerpt: String,
}

/// 检索参数（config [search] 段的子集）
#[derive(Debug, Clone)]
pub struct RetrievalLimits {
    pub candidate_limit: usize,
    pub top_n: usize,
    pub excerpt_chars: usize,
}

impl Default for RetrievalLimits {
    fn default() -> Self {
        Self {
            candidate_limit: 500,
            top_n: 3,
            excerpt_chars: 800,
        }
    }
}

pub struct HybridRetriever {
    store: Arc<dyn SearchStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    limits: RetrievalLimits,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn SearchStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        limits: RetrievalLimits,
    ) -> Self {
        Self {
            store,
            embedder,
            limits,
        }
    }

    /// 两段式检索，返回按余弦分降序的完整序列（不截断，截断由去重完成）。
    /// 关键词零命中是合法结果（该领域没有相关判例），返回空序列。
    pub async fn search(&self, query: &str, domain: &str) -> Result<Vec<ScoredChunk>, SearchError> {
        let candidates = self
            .store
            .search_chunks(domain, query, self.limits.candidate_limit)
            .await?;
        if candidates.is_empty() {
            tracing::info!("keyword filter: no hits for domain={}", domain);
            return Ok(Vec::new());
        }
        tracing::debug!("keyword filter: {} candidates", candidates.len());

        let query_vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| SearchError::Unavailable(format!("embedding: {}", e)))?;

        // 没带向量的 chunk 静默跳过（不是错误）
        let mut scored: Vec<ScoredChunk> = candidates
            .into_iter()
            .filter_map(|chunk| {
                let vec = chunk.embedding.as_deref()?;
                let score = cosine_similarity(vec, &query_vector);
                Some(ScoredChunk { chunk, score })
            })
            .collect();

        // 稳定排序：相同输入反复调用产出相同顺序
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        tracing::debug!("semantic rerank: {} scored", scored.len());
        Ok(scored)
    }

    /// 同一 doc_id 只留首次出现（即该判决的最高分 chunk），凑满 top_n 或耗尽输入为止
    pub fn deduplicate(results: Vec<ScoredChunk>, top_n: usize) -> Vec<ScoredChunk> {
        let mut seen = std::collections::HashSet::new();
        let mut unique = Vec::new();
        for item in results {
            if unique.len() >= top_n {
                break;
            }
            if seen.insert(item.chunk.doc_id.clone()) {
                unique.push(item);
            }
        }
        unique
    }

    /// 按 doc_id 查判决原文；缺失返回 None，调用方跳过该参考
    pub async fn fetch_full_text(&self, doc_id: &str) -> Result<Option<String>, SearchError> {
        self.store.fetch_document(doc_id).await
    }

    /// 完整流水线：检索 → 去重 → 原文回填。原文缺失的判决直接跳过，
    /// 产出 ≤ top_n 条、doc_id 两两不同的参考。
    pub async fn retrieve_references(
        &self,
        query: &str,
        domain: &str,
    ) -> Result<Vec<Reference>, SearchError> {
        let results = self.search(query, domain).await?;
        let unique = Self::deduplicate(results, self.limits.top_n);

        let mut references = Vec::with_capacity(unique.len());
        for item in unique {
            let Some(full_text) = self.fetch_full_text(&item.chunk.doc_id).await? else {
                continue;
            };
            references.push(Reference {
                doc_id: item.chunk.doc_id,
                case_name: item
                    .chunk
                    .case_name
                    .unwrap_or_else(|| "제목없음".to_string()),
                score: round3(item.score),
                excerpt: truncate_excerpt(&full_text, self.limits.excerpt_chars),
            });
        }
        tracing::info!("retrieved {} references for domain={}", references.len(), domain);
        Ok(references)
    }
}

/// 余弦相似度
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn round3(score: f32) -> f32 {
    (score * 1000.0).round() / 1000.0
}

/// 按字符截断（UTF-8 安全），截断时补 "..."
fn truncate_excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockEmbedder;
    use crate::search::MemorySearchStore;

    fn chunk(doc_id: &str, text: &str, embedding: Option<Vec<f32>>) -> ChunkHit {
        ChunkHit {
            doc_id: doc_id.to_string(),
            case_name: Some(format!("{} 판결", doc_id)),
            text: text.to_string(),
            embedding,
        }
    }

    fn scored(doc_id: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: chunk(doc_id, "본문", None),
            score,
        }
    }

    fn retriever_with(
        store: MemorySearchStore,
        embedder: MockEmbedder,
        limits: RetrievalLimits,
    ) -> HybridRetriever {
        HybridRetriever::new(Arc::new(store), Arc::new(embedder), limits)
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn deduplicate_bounds_and_distinct_ids() {
        let input = vec![
            scored("a", 0.9),
            scored("a", 0.8),
            scored("b", 0.7),
            scored("a", 0.6),
            scored("c", 0.5),
            scored("d", 0.4),
        ];
        let out = HybridRetriever::deduplicate(input, 3);
        assert_eq!(out.len(), 3);
        let ids: Vec<_> = out.iter().map(|s| s.chunk.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        // 首次出现的分数（即最高分 chunk）代表该判决
        assert_eq!(out[0].score, 0.9);
    }

    #[test]
    fn deduplicate_all_identical_ids_keeps_one() {
        let input = vec![scored("x", 0.9), scored("x", 0.8), scored("x", 0.7)];
        let out = HybridRetriever::deduplicate(input, 3);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 0.9);
    }

    #[test]
    fn deduplicate_empty_input() {
        assert!(HybridRetriever::deduplicate(Vec::new(), 3).is_empty());
    }

    #[tokio::test]
    async fn search_zero_hits_returns_empty() {
        let store = MemorySearchStore::new();
        let retriever = retriever_with(
            store,
            MockEmbedder::new(vec![1.0, 0.0]),
            RetrievalLimits::default(),
        );
        let results = retriever.search("신호위반 사고", "교통사고").await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_sorts_descending_and_is_deterministic() {
        let store = MemorySearchStore::new()
            .with_chunk("교통사고", chunk("far", "사고 경위", Some(vec![0.0, 1.0])))
            .with_chunk("교통사고", chunk("near", "사고 경위", Some(vec![1.0, 0.0])))
            .with_chunk("교통사고", chunk("mid", "사고 경위", Some(vec![1.0, 1.0])))
            .with_chunk("교통사고", chunk("no-vec", "사고 경위", None));
        let embedder = MockEmbedder::new(vec![0.0, 0.0]).with_vector("사고", vec![1.0, 0.0]);
        let retriever = retriever_with(store, embedder, RetrievalLimits::default());

        let first = retriever.search("사고", "교통사고").await.unwrap();
        let ids: Vec<_> = first.iter().map(|s| s.chunk.doc_id.as_str()).collect();
        // 无向量的 chunk 被静默剔除
        assert_eq!(ids, vec!["near", "mid", "far"]);
        assert!(first[0].score >= first[1].score && first[1].score >= first[2].score);

        // 相同输入反复调用顺序一致
        let second = retriever.search("사고", "교통사고").await.unwrap();
        let ids2: Vec<_> = second.iter().map(|s| s.chunk.doc_id.as_str()).collect();
        assert_eq!(ids, ids2);
    }

    #[tokio::test]
    async fn search_filters_by_domain() {
        let store = MemorySearchStore::new()
            .with_chunk("교통사고", chunk("t1", "사고 경위", Some(vec![1.0, 0.0])))
            .with_chunk("의료사고", chunk("m1", "사고 경위", Some(vec![1.0, 0.0])));
        let embedder = MockEmbedder::new(vec![1.0, 0.0]);
        let retriever = retriever_with(store, embedder, RetrievalLimits::default());

        let results = retriever.search("사고", "교통사고").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.doc_id, "t1");
    }

    #[tokio::test]
    async fn missing_full_text_drops_that_reference() {
        let store = MemorySearchStore::new()
            .with_chunk("교통사고", chunk("has-doc", "사고 경위", Some(vec![1.0, 0.0])))
            .with_chunk("교통사고", chunk("no-doc", "사고 경위", Some(vec![0.9, 0.1])))
            .with_document("has-doc", "판결 원문입니다.");
        let embedder = MockEmbedder::new(vec![1.0, 0.0]);
        let retriever = retriever_with(store, embedder, RetrievalLimits::default());

        let refs = retriever
            .retrieve_references("사고", "교통사고")
            .await
            .unwrap();
        // 去重后两篇中只留有原文的那篇
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].doc_id, "has-doc");
        assert_eq!(refs[0].excerpt, "판결 원문입니다.");
    }

    #[tokio::test]
    async fn references_have_distinct_ids_and_rounded_scores() {
        let store = MemorySearchStore::new()
            .with_chunk("교통사고", chunk("a", "과실비율 판단", Some(vec![1.0, 0.0])))
            .with_chunk("교통사고", chunk("a", "과실비율 쟁점", Some(vec![0.99, 0.01])))
            .with_chunk("교통사고", chunk("b", "과실비율 산정", Some(vec![0.5, 0.5])))
            .with_document("a", "가 판결 원문")
            .with_document("b", "나 판결 원문");
        let embedder = MockEmbedder::new(vec![1.0, 0.0]);
        let retriever = retriever_with(store, embedder, RetrievalLimits::default());

        let refs = retriever
            .retrieve_references("과실비율", "교통사고")
            .await
            .unwrap();
        assert_eq!(refs.len(), 2);
        assert_ne!(refs[0].doc_id, refs[1].doc_id);
        for r in &refs {
            let scaled = r.score * 1000.0;
            assert!((scaled - scaled.round()).abs() < 1e-3);
        }
    }

    #[test]
    fn excerpt_truncation_is_char_safe() {
        let text = "가나다라마바사";
        assert_eq!(truncate_excerpt(text, 10), "가나다라마바사");
        assert_eq!(truncate_excerpt(text, 3), "가나다...");
    }
}
