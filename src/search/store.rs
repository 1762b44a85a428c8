//! 判例文档存储客户端
//!
//! 两个索引：chunk 索引（domain keyword + 全文 text + 向量字段）与判决原文索引
//! （按 doc_id 精确查询）。检索引擎只依赖 SearchStore trait，测试用内存实现替换。

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

/// 文档存储错误；"没有命中"不是错误，返回空序列 / None
#[derive(Error, Debug)]
pub enum SearchError {
    /// 端点不可达或返回非 2xx
    #[error("search backend unreachable: {0}")]
    Unavailable(String),

    /// 请求超过配置的时限
    #[error("search request timed out")]
    Timeout,

    /// 响应体不是预期形状
    #[error("unexpected search response: {0}")]
    BadResponse(String),
}

/// chunk 索引的一条命中（已展开 _source）
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub doc_id: String,
    pub case_name: Option<String>,
    pub text: String,
    /// 索引时写入的向量；缺失时该 chunk 不参与语义重排
    pub embedding: Option<Vec<f32>>,
}

impl ChunkHit {
    /// 从 _source 提取；doc_id 缺失的记录整条跳过（无法去重也无法回填原文）
    pub fn from_source(source: &Value, vector_field: &str) -> Option<ChunkHit> {
        let doc_id = source.get("doc_id")?.as_str()?.to_string();
        if doc_id.is_empty() {
            return None;
        }
        let case_name = source
            .get("case_name")
            .and_then(|v| v.as_str())
            .map(String::from);
        let text = source
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let embedding = source.get(vector_field).and_then(|v| {
            v.as_array().map(|arr| {
                arr.iter()
                    .filter_map(|x| x.as_f64().map(|f| f as f32))
                    .collect::<Vec<f32>>()
            })
        });
        Some(ChunkHit {
            doc_id,
            case_name,
            text,
            embedding,
        })
    }
}

/// 判决原文的 sentences 字段既有整串也有句子数组两种历史形状
///
/// 数组按换行拼接，整串去掉首尾空白，其它形状一律按缺失处理。
pub fn normalize_sentences(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => {
            let joined = items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            if joined.is_empty() {
                None
            } else {
                Some(joined)
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    }
}

/// 检索引擎对文档存储的全部依赖
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// 关键词预筛：domain 精确匹配 + text 全文匹配，最多 limit 条；零命中返回空序列
    async fn search_chunks(
        &self,
        domain: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkHit>, SearchError>;

    /// 按 doc_id 精确查一篇判决原文；查不到返回 None，调用方跳过该参考
    async fn fetch_document(&self, doc_id: &str) -> Result<Option<String>, SearchError>;
}

/// Elasticsearch HTTP API 实现
pub struct ElasticStore {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: Option<String>,
    chunk_index: String,
    full_index: String,
    vector_field: String,
}

impl ElasticStore {
    pub fn from_config(cfg: &crate::config::SearchSection) -> Result<Self, SearchError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .danger_accept_invalid_certs(!cfg.verify_certs)
            .build()
            .map_err(|e| SearchError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            chunk_index: cfg.chunk_index.clone(),
            full_index: cfg.full_index.clone(),
            vector_field: cfg.vector_field.clone(),
        })
    }

    async fn search_index(&self, index: &str, body: Value) -> Result<Value, SearchError> {
        let url = format!("{}/{}/_search", self.base_url, index);
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.username, self.password.as_deref())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout
                } else {
                    SearchError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Unavailable(format!(
                "{} returned {}",
                index, status
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| SearchError::BadResponse(e.to_string()))
    }
}

fn hits_of(body: &Value) -> Result<&Vec<Value>, SearchError> {
    body.get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(|h| h.as_array())
        .ok_or_else(|| SearchError::BadResponse("missing hits.hits".to_string()))
}

#[async_trait]
impl SearchStore for ElasticStore {
    async fn search_chunks(
        &self,
        domain: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkHit>, SearchError> {
        let body = json!({
            "size": limit,
            "query": {
                "bool": {
                    "must": [
                        { "term": { "domain": domain } },
                        { "match": { "text": query } }
                    ]
                }
            }
        });
        let response = self.search_index(&self.chunk_index, body).await?;
        let hits = hits_of(&response)?;
        Ok(hits
            .iter()
            .filter_map(|hit| hit.get("_source"))
            .filter_map(|src| ChunkHit::from_source(src, &self.vector_field))
            .collect())
    }

    async fn fetch_document(&self, doc_id: &str) -> Result<Option<String>, SearchError> {
        let body = json!({ "query": { "term": { "doc_id": doc_id } } });
        let response = self.search_index(&self.full_index, body).await?;
        let hits = hits_of(&response)?;
        let Some(first) = hits.first() else {
            tracing::debug!("{} not found in {}", doc_id, self.full_index);
            return Ok(None);
        };
        Ok(first
            .get("_source")
            .and_then(|src| src.get("sentences"))
            .and_then(normalize_sentences))
    }
}

/// 内存实现：测试与无 ES 的本地运行用
#[derive(Default)]
pub struct MemorySearchStore {
    chunks: Vec<(String, ChunkHit)>,
    documents: HashMap<String, String>,
}

impl MemorySearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一条 chunk（domain 为其领域标签）
    pub fn with_chunk(mut self, domain: impl Into<String>, chunk: ChunkHit) -> Self {
        self.chunks.push((domain.into(), chunk));
        self
    }

    /// 注册一篇判决原文
    pub fn with_document(mut self, doc_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.documents.insert(doc_id.into(), text.into());
        self
    }
}

#[async_trait]
impl SearchStore for MemorySearchStore {
    async fn search_chunks(
        &self,
        domain: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkHit>, SearchError> {
        // 关键词匹配的内存近似：query 的任一空白分词出现在 chunk 文本里即命中
        let terms: Vec<&str> = query.split_whitespace().collect();
        Ok(self
            .chunks
            .iter()
            .filter(|(d, _)| d == domain)
            .filter(|(_, c)| terms.iter().any(|t| c.text.contains(t)))
            .take(limit)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn fetch_document(&self, doc_id: &str) -> Result<Option<String>, SearchError> {
        Ok(self.documents.get(doc_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_from_source_requires_doc_id() {
        let src = json!({ "text": "본문", "sentences_vector": [0.1, 0.2] });
        assert!(ChunkHit::from_source(&src, "sentences_vector").is_none());

        let src = json!({
            "doc_id": "2020다1234",
            "case_name": "손해배상",
            "text": "본문",
            "sentences_vector": [0.1, 0.2]
        });
        let hit = ChunkHit::from_source(&src, "sentences_vector").unwrap();
        assert_eq!(hit.doc_id, "2020다1234");
        assert_eq!(hit.embedding.as_deref(), Some(&[0.1f32, 0.2][..]));
    }

    #[test]
    fn chunk_without_vector_field_is_kept_without_embedding() {
        let src = json!({ "doc_id": "d1", "text": "본문" });
        let hit = ChunkHit::from_source(&src, "sentences_vector").unwrap();
        assert!(hit.embedding.is_none());
    }

    #[test]
    fn sentences_array_joins_with_newline() {
        let v = json!(["첫 문장.", "둘째 문장."]);
        assert_eq!(
            normalize_sentences(&v).as_deref(),
            Some("첫 문장.\n둘째 문장.")
        );
    }

    #[test]
    fn sentences_string_is_trimmed() {
        let v = json!("  판결 이유는 다음과 같다.  ");
        assert_eq!(
            normalize_sentences(&v).as_deref(),
            Some("판결 이유는 다음과 같다.")
        );
    }

    #[test]
    fn sentences_other_shapes_are_absent() {
        assert_eq!(normalize_sentences(&json!(42)), None);
        assert_eq!(normalize_sentences(&json!(null)), None);
        assert_eq!(normalize_sentences(&json!({"a": 1})), None);
        assert_eq!(normalize_sentences(&json!("")), None);
    }
}
