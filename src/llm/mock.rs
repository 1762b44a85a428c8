//! Mock LLM 客户端（用于测试与无 Key 的本地运行）
//!
//! 可预置应答脚本（按顺序弹出）；脚本耗尽后回显最后一条 User 消息。
//! 流式接口把应答按字符切成小块，走与真实后端一致的逐 Token 路径。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{EmbeddingProvider, LlmClient, LlmError, TokenStream};
use crate::memory::{Message, Role};

/// Mock 客户端：按脚本应答，脚本耗尽后回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一串应答，complete / complete_stream 按调用顺序消费
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }

    /// 追加一条应答到脚本末尾
    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(response.into());
    }

    fn next_response(&self, messages: &[Message]) -> String {
        if let Some(scripted) = self.responses.lock().unwrap().pop_front() {
            return scripted;
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        format!("Echo from Mock: {}", last_user)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        Ok(self.next_response(messages))
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let content = self.next_response(messages);
        // 每 4 个字符一块，模拟增量输出
        let chunks: Vec<Result<String, LlmError>> = content
            .chars()
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|c| Ok(c.iter().collect::<String>()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Mock 嵌入器：按整串文本查表，查不到用默认向量
///
/// 检索测试里给每个 chunk 和查询各配一个向量，余弦排序就完全可控。
#[derive(Debug, Default)]
pub struct MockEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
}

impl MockEmbedder {
    pub fn new(fallback: Vec<f32>) -> Self {
        Self {
            vectors: HashMap::new(),
            fallback,
        }
    }

    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}
