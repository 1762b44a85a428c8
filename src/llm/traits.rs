//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式 Token）。

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::memory::Message;

/// LLM 调用错误
#[derive(Error, Debug)]
pub enum LlmError {
    /// 请求或流在配置的时限内没有完成
    #[error("llm request timed out")]
    Timeout,

    /// 端点不可达或返回错误
    #[error("llm api error: {0}")]
    Api(String),

    /// 需要结构化输出的场合模型给了无法解析的文本；产生处就地降级，不上抛
    #[error("malformed llm output: {0}")]
    Malformed(String),
}

/// 流式完成产出的 Token 流
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM 客户端 trait：非流式完成与流式完成（返回 Token 流）
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 流式完成，返回 Token 流；末尾以流结束标记终止
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError>;
}

/// 带超时的非流式完成；超时一律折算为 LlmError::Timeout
pub async fn complete_with_timeout(
    llm: &dyn LlmClient,
    messages: &[Message],
    timeout_secs: u64,
) -> Result<String, LlmError> {
    tokio::time::timeout(Duration::from_secs(timeout_secs), llm.complete(messages))
        .await
        .map_err(|_| LlmError::Timeout)?
}

/// 带超时的流式完成（超时只约束流的建立，逐 Token 的读超时由消费方控制）
pub async fn stream_with_timeout(
    llm: &dyn LlmClient,
    messages: &[Message],
    timeout_secs: u64,
) -> Result<TokenStream, LlmError> {
    tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        llm.complete_stream(messages),
    )
    .await
    .map_err(|_| LlmError::Timeout)?
}
