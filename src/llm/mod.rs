//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、嵌入客户端

pub mod deepseek;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use embedding::{EmbeddingProvider, OpenAiEmbedder};
pub use mock::{MockEmbedder, MockLlmClient};
pub use openai::OpenAiClient;
pub use traits::{complete_with_timeout, stream_with_timeout, LlmClient, LlmError, TokenStream};

use crate::config::AppConfig;

/// 按配置与可用 Key 选择 LLM 后端；都没有就退到 Mock（本地跑通用）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    // 有 DeepSeek Key 或（配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点）
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if provider == "mock" {
        tracing::warn!("Using Mock LLM by config");
        Arc::new(MockLlmClient::new())
    } else if use_deepseek {
        let model = cfg.llm.model.clone();
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(create_deepseek_client(Some(&model)))
    } else if use_openai {
        let model = cfg.llm.model.clone();
        let base = cfg.llm.base_url.as_deref();
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(OpenAiClient::new(
            base,
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

/// 按配置创建嵌入客户端（与 LLM 共用 OPENAI_API_KEY）
pub fn create_embedder_from_config(cfg: &AppConfig) -> Arc<dyn EmbeddingProvider> {
    Arc::new(OpenAiEmbedder::new(
        cfg.embedding.base_url.as_deref(),
        &cfg.embedding.model,
        std::env::var("OPENAI_API_KEY").ok().as_deref(),
    ))
}
