//! Hellaw - 法律咨询智能体服务
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **dialogue**: 对话状态机（模式分类、行为智能体、回合控制器）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、嵌入客户端
//! - **memory**: 会话记忆（按 conv_idx 隔离的有界对话历史与当前模式）
//! - **search**: 判例混合检索（关键词预筛 + 语义重排 + 去重 + 原文回填）
//! - **server**: HTTP 服务（JSON / SSE 流式接口、Spring 持久化回调）

pub mod config;
pub mod dialogue;
pub mod error;
pub mod llm;
pub mod memory;
pub mod search;
pub mod server;

pub use error::PipelineError;
