//! 管道错误类型
//!
//! 四类故障的归宿：检索空结果不是错误（返回空序列）；后端不可达 / 超时在这里聚合后
//! 上抛给调用方，回合不落盘；结构化输出解析失败（MalformedGeneration）在产生它的
//! 组件内部降级处理，不会出现在这里；原文缺失按 None 跳过。

use thiserror::Error;

use crate::llm::LlmError;
use crate::search::SearchError;

/// 一次对话回合可能对外暴露的错误（会话状态保持回合开始前的样子，重试可直接续上）
#[derive(Error, Debug)]
pub enum PipelineError {
    /// 生成后端不可达、超时或返回异常
    #[error("llm backend error: {0}")]
    Llm(#[from] LlmError),

    /// 判例检索后端不可达或超时（区别于"没有命中判例"）
    #[error("search backend error: {0}")]
    Search(#[from] SearchError),
}

impl PipelineError {
    /// 面向用户的韩语提示语（SSE error 事件用）
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::Llm(_) => "답변 생성에 실패했습니다. 잠시 후 다시 시도해주세요.",
            PipelineError::Search(_) => "판례 검색 서비스를 일시적으로 이용할 수 없습니다.",
        }
    }
}
