//! 模式控制器：对话状态机
//!
//! 每个用户回合走一遍：定模式 → 派发行为智能体（可能链式多个）→ 成功后一次性落盘。
//! 模式判定规则（会话里的模式为准，智能体自报的 next_state 只是参考）：
//! - free_chat：每次都让分类器重新判定本轮该进入哪个阶段（free_chat 是所有
//!   流程的入口，不重判就永远出不去）；分类器输出认不出时落回 free_chat。
//! - info_gathering / advising / guidance：沿用会话里挂着的模式，不再分类。
//! 转移：info_gathering 收齐信息后同一回合内链式执行 advising + guidance 并回到
//! free_chat；单独的 advising / guidance 结束后也回到 free_chat。
//!
//! 失败语义：任何派发失败（LLM / 检索后端）直接上抛，这一回合不写入历史、
//! 不动模式，重试可从失败前的状态续上。

use std::sync::Arc;

use crate::dialogue::{classifier, BehaviorAgents, Mode, TokenSink};
use crate::error::PipelineError;
use crate::llm::LlmClient;
use crate::memory::SessionStore;
use crate::search::Reference;

/// 一个用户回合的输入
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub question: String,
    pub domain: String,
}

/// 回合产出：完整应答、引用的判例、落盘后的模式
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub message: String,
    pub references: Vec<Reference>,
    pub mode: Mode,
}

pub struct ModeController {
    sessions: Arc<SessionStore>,
    llm: Arc<dyn LlmClient>,
    agents: BehaviorAgents,
    request_timeout_secs: u64,
}

impl ModeController {
    pub fn new(
        sessions: Arc<SessionStore>,
        llm: Arc<dyn LlmClient>,
        agents: BehaviorAgents,
        request_timeout_secs: u64,
    ) -> Self {
        Self {
            sessions,
            llm,
            agents,
            request_timeout_secs,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// 跑一个完整回合。sink 给了就逐 Token 转发（流式接口），None 则只要最终文本。
    ///
    /// 上下文快照在追加本轮发话之前截取：user/assistant 两条都在回合成功后
    /// 才一并写入（失败的回合不留痕）。
    pub async fn run_turn(
        &self,
        req: &TurnRequest,
        sink: Option<&TokenSink>,
    ) -> Result<TurnOutcome, PipelineError> {
        let conv = &req.conversation_id;
        let context = self.sessions.context(conv);
        let held = self.sessions.mode(conv);

        let current = if held == Mode::FreeChat {
            let classification = classifier::classify(
                self.llm.as_ref(),
                &req.question,
                &context,
                &req.domain,
                self.request_timeout_secs,
            )
            .await?;
            tracing::info!(
                "[mode -> {}] {}",
                classification.next_mode,
                classification.reason
            );
            classification.next_mode
        } else {
            held
        };

        let (message, references, next_mode) = match current {
            Mode::FreeChat => {
                let message = self
                    .agents
                    .free_chat(&req.question, &context, &req.domain, sink)
                    .await?;
                (message, Vec::new(), Mode::FreeChat)
            }

            Mode::InfoGathering => {
                let verdict = self
                    .agents
                    .info_gathering(&req.question, &context, &req.domain)
                    .await?;
                tracing::debug!(
                    "info_gathering ready={} self-reported next={}",
                    verdict.ready_for_advice,
                    verdict.next_state
                );

                if verdict.ready_for_advice {
                    // 信息收齐：同一回合内链式执行 advising + guidance，应答为两段拼接
                    tracing::info!("checklist satisfied, chaining advising + guidance");
                    let advice = self
                        .agents
                        .advising(&req.question, &context, &req.domain, sink)
                        .await?;
                    if advice.references.is_empty() {
                        // 没有可引用的判例就不做行动引导，只回固定提示
                        (advice.advice, advice.references, Mode::FreeChat)
                    } else {
                        if let Some(sink) = sink {
                            let _ = sink.send("\n".to_string());
                        }
                        let guidance = self
                            .agents
                            .guidance(&advice.advice, &context, &req.domain, sink)
                            .await?;
                        (
                            format!("{}\n{}", advice.advice, guidance),
                            advice.references,
                            Mode::FreeChat,
                        )
                    }
                } else {
                    // 信息不够：追问并停在 info_gathering
                    if let Some(sink) = sink {
                        let _ = sink.send(verdict.message.clone());
                    }
                    (verdict.message, Vec::new(), Mode::InfoGathering)
                }
            }

            Mode::Advising => {
                let advice = self
                    .agents
                    .advising(&req.question, &context, &req.domain, sink)
                    .await?;
                (advice.advice, advice.references, Mode::FreeChat)
            }

            Mode::Guidance => {
                let advice_text = self.sessions.last_assistant(conv).unwrap_or_default();
                let message = self
                    .agents
                    .guidance(&advice_text, &context, &req.domain, sink)
                    .await?;
                (message, Vec::new(), Mode::FreeChat)
            }
        };

        // 成功才落盘：user + assistant + 下一模式，一次提交
        self.sessions
            .commit_turn(conv, &req.question, &message, next_mode);
        tracing::info!("mode transition: {} -> {}", current, next_mode);

        Ok(TurnOutcome {
            conversation_id: conv.clone(),
            message,
            references,
            mode: next_mode,
        })
    }
}
