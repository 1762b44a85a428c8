//! 行为智能体：free_chat / info_gathering / advising / guidance
//!
//! 都是薄薄的一层：拼提示词、调 LLM、把增量 Token 转发给 sink 并累积成完整应答。
//! 控制流信号（ready_for_advice 等）走结构化侧信道，不靠在流式文本里找子串。

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::dialogue::{domain_checklist, extract_json, Mode};
use crate::error::PipelineError;
use crate::llm::{complete_with_timeout, stream_with_timeout, LlmClient, LlmError};
use crate::memory::Message;
use crate::search::{HybridRetriever, QuerySummarizer, Reference};

/// 逐 Token 转发通道；None 表示调用方不要流式输出
pub type TokenSink = mpsc::UnboundedSender<String>;

/// 检索不到判例时的固定回复
pub const NO_CASE_FOUND: &str = "관련된 판례를 찾지 못했습니다.";

#[derive(Debug, Clone)]
pub struct AgentTimeouts {
    pub request_secs: u64,
    pub stream_secs: u64,
}

/// info_gathering 的结构化裁决（流式文本之外的侧信道）
#[derive(Debug, Clone)]
pub struct InfoGatheringResult {
    pub message: String,
    pub ready_for_advice: bool,
    /// 智能体自报的下一阶段，仅供日志参考；控制器不采信
    pub next_state: Mode,
}

#[derive(Debug, Deserialize)]
struct RawInfoGathering {
    message: String,
    #[serde(default)]
    ready_for_advice: bool,
    #[serde(default)]
    next_state: Option<String>,
}

/// advising 的产出：建议正文 + 实际用于检索的查询句 + 引用的判例
#[derive(Debug, Clone)]
pub struct AdviceResult {
    pub advice: String,
    pub search_query: String,
    pub references: Vec<Reference>,
}

pub struct BehaviorAgents {
    llm: Arc<dyn LlmClient>,
    retriever: Arc<HybridRetriever>,
    summarizer: QuerySummarizer,
    timeouts: AgentTimeouts,
}

impl BehaviorAgents {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        retriever: Arc<HybridRetriever>,
        summarizer: QuerySummarizer,
        timeouts: AgentTimeouts,
    ) -> Self {
        Self {
            llm,
            retriever,
            summarizer,
            timeouts,
        }
    }

    /// 流式完成：逐 Token 转发给 sink（有的话）并累积；返回完整文本。
    /// 流建立受 request 超时约束，单个增量受 stream 超时约束。
    async fn stream_reply(
        &self,
        messages: &[Message],
        sink: Option<&TokenSink>,
    ) -> Result<String, LlmError> {
        let mut stream =
            stream_with_timeout(self.llm.as_ref(), messages, self.timeouts.request_secs).await?;
        let mut accumulated = String::new();
        loop {
            let next =
                tokio::time::timeout(Duration::from_secs(self.timeouts.stream_secs), stream.next())
                    .await;
            match next {
                Err(_) => return Err(LlmError::Timeout),
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(token))) => {
                    if token.is_empty() {
                        continue;
                    }
                    accumulated.push_str(&token);
                    if let Some(sink) = sink {
                        // 客户端断开只意味着没人收，回合照常跑完
                        let _ = sink.send(token);
                    }
                }
            }
        }
        Ok(accumulated)
    }

    /// 自由法律问答
    pub async fn free_chat(
        &self,
        query: &str,
        context: &str,
        domain: &str,
        sink: Option<&TokenSink>,
    ) -> Result<String, LlmError> {
        let system = format!(
            r#"당신은 {domain} 분야를 포함한 다양한 법률 지식을 가진 전문 상담사입니다.
사용자의 질문에 대해 법률 용어나 절차를 이해하기 쉽게 설명해주세요.

- 너무 형식적인 문체는 피하고, 상담하듯 자연스럽게 답변하세요.
- 필요시 참고할 만한 법 조항을 인용하되, 쉬운 용어 설명을 덧붙이세요.
- 지나치게 단정하지 말고 "일반적으로는 ~" 같은 표현을 사용하세요.
- 지나치게 길게 말하지 마세요.

--- 지금까지의 대화 ---
{context}"#
        );
        let messages = [Message::system(system), Message::user(query.to_string())];
        self.stream_reply(&messages, sink).await
    }

    /// 事件信息收集：非流式结构化完成，message 由控制器作为单条增量下发
    pub async fn info_gathering(
        &self,
        query: &str,
        context: &str,
        domain: &str,
    ) -> Result<InfoGatheringResult, LlmError> {
        let checklist = domain_checklist(domain).join(", ");
        let prompt = format!(
            r#"당신은 {domain} 분야의 전문 법률 상담사입니다.
사용자의 발화를 근거로, 사건 파악을 위해 필요한 질문을 던지거나
충분한 정보가 모였는지를 판단하세요.

---
지금까지의 대화:
{context}

새 사용자 발화:
"{query}"
---

판단 기준:
- 아래 항목이 모두 충족되어야 'ready_for_advice = true' 로 간주합니다.
  ({checklist})
- 정보가 대부분 확보되었거나, 상황의 핵심이 이미 드러난 경우에도 true로 판단하세요.
- 단순히 피해 사실만 언급했을 경우에는 false입니다.

---
임무:
1. 우선 사용자의 상황을 2~3문장 정도로 요약하고 공감해주세요.
2. 다음 중 하나를 수행하세요:
   - 정보 부족 → 판단 기준을 바탕으로 추가 질문을 제시하세요.
   - 충분함 → 실제 조언은 하지 말고, "이제 법적 판단을 도와드릴 수 있을 것 같습니다." 같은 멘트로 마무리하세요.
   (조언은 이후 별도의 모듈이 담당합니다.)

---
출력(JSON만):
{{
  "message": "사용자에게 보낼 자연스러운 문장",
  "ready_for_advice": true or false,
  "next_state": "info_gathering" 또는 "advising"
}}"#
        );

        let messages = [Message::user(prompt)];
        let raw =
            complete_with_timeout(self.llm.as_ref(), &messages, self.timeouts.request_secs).await?;
        Ok(parse_info_gathering(&raw))
    }

    /// 判例检索 + 建议生成。检索后端故障上抛（与"没有判例"区分开）；
    /// 零判例时下发固定提示语，回合仍算成功。
    pub async fn advising(
        &self,
        query: &str,
        context: &str,
        domain: &str,
        sink: Option<&TokenSink>,
    ) -> Result<AdviceResult, PipelineError> {
        let search_query = self.summarizer.summarize(context, query).await;
        tracing::info!("advising search query: {}", search_query);

        let references = self
            .retriever
            .retrieve_references(&search_query, domain)
            .await?;

        if references.is_empty() {
            if let Some(sink) = sink {
                let _ = sink.send(NO_CASE_FOUND.to_string());
            }
            return Ok(AdviceResult {
                advice: NO_CASE_FOUND.to_string(),
                search_query,
                references,
            });
        }

        let docs_text = references
            .iter()
            .map(|r| format!("{} ({})\n{}", r.case_name, r.doc_id, r.excerpt))
            .collect::<Vec<_>>()
            .join("\n\n");

        let system = format!(
            r#"당신은 {domain} 분야의 전문 법률 조력자입니다.

다음은 사용자와의 대화 요약입니다:
{context}

아래는 참고할 수 있는 판결문입니다:
{docs_text}

## 임무
- 사용자의 상황과 가장 유사한 판례를 중심으로 조언을 제공합니다.
- 먼저 판례의 내용을 간단하게 요약합니다.
- 반드시 판례의 일부 문장을 인용해 근거를 제시하며, 인용한 판례의 사건번호를 명시합니다.
- 400~500자 내외로 자연스럽게 작성합니다.
- 판례가 상황과 다르면 인용하지 않습니다."#
        );
        let messages = [Message::system(system), Message::user(query.to_string())];
        let advice = self.stream_reply(&messages, sink).await?;

        Ok(AdviceResult {
            advice,
            search_query,
            references,
        })
    }

    /// 把直前建议落成可执行的行动方案
    pub async fn guidance(
        &self,
        advice_text: &str,
        context: &str,
        domain: &str,
        sink: Option<&TokenSink>,
    ) -> Result<String, LlmError> {
        let system = format!(
            r#"당신은 {domain} 분야의 전문 법률 조력자입니다.

지금까지의 상담 맥락:
{context}

---
직전 법률 조언:
{advice_text}
---

임무:
1. 위 조언을 바탕으로 사용자가 실제로 취할 수 있는 구체적인 '행동 단계'를 안내하세요.
   - 행동: 예) 내용증명 발송, 증거 수집, 소송 제기 등
   - 준비: 필요한 서류, 증거, 기관 등
   - 주의: 법적 시한, 비용, 실수 방지 팁 등
2. 단계별로 친절하게 제시하고, 법률 용어를 쉽게 풀어서 설명하세요.
3. 사용자의 후속 질문 가능성을 고려해 "궁금하신 부분이 있나요?"로 마무리하세요."#
        );
        let messages = [
            Message::system(system),
            Message::user("실행 방안을 안내해주세요.".to_string()),
        ];
        self.stream_reply(&messages, sink).await
    }
}

/// 严格解析 + 文档化的降级值：message 取原文、ready=false、next_state=info_gathering
fn parse_info_gathering(raw: &str) -> InfoGatheringResult {
    let parsed = extract_json(raw)
        .and_then(|json| serde_json::from_str::<RawInfoGathering>(json).ok())
        .map(|r| InfoGatheringResult {
            message: r.message,
            ready_for_advice: r.ready_for_advice,
            next_state: r
                .next_state
                .as_deref()
                .and_then(Mode::parse)
                .unwrap_or(Mode::InfoGathering),
        });

    match parsed {
        Some(result) => result,
        None => {
            tracing::warn!("info_gathering output unparsable, falling back to raw text");
            InfoGatheringResult {
                message: raw.trim().to_string(),
                ready_for_advice: false,
                next_state: Mode::InfoGathering,
            }
        }
    }
}
