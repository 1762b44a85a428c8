//! LLM 对话阶段分类器
//!
//! 只在会话处于 free_chat 时调用，判定这一轮该进入哪个阶段。
//! 输出解析失败（MalformedGeneration）就地降级为 free_chat；
//! 后端不可达 / 超时则上抛，让整个回合按失败处理、会话不动。

use serde::Deserialize;

use crate::dialogue::{extract_json, Mode};
use crate::llm::{complete_with_timeout, LlmClient, LlmError};
use crate::memory::Message;

/// 分类结果
#[derive(Debug, Clone)]
pub struct Classification {
    pub next_mode: Mode,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    next_mode: String,
    #[serde(default)]
    reason: Option<String>,
}

/// 阶段判定；解析不动的输出一律落回 free_chat，绝不让回合崩掉
pub async fn classify(
    llm: &dyn LlmClient,
    query: &str,
    context: &str,
    domain: &str,
    request_timeout_secs: u64,
) -> Result<Classification, LlmError> {
    let prompt = format!(
        r#"당신은 법률 상담 대화의 단계 판별을 담당하는 에이전트입니다.

아래 대화 기록을 보고, 현재 사용자가 어떤 단계에 해당하는지 판단하세요.

---
지금까지의 대화:
{context}

사용자 입력: "{query}"
분야: {domain}
---

가능한 단계:
- "free_chat": 일반 법률 질의나 정보 탐색
- "info_gathering": 사용자가 실제 사건/사례를 이야기하고 있으며, 후속 질문을 통해 상황 파악이 필요한 단계
- "advising": 실제 사건/사례에 대한 정보가 충분하여 법적 판단이나 판례 조언이 필요한 단계
- "guidance": 법적 판단이 끝나고, 실질적 행동/절차 안내가 필요한 단계

---
출력(JSON):
{{
  "next_mode": "free_chat" | "info_gathering" | "advising" | "guidance",
  "reason": "판단 근거 간략히"
}}"#
    );

    let messages = [Message::user(prompt)];
    let raw = complete_with_timeout(llm, &messages, request_timeout_secs).await?;
    Ok(parse_classification(&raw))
}

/// 严格解析 + 文档化的降级值：认不出时 free_chat
fn parse_classification(raw: &str) -> Classification {
    let parsed = extract_json(raw)
        .and_then(|json| serde_json::from_str::<RawClassification>(json).ok())
        .and_then(|r| {
            Mode::parse(&r.next_mode).map(|mode| Classification {
                next_mode: mode,
                reason: r.reason.unwrap_or_default(),
            })
        });

    match parsed {
        Some(c) => c,
        None => {
            tracing::warn!("mode classifier output unparsable, defaulting to free_chat");
            Classification {
                next_mode: Mode::FreeChat,
                reason: "판단 실패".to_string(),
            }
        }
    }
}
