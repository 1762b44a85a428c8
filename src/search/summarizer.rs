//! 检索用查询摘要器
//!
//! 把多轮对话 + 最新发话压缩成一句面向检索的陈述句（主体 / 行为 / 结果 / 争点）。
//! 只被检索引擎的调用方（advising）消费。

use std::sync::Arc;

use crate::llm::{complete_with_timeout, LlmClient};
use crate::memory::Message;

pub struct QuerySummarizer {
    llm: Arc<dyn LlmClient>,
    request_timeout_secs: u64,
}

impl QuerySummarizer {
    pub fn new(llm: Arc<dyn LlmClient>, request_timeout_secs: u64) -> Self {
        Self {
            llm,
            request_timeout_secs,
        }
    }

    /// 产出永远非空：后端失败或给了空串时回退为 latest_query 原文
    pub async fn summarize(&self, context: &str, latest_query: &str) -> String {
        let prompt = format!(
            r#"당신은 법률 AI 상담사입니다.
아래는 지금까지의 사용자와의 대화 내용입니다.

{context}

사용자의 최신 발화: "{latest_query}"

## 임무
1. 전체 대화를 바탕으로 사용자가 실제로 묻고 있는 법적 문제 상황을 1문장으로 요약하세요.
2. 판결문 검색을 위해 구체적인 문장으로 표현해야 합니다.
   - 주체(누가): 예) 보행자, 운전자, 임대인, 근로자 등
   - 행위(무엇을 했는가): 예) 신호위반, 계약 위반, 부당해고 등
   - 결과(어떤 일이 발생했는가): 예) 교통사고 발생, 손해배상 청구 등
   - 쟁점(법적으로 알고 싶은 핵심): 예) 과실비율, 책임 범위, 손해액 산정 등
3. 존칭이나 불필요한 문장은 넣지 말고, 구체적이지만 짧은 자연스러운 서술문 형태로 작성하세요.
4. 검색 엔진이 이해하기 쉽도록 문어체를 사용하세요.

## 출력 형식 예시
- 보행자가 빨간불에 횡단보도를 건너다 좌회전 차량과 충돌한 사고에서 과실비율 판단
- 임차인이 월세를 연체하여 계약이 해지된 경우 보증금 반환 범위
- 근로자가 정당한 이유 없이 해고된 경우 부당해고 인정 여부

출력:"#
        );

        let messages = [Message::user(prompt)];
        match complete_with_timeout(self.llm.as_ref(), &messages, self.request_timeout_secs).await {
            Ok(summary) => {
                let summary = summary.trim();
                if summary.is_empty() {
                    tracing::warn!("query summarizer returned empty, echoing latest query");
                    latest_query.to_string()
                } else {
                    summary.to_string()
                }
            }
            Err(e) => {
                tracing::warn!("query summarizer failed ({}), echoing latest query", e);
                latest_query.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn uses_backend_summary_when_available() {
        let llm = Arc::new(MockLlmClient::with_responses([
            "보행자가 신호위반 차량과 충돌한 사고에서 과실비율 판단",
        ]));
        let summarizer = QuerySummarizer::new(llm, 5);
        let out = summarizer.summarize("USER: ...", "과실비율이 궁금해요").await;
        assert_eq!(out, "보행자가 신호위반 차량과 충돌한 사고에서 과실비율 판단");
    }

    #[tokio::test]
    async fn empty_backend_output_falls_back_to_latest_query() {
        let llm = Arc::new(MockLlmClient::with_responses(["   "]));
        let summarizer = QuerySummarizer::new(llm, 5);
        let out = summarizer.summarize("", "과실비율이 궁금해요").await;
        assert_eq!(out, "과실비율이 궁금해요");
    }
}
