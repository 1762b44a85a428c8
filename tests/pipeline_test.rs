//! 对话管道集成测试
//!
//! 用脚本化 Mock LLM + 内存文档存储把整条回合流程跑通：
//! 阶段分类、信息收集自环、收齐后的 advising + guidance 链、失败回合不落盘。

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use hellaw::dialogue::{
        AgentTimeouts, BehaviorAgents, Mode, ModeController, TurnRequest, NO_CASE_FOUND,
    };
    use hellaw::llm::{LlmClient, LlmError, MockEmbedder, MockLlmClient, TokenStream};
    use hellaw::memory::{Message, SessionStore};
    use hellaw::search::{
        ChunkHit, HybridRetriever, MemorySearchStore, QuerySummarizer, RetrievalLimits,
    };

    /// 总是失败的后端：验证失败回合不动会话
    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
            Err(LlmError::Api("connection refused".to_string()))
        }

        async fn complete_stream(&self, _messages: &[Message]) -> Result<TokenStream, LlmError> {
            Err(LlmError::Api("connection refused".to_string()))
        }
    }

    fn traffic_store() -> MemorySearchStore {
        MemorySearchStore::new()
            .with_chunk(
                "교통사고",
                ChunkHit {
                    doc_id: "2019나1234".to_string(),
                    case_name: Some("손해배상(자)".to_string()),
                    text: "보행자 신호위반 과실비율 판단".to_string(),
                    embedding: Some(vec![1.0, 0.0]),
                },
            )
            .with_chunk(
                "교통사고",
                ChunkHit {
                    doc_id: "2020가5678".to_string(),
                    case_name: Some("구상금".to_string()),
                    text: "차량 간 충돌 과실비율 산정".to_string(),
                    embedding: Some(vec![0.7, 0.3]),
                },
            )
            .with_document("2019나1234", "원심은 보행자의 과실을 30%로 보았다.")
            .with_document("2020가5678", "쌍방 과실이 경합한 사안이다.")
    }

    fn build_controller(llm: Arc<dyn LlmClient>, store: MemorySearchStore) -> ModeController {
        let embedder = Arc::new(MockEmbedder::new(vec![1.0, 0.0]));
        let retriever = Arc::new(HybridRetriever::new(
            Arc::new(store),
            embedder,
            RetrievalLimits::default(),
        ));
        let summarizer = QuerySummarizer::new(llm.clone(), 5);
        let agents = BehaviorAgents::new(
            llm.clone(),
            retriever,
            summarizer,
            AgentTimeouts {
                request_secs: 5,
                stream_secs: 5,
            },
        );
        ModeController::new(Arc::new(SessionStore::new(15)), llm, agents, 5)
    }

    fn turn(conv: &str, question: &str) -> TurnRequest {
        TurnRequest {
            conversation_id: conv.to_string(),
            question: question.to_string(),
            domain: "교통사고".to_string(),
        }
    }

    #[tokio::test]
    async fn first_turn_classification_adopts_info_gathering() {
        let llm = Arc::new(MockLlmClient::with_responses([
            // 分类器
            r#"{"next_mode": "info_gathering", "reason": "사건 서술 시작"}"#,
            // info_gathering 裁决
            r#"{"message": "사고 경위를 더 알려주세요.", "ready_for_advice": false, "next_state": "info_gathering"}"#,
        ]));
        let controller = build_controller(llm, traffic_store());

        let outcome = controller
            .run_turn(&turn("c1", "어제 교통사고를 당했어요"), None)
            .await
            .unwrap();

        assert_eq!(outcome.mode, Mode::InfoGathering);
        assert_eq!(controller.sessions().mode("c1"), Mode::InfoGathering);
        assert_eq!(outcome.message, "사고 경위를 더 알려주세요.");
        assert!(outcome.references.is_empty());
    }

    #[tokio::test]
    async fn unsatisfied_checklist_stays_in_info_gathering_across_turns() {
        let llm = Arc::new(MockLlmClient::with_responses([
            r#"{"next_mode": "info_gathering", "reason": "사건 서술"}"#,
            r#"{"message": "사고 유형이 어떻게 되나요?", "ready_for_advice": false, "next_state": "info_gathering"}"#,
            // 第二轮：模式沿用，不再调用分类器
            r#"{"message": "피해 정도를 알려주세요.", "ready_for_advice": false, "next_state": "info_gathering"}"#,
        ]));
        let controller = build_controller(llm, traffic_store());

        let first = controller
            .run_turn(&turn("c1", "교통사고 상담 부탁드립니다"), None)
            .await
            .unwrap();
        assert_eq!(first.mode, Mode::InfoGathering);

        let second = controller
            .run_turn(&turn("c1", "보행 중에 차에 치였어요"), None)
            .await
            .unwrap();
        assert_eq!(second.mode, Mode::InfoGathering);
        assert_eq!(controller.sessions().mode("c1"), Mode::InfoGathering);
        assert_eq!(second.message, "피해 정도를 알려주세요.");
    }

    #[tokio::test]
    async fn ready_turn_chains_advice_and_guidance_then_returns_to_free_chat() {
        let llm = Arc::new(MockLlmClient::with_responses([
            // info_gathering: 信息收齐
            r#"{"message": "이제 법적 판단을 도와드릴 수 있을 것 같습니다.", "ready_for_advice": true, "next_state": "advising"}"#,
            // 检索查询摘要
            "보행자가 신호위반 차량과 충돌한 사고에서 과실비율 판단",
            // advising 正文
            "판례에 따르면 보행자 과실은 30% 수준으로 판단됩니다.",
            // guidance 正文
            "1단계: 경찰 사고기록을 확보하세요. 궁금하신 부분이 있나요?",
        ]));
        let controller = build_controller(llm, traffic_store());
        controller.sessions().set_mode("c1", Mode::InfoGathering);

        let outcome = controller
            .run_turn(&turn("c1", "신호위반 차량이었고 전치 4주입니다"), None)
            .await
            .unwrap();

        // 一轮应答里同时包含建议与行动引导两段
        assert!(outcome.message.contains("30% 수준"));
        assert!(outcome.message.contains("1단계"));
        assert_eq!(outcome.mode, Mode::FreeChat);
        assert_eq!(controller.sessions().mode("c1"), Mode::FreeChat);

        // 参考判例按 doc_id 去重后回填
        assert_eq!(outcome.references.len(), 2);
        assert_ne!(outcome.references[0].doc_id, outcome.references[1].doc_id);
    }

    #[tokio::test]
    async fn ready_turn_without_matching_cases_reports_fixed_notice() {
        let llm = Arc::new(MockLlmClient::with_responses([
            r#"{"message": "정리되었습니다.", "ready_for_advice": true, "next_state": "advising"}"#,
            // 检索查询摘要（与任何 chunk 都不匹配）
            "세입자가 보증금을 돌려받지 못한 사안",
        ]));
        let controller = build_controller(llm, traffic_store());
        controller.sessions().set_mode("c1", Mode::InfoGathering);

        let outcome = controller
            .run_turn(&turn("c1", "이 정도면 충분한가요?"), None)
            .await
            .unwrap();

        assert_eq!(outcome.message, NO_CASE_FOUND);
        assert!(outcome.references.is_empty());
        assert_eq!(outcome.mode, Mode::FreeChat);
    }

    #[tokio::test]
    async fn streamed_tokens_concatenate_to_full_message() {
        let llm = Arc::new(MockLlmClient::with_responses([
            r#"{"next_mode": "free_chat", "reason": "일반 질의"}"#,
            "일반적으로는 합의 전에 과실비율 산정 근거를 확인하는 것이 좋습니다.",
        ]));
        let controller = build_controller(llm, traffic_store());

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let outcome = controller
            .run_turn(&turn("c1", "합의는 언제 하는 게 좋나요?"), Some(&tx))
            .await
            .unwrap();
        drop(tx);

        let mut streamed = String::new();
        while let Some(token) = rx.recv().await {
            streamed.push_str(&token);
        }
        // Token 累积结果与最终消息一字不差
        assert_eq!(streamed, outcome.message);
        assert_eq!(outcome.mode, Mode::FreeChat);
    }

    #[tokio::test]
    async fn malformed_classification_defaults_to_free_chat() {
        let llm = Arc::new(MockLlmClient::with_responses([
            "단계를 모르겠습니다",
            "법률 상담은 구체적인 사실관계가 중요합니다.",
        ]));
        let controller = build_controller(llm, traffic_store());

        let outcome = controller
            .run_turn(&turn("c1", "안녕하세요"), None)
            .await
            .unwrap();
        assert_eq!(outcome.mode, Mode::FreeChat);
        assert_eq!(controller.sessions().mode("c1"), Mode::FreeChat);
    }

    #[tokio::test]
    async fn failed_turn_leaves_session_untouched() {
        // 先用一个正常回合把会话建起来
        let llm = Arc::new(MockLlmClient::with_responses([
            r#"{"next_mode": "info_gathering", "reason": "사건 서술"}"#,
            r#"{"message": "사고 경위를 알려주세요.", "ready_for_advice": false, "next_state": "info_gathering"}"#,
        ]));
        let controller = build_controller(llm, traffic_store());
        controller
            .run_turn(&turn("c1", "사고 상담입니다"), None)
            .await
            .unwrap();

        let context_before = controller.sessions().context("c1");
        let mode_before = controller.sessions().mode("c1");

        // 另一个控制器，这次后端全部失败
        let failing = build_controller(Arc::new(FailingLlm), traffic_store());
        failing.sessions().set_mode("c2", Mode::InfoGathering);
        let err = failing
            .run_turn(&turn("c2", "계속 진행해주세요"), None)
            .await;
        assert!(err.is_err());
        // 失败的回合既不留历史也不动模式
        assert_eq!(failing.sessions().context("c2"), "");
        assert_eq!(failing.sessions().mode("c2"), Mode::InfoGathering);

        // 原有会话原样不动
        assert_eq!(controller.sessions().context("c1"), context_before);
        assert_eq!(controller.sessions().mode("c1"), mode_before);
    }

    #[tokio::test]
    async fn solo_advising_turn_returns_to_free_chat_with_references() {
        let llm = Arc::new(MockLlmClient::with_responses([
            // 分类器直接判到 advising
            r#"{"next_mode": "advising", "reason": "정보 충분"}"#,
            // 检索查询摘要
            "보행자 신호위반 사고의 과실비율 판단",
            // advising 正文
            "유사 판례(2019나1234)에 비추어 과실비율 조정이 가능합니다.",
        ]));
        let controller = build_controller(llm, traffic_store());

        let outcome = controller
            .run_turn(
                &turn("c1", "보행자 신호위반인데 과실비율이 어떻게 되나요?"),
                None,
            )
            .await
            .unwrap();

        assert!(outcome.message.contains("2019나1234"));
        assert!(!outcome.references.is_empty());
        assert_eq!(outcome.mode, Mode::FreeChat);
    }
}
