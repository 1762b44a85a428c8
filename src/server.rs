//! HTTP 服务
//!
//! 两个聊天入口：`POST /api/chat`（一次性 JSON）与 `POST /api/chat/stream`（SSE）。
//! SSE 帧：每增量一条 `data: {"token": ...}`，收尾 `data: {"full": ...}` 与
//! `data: [DONE]`；失败时改发 `data: {"error": ...}` 再 `data: [DONE]`。
//!
//! 回合在独立任务里执行：客户端中途断开不会取消生成，累积文本照常落入会话并
//! 回传记录服务（断流不丢回合）。记录服务失败只记日志，永不阻塞用户侧响应。

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::config::PersistenceSection;
use crate::dialogue::{ModeController, TurnOutcome, TurnRequest};
use crate::error::PipelineError;
use crate::search::Reference;

pub struct AppState {
    pub controller: Arc<ModeController>,
    pub persistence: PersistenceSection,
    /// 记录服务回调用
    pub http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    pub domain: String,
    #[serde(default)]
    pub conv_idx: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub role: &'static str,
    pub content: String,
    pub conv_idx: String,
    pub current_mode: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", post(api_chat_stream))
        .with_state(state)
}

/// GET /：存活探针
async fn root() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "hellaw" }))
}

/// 请求里没带 conv_idx 就现发一个，响应里回传给调用方
fn resolve_conv_idx(conv_idx: Option<String>) -> String {
    conv_idx
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn auth_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// POST /api/chat：非流式回合
async fn api_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let question = req.question.trim().to_string();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "question is required".to_string()));
    }

    let turn = TurnRequest {
        conversation_id: resolve_conv_idx(req.conv_idx),
        question,
        domain: req.domain,
    };

    let outcome = state.controller.run_turn(&turn, None).await.map_err(|e| {
        tracing::warn!("turn failed: {}", e);
        (StatusCode::BAD_GATEWAY, e.user_message().to_string())
    })?;

    spawn_persist(&state, auth_header(&headers), &turn.question, &outcome);

    Ok(Json(ChatResponse {
        role: "assistant",
        content: outcome.message,
        conv_idx: outcome.conversation_id,
        current_mode: outcome.mode.as_str().to_string(),
        references: outcome.references,
    }))
}

/// SSE 消费阶段：先读尽 Token 通道，再取回合结果，最后补终止标记
enum StreamPhase {
    Tokens {
        rx: mpsc::UnboundedReceiver<String>,
        done: oneshot::Receiver<Result<TurnOutcome, PipelineError>>,
    },
    Terminator,
    Closed,
}

/// POST /api/chat/stream：流式回合
async fn api_chat_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let question = req.question.trim().to_string();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "question is required".to_string()));
    }

    let turn = TurnRequest {
        conversation_id: resolve_conv_idx(req.conv_idx),
        question,
        domain: req.domain,
    };

    let (token_tx, token_rx) = mpsc::unbounded_channel::<String>();
    let (done_tx, done_rx) = oneshot::channel::<Result<TurnOutcome, PipelineError>>();

    let controller = Arc::clone(&state.controller);
    let persist_state = Arc::clone(&state);
    let auth = auth_header(&headers);
    tokio::spawn(async move {
        let result = controller.run_turn(&turn, Some(&token_tx)).await;
        // 先关 Token 通道：消费端读到 None 后才去取结果，Token 不会丢也不会乱序
        drop(token_tx);
        if let Ok(ref outcome) = result {
            spawn_persist(&persist_state, auth, &turn.question, outcome);
        }
        let _ = done_tx.send(result);
    });

    let events = stream::unfold(
        StreamPhase::Tokens {
            rx: token_rx,
            done: done_rx,
        },
        |phase| async move {
            match phase {
                StreamPhase::Tokens { mut rx, done } => match rx.recv().await {
                    Some(token) => {
                        let event =
                            Event::default().data(json!({ "token": token }).to_string());
                        Some((Ok(event), StreamPhase::Tokens { rx, done }))
                    }
                    None => {
                        let event = match done.await {
                            Ok(Ok(outcome)) => {
                                Event::default().data(json!({ "full": outcome.message }).to_string())
                            }
                            Ok(Err(e)) => {
                                tracing::warn!("streamed turn failed: {}", e);
                                Event::default()
                                    .data(json!({ "error": e.user_message() }).to_string())
                            }
                            Err(_) => Event::default()
                                .data(json!({ "error": "internal error" }).to_string()),
                        };
                        Some((Ok(event), StreamPhase::Terminator))
                    }
                },
                StreamPhase::Terminator => {
                    Some((Ok(Event::default().data("[DONE]")), StreamPhase::Closed))
                }
                StreamPhase::Closed => None,
            }
        },
    );

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// 回合落库（Spring 记录服务）：后台发送，失败记 warn，不影响响应
fn spawn_persist(state: &Arc<AppState>, auth: Option<String>, question: &str, outcome: &TurnOutcome) {
    let Some(base_url) = state.persistence.base_url.clone() else {
        return;
    };
    let http = state.http.clone();
    let timeout_secs = state.persistence.timeout_secs;
    let payload = json!({
        "conv_idx": outcome.conversation_id,
        "question": question,
        "answer": outcome.message,
    });

    tokio::spawn(async move {
        let mut request = http
            .post(format!("{}/save", base_url.trim_end_matches('/')))
            .timeout(Duration::from_secs(timeout_secs))
            .json(&payload);
        if let Some(auth) = auth {
            request = request.header(header::AUTHORIZATION, auth);
        }
        match request.send().await {
            Ok(res) if !res.status().is_success() => {
                tracing::warn!("record store save failed: {}", res.status());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("record store unreachable: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_conv_idx_generates_when_missing() {
        let generated = resolve_conv_idx(None);
        assert!(!generated.is_empty());
        let generated2 = resolve_conv_idx(Some(String::new()));
        assert!(!generated2.is_empty());
        assert_ne!(generated, generated2);
    }

    #[test]
    fn resolve_conv_idx_keeps_existing() {
        assert_eq!(
            resolve_conv_idx(Some("conv-1".to_string())),
            "conv-1".to_string()
        );
    }
}
