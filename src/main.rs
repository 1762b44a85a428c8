//! Hellaw 服务入口
//!
//! 启动: cargo run
//! 健康检查: curl http://127.0.0.1:8000/

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hellaw::config::load_config;
use hellaw::dialogue::{AgentTimeouts, BehaviorAgents, ModeController};
use hellaw::llm::{create_embedder_from_config, create_llm_from_config};
use hellaw::memory::SessionStore;
use hellaw::search::{ElasticStore, HybridRetriever, QuerySummarizer, RetrievalLimits};
use hellaw::server::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).unwrap_or_default();

    let llm = create_llm_from_config(&cfg);
    let embedder = create_embedder_from_config(&cfg);

    let store = ElasticStore::from_config(&cfg.search)
        .map_err(|e| anyhow::anyhow!("search store init failed: {}", e))?;
    let retriever = Arc::new(HybridRetriever::new(
        Arc::new(store),
        embedder,
        RetrievalLimits {
            candidate_limit: cfg.search.candidate_limit,
            top_n: cfg.search.top_n,
            excerpt_chars: cfg.search.excerpt_chars,
        },
    ));

    let summarizer = QuerySummarizer::new(llm.clone(), cfg.llm.timeouts.request);
    let agents = BehaviorAgents::new(
        llm.clone(),
        retriever,
        summarizer,
        AgentTimeouts {
            request_secs: cfg.llm.timeouts.request,
            stream_secs: cfg.llm.timeouts.stream,
        },
    );

    let sessions = Arc::new(SessionStore::new(cfg.app.max_context_turns));
    let controller = Arc::new(ModeController::new(
        sessions,
        llm,
        agents,
        cfg.llm.timeouts.request,
    ));

    let state = Arc::new(AppState {
        controller,
        persistence: cfg.persistence.clone(),
        http: reqwest::Client::new(),
    });

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    tracing::info!("hellaw listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
