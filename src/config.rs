//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HELLAW__*` 覆盖（双下划线表示嵌套，如 `HELLAW__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
}

/// [app] 段：应用名、会话历史上限
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 每会话保留的对话条数（user/assistant 各算一条），超出时先丢最旧的
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_context_turns: default_max_context_turns(),
        }
    }
}

fn default_max_context_turns() -> usize {
    15
}

/// [server] 段：监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
    #[serde(default = "default_stream_timeout")]
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
            stream: default_stream_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

fn default_stream_timeout() -> u64 {
    120
}

/// [embedding] 段：检索用向量编码端点（与 LLM 共用 OPENAI_API_KEY / base_url）
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            base_url: None,
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// [search] 段：Elasticsearch 端点与检索参数
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_search_base_url")]
    pub base_url: String,
    #[serde(default = "default_search_username")]
    pub username: String,
    pub password: Option<String>,
    /// 自建集群常用自签证书
    #[serde(default)]
    pub verify_certs: bool,
    /// chunk 索引（keyword + 向量字段）
    #[serde(default = "default_chunk_index")]
    pub chunk_index: String,
    /// 判决原文索引（按 doc_id 精确查询）
    #[serde(default = "default_full_index")]
    pub full_index: String,
    /// chunk 索引里的向量字段名
    #[serde(default = "default_vector_field")]
    pub vector_field: String,
    /// 一次关键词预筛返回的候选上限
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    /// 去重后保留的判例数
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// 回填原文的摘录长度（字符数）
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            base_url: default_search_base_url(),
            username: default_search_username(),
            password: None,
            verify_certs: false,
            chunk_index: default_chunk_index(),
            full_index: default_full_index(),
            vector_field: default_vector_field(),
            candidate_limit: default_candidate_limit(),
            top_n: default_top_n(),
            excerpt_chars: default_excerpt_chars(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_search_base_url() -> String {
    "http://localhost:9201".to_string()
}

fn default_search_username() -> String {
    "elastic".to_string()
}

fn default_chunk_index() -> String {
    "minsa_data".to_string()
}

fn default_full_index() -> String {
    "minsa_judgement".to_string()
}

fn default_vector_field() -> String {
    "sentences_vector".to_string()
}

fn default_candidate_limit() -> usize {
    500
}

fn default_top_n() -> usize {
    3
}

fn default_excerpt_chars() -> usize {
    800
}

fn default_search_timeout_secs() -> u64 {
    10
}

/// [persistence] 段：Spring 记录服务（对话落库），留空则不回传
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceSection {
    pub base_url: Option<String>,
    #[serde(default = "default_persistence_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_persistence_timeout_secs(),
        }
    }
}

fn default_persistence_timeout_secs() -> u64 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            server: ServerSection::default(),
            llm: LlmSection::default(),
            embedding: EmbeddingSection::default(),
            search: SearchSection::default(),
            persistence: PersistenceSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HELLAW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HELLAW__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HELLAW")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_service_expectations() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.max_context_turns, 15);
        assert_eq!(cfg.search.candidate_limit, 500);
        assert_eq!(cfg.search.top_n, 3);
        assert_eq!(cfg.search.chunk_index, "minsa_data");
        assert_eq!(cfg.search.full_index, "minsa_judgement");
        assert_eq!(cfg.search.vector_field, "sentences_vector");
        assert_eq!(cfg.llm.timeouts.request, 60);
        assert_eq!(cfg.server.port, 8000);
    }

    #[test]
    fn load_config_reads_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[app]\nmax_context_turns = 4\n\n[search]\ntop_n = 5\n"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.app.max_context_turns, 4);
        assert_eq!(cfg.search.top_n, 5);
        // 未覆盖的键保持默认
        assert_eq!(cfg.search.candidate_limit, 500);
    }
}
