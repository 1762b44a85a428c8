//! 对话层：模式状态机、阶段分类器、行为智能体、回合控制器

pub mod agents;
pub mod checklist;
pub mod classifier;
pub mod controller;
pub mod mode;

pub use agents::{
    AdviceResult, AgentTimeouts, BehaviorAgents, InfoGatheringResult, TokenSink, NO_CASE_FOUND,
};
pub use checklist::{domain_checklist, GENERIC_CHECKLIST};
pub use classifier::Classification;
pub use controller::{ModeController, TurnOutcome, TurnRequest};
pub use mode::Mode;

/// 从 LLM 自由文本里抠出第一个 JSON 对象（贪婪匹配最外层花括号）
pub(crate) fn extract_json(text: &str) -> Option<&str> {
    let re = regex::Regex::new(r"\{[\s\S]*\}").ok()?;
    re.find(text).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_finds_braced_block() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
        assert_eq!(
            extract_json("앞말 {\"a\": 1} 뒷말"),
            Some("{\"a\": 1}")
        );
        assert_eq!(extract_json("no json here"), None);
    }
}
