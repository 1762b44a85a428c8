//! 对话模式
//!
//! 每个会话任一时刻恰好处于四种模式之一；模式只经控制器变更。

/// 对话阶段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// 自由法律问答（新会话的初始模式）
    #[default]
    FreeChat,
    /// 事件信息收集（按领域清单追问）
    InfoGathering,
    /// 判例检索与法律建议
    Advising,
    /// 行动方案引导
    Guidance,
}

impl Mode {
    /// 对外（API 响应 / 分类器输出）使用的标签
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::FreeChat => "free_chat",
            Mode::InfoGathering => "info_gathering",
            Mode::Advising => "advising",
            Mode::Guidance => "guidance",
        }
    }

    /// 宽松解析：裁剪空白、忽略大小写与引号；认不出返回 None
    pub fn parse(s: &str) -> Option<Mode> {
        match s.trim().trim_matches('"').to_lowercase().as_str() {
            "free_chat" => Some(Mode::FreeChat),
            "info_gathering" => Some(Mode::InfoGathering),
            "advising" => Some(Mode::Advising),
            "guidance" => Some(Mode::Guidance),
            _ => None,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
