//! 会话存储：按 conv_idx 隔离的对话历史与当前模式
//!
//! 任何操作对未知 conv_idx 都先补一个空会话（ensure 语义，绝不报错）；
//! 会话之间完全独立，同一 conv_idx 假定同时只有一个在途回合（由调用方串行化）。

use std::collections::HashMap;
use std::sync::RwLock;

use crate::dialogue::Mode;
use crate::memory::{ConversationMemory, Message, Role};

struct Session {
    memory: ConversationMemory,
    mode: Mode,
}

impl Session {
    fn new(max_turns: usize) -> Self {
        Self {
            memory: ConversationMemory::new(max_turns),
            mode: Mode::FreeChat,
        }
    }
}

/// 进程内会话表；跨重启的留存由外部记录服务负责
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns,
        }
    }

    fn with_session<T>(&self, conv_idx: &str, f: impl FnOnce(&mut Session) -> T) -> T {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .entry(conv_idx.to_string())
            .or_insert_with(|| Session::new(self.max_turns));
        f(session)
    }

    /// 追加一条消息；超出容量时先丢最旧的
    pub fn append(&self, conv_idx: &str, role: Role, content: impl Into<String>) {
        let msg = Message {
            role,
            content: content.into(),
        };
        self.with_session(conv_idx, |s| s.memory.push(msg));
    }

    /// 渲染为 "{ROLE}: {content}" 逐行文本；空会话（含未知 id）渲染为空串
    pub fn context(&self, conv_idx: &str) -> String {
        self.with_session(conv_idx, |s| s.memory.render())
    }

    pub fn mode(&self, conv_idx: &str) -> Mode {
        self.with_session(conv_idx, |s| s.mode)
    }

    pub fn set_mode(&self, conv_idx: &str, mode: Mode) {
        self.with_session(conv_idx, |s| s.mode = mode);
    }

    /// 最近一条 assistant 消息
    pub fn last_assistant(&self, conv_idx: &str) -> Option<String> {
        self.with_session(conv_idx, |s| {
            s.memory.last_assistant().map(String::from)
        })
    }

    pub fn history_len(&self, conv_idx: &str) -> usize {
        self.with_session(conv_idx, |s| s.memory.len())
    }

    /// 回合落盘：一次性追加 user / assistant 并设置下一模式。
    /// 控制器只在派发成功后调用；失败的回合不会走到这里，会话保持原样。
    pub fn commit_turn(&self, conv_idx: &str, question: &str, answer: &str, next_mode: Mode) {
        self.with_session(conv_idx, |s| {
            s.memory.push(Message::user(question));
            s.memory.push(Message::assistant(answer));
            s.mode = next_mode;
        });
    }

    /// 丢弃整个会话；下次访问重新从空会话开始。重复调用安全。
    pub fn reset(&self, conv_idx: &str) {
        self.sessions.write().unwrap().remove(conv_idx);
    }

    /// 当前活跃会话数（监控 / 测试用）
    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }
}
