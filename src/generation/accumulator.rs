//! 工具调用片段拼装
//!
//! 后端把一次函数调用拆成任意多个片段：id / name 可能在首片段一次给出，也可能分段追加；
//! 参数串总是分段到达。拼装结果与切分方式无关。

use crate::llm::ToolCallFragment;
use crate::memory::ToolInvocation;

/// 正在拼装的单个调用；每轮生成同时最多一个
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallAccumulator {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 该片段是否属于当前调用；携带不同 id 的片段意味着新调用开始
    pub fn accepts(&self, fragment: &ToolCallFragment) -> bool {
        match (&self.id, &fragment.id) {
            (Some(current), Some(incoming)) => current == incoming,
            _ => true,
        }
    }

    pub fn absorb(&mut self, fragment: ToolCallFragment) {
        if self.id.is_none() {
            self.id = fragment.id;
        }
        if let Some(name) = fragment.name {
            self.name.push_str(&name);
        }
        self.arguments.push_str(&fragment.arguments);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 收尾；后端未给 id 时生成一个
    pub fn finish(self) -> ToolInvocation {
        ToolInvocation {
            id: self
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
            name: self.name,
            arguments: self.arguments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(id: Option<&str>, name: Option<&str>, args: &str) -> ToolCallFragment {
        ToolCallFragment {
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: args.to_string(),
        }
    }

    fn assemble(fragments: Vec<ToolCallFragment>) -> ToolInvocation {
        let mut acc = ToolCallAccumulator::new();
        for f in fragments {
            assert!(acc.accepts(&f));
            acc.absorb(f);
        }
        acc.finish()
    }

    #[test]
    fn test_arguments_concatenate_in_order() {
        let call = assemble(vec![
            frag(Some("call_7"), Some("send_digits"), ""),
            frag(None, None, "{\"dig"),
            frag(None, None, "its\": "),
            frag(None, None, "\"12#\"}"),
        ]);
        assert_eq!(call.id, "call_7");
        assert_eq!(call.name, "send_digits");
        assert_eq!(call.arguments, r#"{"digits": "12#"}"#);
    }

    #[test]
    fn test_result_is_independent_of_chunking() {
        let args = r#"{"reason":"billing dispute","summary":"caller wants a refund"}"#;
        let whole = assemble(vec![frag(Some("c1"), Some("live_agent_handoff"), args)]);

        for size in [1, 2, 3, 7, 16] {
            let chars: Vec<char> = args.chars().collect();
            let mut fragments = vec![frag(Some("c1"), Some("live_"), "")];
            fragments.push(frag(None, Some("agent_handoff"), ""));
            for chunk in chars.chunks(size) {
                fragments.push(frag(None, None, &chunk.iter().collect::<String>()));
            }
            assert_eq!(assemble(fragments), whole, "chunk size {size}");
        }
    }

    #[test]
    fn test_different_id_is_not_accepted() {
        let mut acc = ToolCallAccumulator::new();
        acc.absorb(frag(Some("a"), Some("end_call"), "{}"));
        assert!(acc.accepts(&frag(None, None, "x")));
        assert!(acc.accepts(&frag(Some("a"), None, "")));
        assert!(!acc.accepts(&frag(Some("b"), Some("current_time"), "")));
    }

    #[test]
    fn test_missing_id_is_generated() {
        let call = assemble(vec![frag(None, Some("current_time"), "")]);
        assert!(call.id.starts_with("call_"));
        assert_eq!(call.arguments, "");
    }
}
