//! 工具执行器
//!
//! 持有当前生效的 ToolRegistry，execute(invocation) 解析参数、查找并调用工具，
//! 再把结果分类为 ToolResult。未知工具、参数非法、执行失败（含 panic）一律转为 context-error，
//! 不会中断生成。每次调用输出结构化审计日志（JSON）。不设全局超时，超时属于各工具自身的契约。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::Value;

use crate::core::RelayError;
use crate::memory::ToolInvocation;
use crate::tools::{ToolContext, ToolRegistry, ToolResult, ToolSpec};

/// 工具执行器
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// 执行一次完整的调用，总是返回一个分类后的结果
    pub async fn execute(&self, call: &ToolInvocation, ctx: &ToolContext) -> ToolResult {
        let start = Instant::now();
        let outcome = self.dispatch(call, ctx).await;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => ToolResult::ContextError(e.to_string()),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "session_id": ctx.session_id,
            "tool": call.name,
            "call_id": call.id,
            "outcome": result.kind(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit, "tool");
        result
    }

    async fn dispatch(&self, call: &ToolInvocation, ctx: &ToolContext) -> Result<ToolResult, RelayError> {
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| RelayError::UnknownTool(call.name.clone()))?;
        let args = parse_arguments(&call.arguments).map_err(|reason| {
            RelayError::InvalidToolArguments {
                tool: call.name.clone(),
                reason,
            }
        })?;

        match AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(reason)) => Err(RelayError::ToolFailed {
                tool: call.name.clone(),
                reason,
            }),
            Err(_) => Err(RelayError::ToolFailed {
                tool: call.name.clone(),
                reason: "tool panicked".to_string(),
            }),
        }
    }

    pub fn catalog(&self) -> &[ToolSpec] {
        self.registry.catalog()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

/// 空参数视为 `{}`；其余必须是合法 JSON
fn parse_arguments(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| e.to_string())
}

fn args_preview(raw: &str) -> String {
    if raw.chars().count() > 200 {
        format!("{}...", raw.chars().take(200).collect::<String>())
    } else {
        raw.to_string()
    }
}
