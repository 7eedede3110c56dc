//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute）。
//! ToolBox 是进程内可用的全部实现；ToolRegistry 是某个会话当前生效的工具集，
//! 按配置的工具目录从 ToolBox 中挑选构建。重新配置时整体重建，不在原地修改。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::RelayError;
use crate::tools::{ToolContext, ToolResult};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value {
        empty_schema()
    }

    /// 执行工具；返回 Err 会被执行器转换为 context-error
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, String>;
}

fn empty_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// 工具目录中的一项；description / parameters 缺省时取实现自带的
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// 只有名字的目录项
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, "", Value::Null)
    }

    /// 用实现补全缺省字段
    fn resolved_with(&self, tool: &dyn Tool) -> Self {
        Self {
            name: self.name.clone(),
            description: if self.description.is_empty() {
                tool.description().to_string()
            } else {
                self.description.clone()
            },
            parameters: if self.parameters.is_null() {
                tool.parameters_schema()
            } else {
                self.parameters.clone()
            },
        }
    }
}

/// 进程内可用的工具实现集合（工具箱）
#[derive(Default)]
pub struct ToolBox {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolBox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 包含全部实现的目录（按名字排序）
    pub fn full_catalog(&self) -> Vec<ToolSpec> {
        self.names().into_iter().map(ToolSpec::named).collect()
    }
}

/// 会话当前生效的工具集：name -> 已解析的实现
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    catalog: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个工具；同名覆盖旧的实现与目录项
    pub fn register(&mut self, spec: ToolSpec, tool: Arc<dyn Tool>) {
        let spec = spec.resolved_with(tool.as_ref());
        self.catalog.retain(|s| s.name != spec.name);
        self.tools.insert(spec.name.clone(), tool);
        self.catalog.push(spec);
    }

    /// 按工具目录构建；目录中的名字必须在工具箱里有实现，且不能重复
    pub fn from_catalog(catalog: &[ToolSpec], toolbox: &ToolBox) -> Result<Self, RelayError> {
        let mut registry = Self::new();
        for spec in catalog {
            if registry.tools.contains_key(&spec.name) {
                return Err(RelayError::Reconfigure(format!(
                    "duplicate tool in catalog: {}",
                    spec.name
                )));
            }
            let tool = toolbox.get(&spec.name).ok_or_else(|| {
                RelayError::Reconfigure(format!("no implementation for tool: {}", spec.name))
            })?;
            if !(spec.parameters.is_null() || spec.parameters.is_object()) {
                return Err(RelayError::Reconfigure(format!(
                    "parameters of {} must be a JSON schema object",
                    spec.name
                )));
            }
            registry.register(spec.clone(), tool);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 目录顺序与配置一致
    pub fn catalog(&self) -> &[ToolSpec] {
        &self.catalog
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.catalog.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
