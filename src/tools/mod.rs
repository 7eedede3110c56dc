//! 工具层：工具契约、注册表、执行器与内置工具
//!
//! 内置工具覆盖三种结果通道：end_call / live_agent_handoff / send_digits 走 direct-control，
//! switch_language 经控制句柄下发指令后返回 conversational，current_time 为普通 conversational。

pub mod current_time;
pub mod end_call;
pub mod executor;
pub mod live_agent;
pub mod registry;
pub mod result;
pub mod send_digits;
pub mod switch_language;

pub use current_time::CurrentTimeTool;
pub use end_call::EndCallTool;
pub use executor::ToolExecutor;
pub use live_agent::LiveAgentHandoffTool;
pub use registry::{Tool, ToolBox, ToolRegistry, ToolSpec};
pub use result::{ControlEmitter, ControlSink, ToolContext, ToolResult};
pub use send_digits::SendDigitsTool;
pub use switch_language::SwitchLanguageTool;

impl ToolBox {
    /// 包含全部内置工具的工具箱
    pub fn with_builtin_tools() -> Self {
        let mut toolbox = ToolBox::new();
        toolbox.register(EndCallTool);
        toolbox.register(LiveAgentHandoffTool);
        toolbox.register(SendDigitsTool);
        toolbox.register(SwitchLanguageTool);
        toolbox.register(CurrentTimeTool);
        toolbox
    }
}
