//! 生成层：流式回复生成器、工具调用拼装与打断开关

pub mod accumulator;
pub mod generator;
pub mod interrupt;

pub use accumulator::ToolCallAccumulator;
pub use generator::{
    ContentSink, GenerationOutcome, GeneratorHooks, ResponseGenerator, ToolResultSink,
    DEFAULT_MAX_TOOL_ROUNDS,
};
pub use interrupt::InterruptSwitch;
