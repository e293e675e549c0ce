//! Streaming run state machine: events, tools, and the driver.

pub mod driver;
pub mod event;
pub mod tools;

pub use driver::{ResubmitFuture, RunDriver, RunOutcome, RunResubmitter};
pub use event::{
    EventStream, ImageReference, MessageDelta, RunRef, StreamEvent, ToolCall, ToolOutput,
};
pub use tools::{ImageQueryTool, Tool, ToolContext, ToolFuture, ToolRegistry};
