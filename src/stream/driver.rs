//! Drives a streaming run to completion.
//!
//! The driver consumes run events in order, accumulates the reply text,
//! relays interim updates through one stream handle, and dispatches tool
//! calls. When a pass over the events collected tool outputs, they are
//! resubmitted to the same run and the returned events are consumed with
//! the same buffer and handle. The loop ends on a pass with no outputs or
//! on a failed run. A stream or tool error closes the open stream handle
//! before it is returned.

use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::conversation::session::ConversationSession;
use crate::conversation::turn::ConversationTurn;
use crate::core::errors::{BotError, BotResult};
use crate::stream::event::{EventStream, MessageDelta, RunRef, StreamEvent, ToolCall, ToolOutput};
use crate::stream::tools::{ToolContext, ToolRegistry};
use crate::transport::sink::ActivitySink;
use crate::transport::streaming::{StreamingPolicy, StreamingReply};

/// Boxed future returning a continued event stream.
pub type ResubmitFuture<'a> = Pin<Box<dyn Future<Output = BotResult<EventStream>> + Send + 'a>>;

/// Submits tool outputs to a paused run.
pub trait RunResubmitter: Send + Sync {
    /// Submit `outputs` for `run` and return the continued event stream.
    ///
    /// # Errors
    /// Returns an error if the submission is rejected.
    fn resubmit<'a>(&'a self, run: &'a RunRef, outputs: Vec<ToolOutput>) -> ResubmitFuture<'a>;
}

/// Result of a driven run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    /// Final reply text, already appended to the history.
    pub text: String,
    /// Number of tool output submissions.
    pub resubmissions: usize,
    /// Whether the run ended in failure.
    pub failed: bool,
}

/// Streaming run driver for one turn.
pub struct RunDriver<'a> {
    sink: &'a dyn ActivitySink,
    tools: &'a ToolRegistry,
    resubmitter: Option<&'a dyn RunResubmitter>,
    policy: StreamingPolicy,
}

impl<'a> RunDriver<'a> {
    /// Create a driver delivering through `sink`.
    #[must_use]
    pub const fn new(
        sink: &'a dyn ActivitySink,
        tools: &'a ToolRegistry,
        policy: StreamingPolicy,
    ) -> Self {
        Self {
            sink,
            tools,
            resubmitter: None,
            policy,
        }
    }

    /// Enable tool output resubmission.
    #[must_use]
    pub const fn with_resubmitter(mut self, resubmitter: &'a dyn RunResubmitter) -> Self {
        self.resubmitter = Some(resubmitter);
        self
    }

    /// Consume `events` until the run completes, then record and deliver the reply.
    ///
    /// # Errors
    /// Returns an error if the stream breaks, a tool fails, tool outputs are
    /// pending without a run, or delivery fails. The history is unchanged on error.
    pub async fn drive(
        &self,
        events: EventStream,
        session: &mut ConversationSession,
    ) -> BotResult<RunOutcome> {
        let mut reply = StreamingReply::new(self.sink, self.policy);
        reply.start().await?;

        let mut state = RunState::default();
        if let Err(err) = self.run_to_end(events, &mut state, &mut reply, session).await {
            reply.abandon(&state.buffer).await;
            return Err(err);
        }

        info!(
            chars = state.buffer.len(),
            resubmissions = state.resubmissions,
            failed = state.failed,
            "run completed"
        );
        session
            .history
            .push(ConversationTurn::assistant(state.buffer.clone()));
        reply.finish(&state.buffer).await?;

        Ok(RunOutcome {
            text: state.buffer,
            resubmissions: state.resubmissions,
            failed: state.failed,
        })
    }

    async fn run_to_end(
        &self,
        mut events: EventStream,
        state: &mut RunState,
        reply: &mut StreamingReply<'_>,
        session: &ConversationSession,
    ) -> BotResult<()> {
        loop {
            let outputs = self.consume(&mut events, state, reply, session).await?;
            if state.failed || outputs.is_empty() {
                return Ok(());
            }
            let run = state.run.as_ref().ok_or(BotError::MissingRun)?;
            let resubmitter = self.resubmitter.ok_or_else(|| {
                BotError::Unsupported("tool outputs cannot be submitted for this run".to_string())
            })?;
            debug!(run_id = %run.run_id, outputs = outputs.len(), "submitting tool outputs");
            events = resubmitter.resubmit(run, outputs).await?;
            state.resubmissions += 1;
        }
    }

    async fn consume(
        &self,
        events: &mut EventStream,
        state: &mut RunState,
        reply: &mut StreamingReply<'_>,
        session: &ConversationSession,
    ) -> BotResult<Vec<ToolOutput>> {
        let mut outputs = Vec::new();
        while let Some(event) = events.next().await {
            match event? {
                StreamEvent::RunCreated(run) => {
                    debug!(thread_id = %run.thread_id, run_id = %run.run_id, "run created");
                    state.run = Some(run);
                }
                StreamEvent::RunFailed { message } => {
                    warn!(%message, "run failed");
                    state.buffer = message;
                    state.failed = true;
                    break;
                }
                StreamEvent::MessageDelta(MessageDelta::Text(fragment)) => {
                    state.buffer.push_str(&fragment);
                    state.fragments += 1;
                    if self.policy.is_update_due(state.fragments) {
                        reply.update(&state.buffer).await?;
                    }
                }
                StreamEvent::MessageDelta(MessageDelta::Image(image)) => {
                    state.buffer.push_str(&image.to_markdown());
                }
                StreamEvent::RequiresAction(calls) => {
                    let context = ToolContext {
                        attachments: &session.attachments,
                    };
                    for call in calls {
                        if let Some(output) = self.dispatch(call, context).await? {
                            outputs.push(output);
                        }
                    }
                }
            }
        }
        Ok(outputs)
    }

    async fn dispatch(
        &self,
        call: ToolCall,
        context: ToolContext<'_>,
    ) -> BotResult<Option<ToolOutput>> {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "unknown tool requested, skipping");
            return Ok(None);
        };
        let arguments: Value = serde_json::from_str(&call.arguments)?;
        info!(tool = %call.name, call_id = %call.id, "dispatching tool call");
        let output = tool.call(arguments, context).await?;
        Ok(Some(ToolOutput {
            tool_call_id: call.id,
            output,
        }))
    }
}

#[derive(Debug, Default)]
struct RunState {
    buffer: String,
    fragments: usize,
    run: Option<RunRef>,
    resubmissions: usize,
    failed: bool,
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::stream;

    use super::*;
    use crate::stream::event::ImageReference;
    use crate::stream::tools::{Tool, ToolFuture};
    use crate::test_support::{Delivery, RecordingSink};
    use crate::transport::activity::ActivityType;

    fn events(items: Vec<StreamEvent>) -> EventStream {
        Box::pin(stream::iter(items.into_iter().map(Ok)))
    }

    fn run_created() -> StreamEvent {
        StreamEvent::RunCreated(RunRef {
            thread_id: "thread_1".to_string(),
            run_id: "run_1".to_string(),
        })
    }

    fn policy(update_every: usize) -> StreamingPolicy {
        StreamingPolicy {
            enabled: true,
            update_every,
        }
    }

    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn call<'a>(&'a self, arguments: Value, _context: ToolContext<'a>) -> ToolFuture<'a> {
            Box::pin(async move { Ok(arguments["value"].as_str().unwrap_or_default().to_string()) })
        }
    }

    #[derive(Default)]
    struct ScriptedRun {
        next: Mutex<Vec<Vec<StreamEvent>>>,
        submitted: Mutex<Vec<(RunRef, Vec<ToolOutput>)>>,
    }

    impl RunResubmitter for ScriptedRun {
        fn resubmit<'a>(&'a self, run: &'a RunRef, outputs: Vec<ToolOutput>) -> ResubmitFuture<'a> {
            Box::pin(async move {
                self.submitted.lock().unwrap().push((run.clone(), outputs));
                let next = self.next.lock().unwrap().pop().unwrap_or_default();
                Ok(events(next))
            })
        }
    }

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(EchoTool));
        tools
    }

    #[tokio::test]
    async fn test_deltas_accumulate_into_one_final_message() {
        let sink = RecordingSink::default();
        let tools = ToolRegistry::new();
        let mut session = ConversationSession::new(10, "sys");
        let driver = RunDriver::new(&sink, &tools, policy(50));

        let outcome = driver
            .drive(
                events(vec![
                    run_created(),
                    StreamEvent::text("Hel"),
                    StreamEvent::text("lo "),
                    StreamEvent::text("world"),
                ]),
                &mut session,
            )
            .await
            .unwrap();

        assert_eq!(outcome.text, "Hello world");
        let finals: Vec<Delivery> = sink
            .deliveries()
            .into_iter()
            .filter(|d| matches!(d, Delivery::Sent(a) if a.kind == ActivityType::Message))
            .collect();
        assert_eq!(finals.len(), 1);
        assert_eq!(session.history.last().map(|t| t.content.as_str()), Some("Hello world"));
    }

    #[tokio::test]
    async fn test_interim_updates_every_nth_fragment() {
        let sink = RecordingSink::default();
        let tools = ToolRegistry::new();
        let mut session = ConversationSession::new(10, "");
        let driver = RunDriver::new(&sink, &tools, policy(2));

        driver
            .drive(
                events(vec![
                    StreamEvent::text("a"),
                    StreamEvent::text("b"),
                    StreamEvent::text("c"),
                    StreamEvent::text("d"),
                ]),
                &mut session,
            )
            .await
            .unwrap();

        assert_eq!(sink.texts(), vec!["Typing...", "ab", "abcd", "abcd"]);
    }

    #[tokio::test]
    async fn test_tool_call_resubmits_once_and_keeps_buffer() {
        let sink = RecordingSink::with_edits();
        let tools = registry();
        let scripted = ScriptedRun::default();
        scripted
            .next
            .lock()
            .unwrap()
            .push(vec![StreamEvent::text(" after")]);
        let mut session = ConversationSession::new(10, "");
        let driver = RunDriver::new(&sink, &tools, policy(50)).with_resubmitter(&scripted);

        let outcome = driver
            .drive(
                events(vec![
                    run_created(),
                    StreamEvent::text("before"),
                    StreamEvent::RequiresAction(vec![ToolCall {
                        id: "call_1".to_string(),
                        name: "echo".to_string(),
                        arguments: r#"{"value":"pong"}"#.to_string(),
                    }]),
                ]),
                &mut session,
            )
            .await
            .unwrap();

        assert_eq!(outcome.text, "before after");
        assert_eq!(outcome.resubmissions, 1);
        let submitted = scripted.submitted.lock().unwrap().clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0.run_id, "run_1");
        assert_eq!(
            submitted[0].1,
            vec![ToolOutput {
                tool_call_id: "call_1".to_string(),
                output: "pong".to_string(),
            }]
        );
        assert!(matches!(sink.deliveries().last(), Some(Delivery::Updated(_, a)) if a.text.as_deref() == Some("before after")));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_skipped() {
        let sink = RecordingSink::default();
        let tools = registry();
        let scripted = ScriptedRun::default();
        let mut session = ConversationSession::new(10, "");
        let driver = RunDriver::new(&sink, &tools, policy(50)).with_resubmitter(&scripted);

        let outcome = driver
            .drive(
                events(vec![
                    run_created(),
                    StreamEvent::RequiresAction(vec![ToolCall {
                        id: "call_1".to_string(),
                        name: "web_search".to_string(),
                        arguments: "{}".to_string(),
                    }]),
                    StreamEvent::text("done"),
                ]),
                &mut session,
            )
            .await
            .unwrap();

        assert_eq!(outcome.text, "done");
        assert_eq!(outcome.resubmissions, 0);
        assert!(scripted.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_failure_becomes_reply() {
        let sink = RecordingSink::default();
        let tools = ToolRegistry::new();
        let mut session = ConversationSession::new(10, "sys");
        session.history.push(ConversationTurn::user("hi"));
        let driver = RunDriver::new(&sink, &tools, StreamingPolicy::disabled());

        let outcome = driver
            .drive(
                events(vec![
                    run_created(),
                    StreamEvent::text("partial"),
                    StreamEvent::RunFailed {
                        message: "rate limited".to_string(),
                    },
                    StreamEvent::text("never"),
                ]),
                &mut session,
            )
            .await
            .unwrap();

        assert!(outcome.failed);
        assert_eq!(outcome.text, "rate limited");
        let contents: Vec<&str> = session.history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["sys", "hi", "rate limited"]);
        assert_eq!(sink.texts(), vec!["rate limited"]);
    }

    #[tokio::test]
    async fn test_tool_outputs_without_run_fail() {
        let sink = RecordingSink::default();
        let tools = registry();
        let scripted = ScriptedRun::default();
        let mut session = ConversationSession::new(10, "");
        let driver = RunDriver::new(&sink, &tools, policy(50)).with_resubmitter(&scripted);

        let err = driver
            .drive(
                events(vec![StreamEvent::RequiresAction(vec![ToolCall {
                    id: "c".to_string(),
                    name: "echo".to_string(),
                    arguments: "{}".to_string(),
                }])]),
                &mut session,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BotError::MissingRun));
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn test_empty_run_sends_empty_final_and_images_render() {
        let sink = RecordingSink::default();
        let tools = ToolRegistry::new();
        let mut session = ConversationSession::new(10, "");
        let driver = RunDriver::new(&sink, &tools, StreamingPolicy::disabled());

        let outcome = driver.drive(events(Vec::new()), &mut session).await.unwrap();
        assert_eq!(outcome.text, "");
        assert_eq!(sink.texts(), vec![""]);

        let outcome = driver
            .drive(
                events(vec![StreamEvent::MessageDelta(MessageDelta::Image(
                    ImageReference::File("file-1".to_string()),
                ))]),
                &mut session,
            )
            .await
            .unwrap();
        assert_eq!(outcome.text, "![file-1](/api/files/file-1)");
    }

    #[tokio::test]
    async fn test_chained_resubmissions_keep_text_order() {
        let sink = RecordingSink::with_edits();
        let tools = registry();
        let scripted = ScriptedRun::default();
        let call = |id: &str, value: &str| {
            StreamEvent::RequiresAction(vec![ToolCall {
                id: id.to_string(),
                name: "echo".to_string(),
                arguments: format!(r#"{{"value":"{value}"}}"#),
            }])
        };
        // Popped from the back: the first resubmission gets the last entry.
        scripted.next.lock().unwrap().extend([
            vec![StreamEvent::text(" three")],
            vec![StreamEvent::text(" two"), call("call_2", "second")],
        ]);
        let mut session = ConversationSession::new(10, "");
        let driver = RunDriver::new(&sink, &tools, policy(50)).with_resubmitter(&scripted);

        let outcome = driver
            .drive(
                events(vec![run_created(), StreamEvent::text("one"), call("call_1", "first")]),
                &mut session,
            )
            .await
            .unwrap();

        assert_eq!(outcome.resubmissions, 2);
        assert_eq!(outcome.text, "one two three");
        let submitted = scripted.submitted.lock().unwrap().clone();
        let ids: Vec<&str> = submitted
            .iter()
            .flat_map(|(_, outputs)| outputs.iter().map(|o| o.tool_call_id.as_str()))
            .collect();
        assert_eq!(ids, vec!["call_1", "call_2"]);
        assert_eq!(submitted[1].1[0].output, "second");
        assert_eq!(session.history.last().map(|t| t.content.as_str()), Some("one two three"));
    }

    #[tokio::test]
    async fn test_stream_error_closes_typing_indicator() {
        let sink = RecordingSink::default();
        let tools = ToolRegistry::new();
        let mut session = ConversationSession::new(10, "sys");
        let driver = RunDriver::new(&sink, &tools, policy(50));
        let broken: EventStream = Box::pin(stream::iter(vec![
            Ok(run_created()),
            Ok(StreamEvent::text("partial")),
            Err(BotError::Stream("connection reset".to_string())),
        ]));

        let err = driver.drive(broken, &mut session).await.unwrap_err();

        assert!(matches!(err, BotError::Stream(_)));
        assert_eq!(sink.texts(), vec!["Typing...", "partial"]);
        let Some(Delivery::Sent(last)) = sink.deliveries().last().cloned() else {
            unreachable!("closing message must be sent");
        };
        assert_eq!(last.entities[0]["streamType"], "final");
        assert_eq!(session.history.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_tool_closes_stream_in_place() {
        struct FailingTool;

        impl Tool for FailingTool {
            fn name(&self) -> &str {
                "broken"
            }

            fn call<'a>(&'a self, _arguments: Value, _context: ToolContext<'a>) -> ToolFuture<'a> {
                Box::pin(async { Err(BotError::AttachmentNotFound("photo.png".to_string())) })
            }
        }

        let sink = RecordingSink::with_edits();
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(FailingTool));
        let scripted = ScriptedRun::default();
        let mut session = ConversationSession::new(10, "");
        let driver = RunDriver::new(&sink, &tools, policy(50)).with_resubmitter(&scripted);

        let err = driver
            .drive(
                events(vec![
                    run_created(),
                    StreamEvent::RequiresAction(vec![ToolCall {
                        id: "call_1".to_string(),
                        name: "broken".to_string(),
                        arguments: "{}".to_string(),
                    }]),
                ]),
                &mut session,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BotError::AttachmentNotFound(_)));
        assert!(matches!(
            sink.deliveries().last(),
            Some(Delivery::Updated(id, a)) if id == "activity-1" && a.text.as_deref() == Some(crate::transport::streaming::INTERRUPTED_TEXT)
        ));
        assert!(scripted.submitted.lock().unwrap().is_empty());
    }
}
