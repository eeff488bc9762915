//! End-to-end scenarios for the agent loop, driven by scripted providers
//! and executors.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use codebutler::agent::{AgentConfig, AgentRunner, RunState, Task};
use codebutler::budget::{BudgetConfig, BudgetTracker};
use codebutler::message::{Message, MessageRole, ToolCall};
use codebutler::providers::mock::{MockExecutor, MockProvider, MockSender, ToolBehavior};
use codebutler::roles::Role;
use codebutler::store::{ConversationStore, MemoryConversationStore};

fn config(max_turns: usize) -> AgentConfig {
    AgentConfig::new(Role::Coder, "mock-model", "sys").with_max_turns(max_turns)
}

fn task() -> Task {
    Task::new("hi", "chan", "t1")
}

#[tokio::test]
async fn straight_text_answer() {
    let provider = Arc::new(MockProvider::with_texts(vec!["Hello!"]));
    let runner = AgentRunner::new(
        config(10),
        Arc::clone(&provider) as Arc<dyn codebutler::chat::ChatProvider>,
        Arc::new(MockExecutor::empty()),
    );
    let cancel = CancellationToken::new();

    let result = runner.run(&cancel, &task()).await;

    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.response, "Hello!");
    assert_eq!(result.turns_used, 1);
    assert_eq!(result.tool_calls, 0);
    assert_eq!(result.loops_detected, 0);
    assert!(!result.escalated);

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages[0], Message::system("sys"));
    assert_eq!(requests[0].messages[1], Message::user("hi"));
}

#[tokio::test]
async fn read_then_answer() {
    let provider = Arc::new(MockProvider::with_script(vec![
        Message::assistant_tool_calls(vec![ToolCall::new(
            "c1",
            "read",
            r#"{"path":"main.go"}"#,
        )]),
        Message::assistant("I read the file."),
    ]));
    let executor = MockExecutor::empty()
        .with_tool("read", ToolBehavior::Reply("package main".to_owned()));
    let runner = AgentRunner::new(
        config(10),
        Arc::clone(&provider) as Arc<dyn codebutler::chat::ChatProvider>,
        Arc::new(executor),
    );
    let cancel = CancellationToken::new();

    let result = runner.run(&cancel, &task()).await;

    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.response, "I read the file.");
    assert_eq!(result.turns_used, 2);
    assert_eq!(result.tool_calls, 1);

    // The second request carries the assistant's call and its answer.
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let second = &requests[1].messages;
    let assistant = &second[second.len() - 2];
    assert_eq!(assistant.role, MessageRole::Assistant);
    assert_eq!(assistant.tool_calls.as_ref().unwrap()[0].id, "c1");
    let tool = &second[second.len() - 1];
    assert_eq!(tool.role, MessageRole::Tool);
    assert_eq!(tool.content.as_deref(), Some("package main"));
    assert_eq!(tool.tool_call_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn parallel_tools_preserve_call_order() {
    let provider = Arc::new(MockProvider::with_script(vec![
        Message::assistant_tool_calls(vec![
            ToolCall::new("first", "read", r#"{"path":"a.go"}"#),
            ToolCall::new("second", "grep", r#"{"pattern":"x"}"#),
        ]),
        Message::assistant("done"),
    ]));
    // The first call is slow, the second returns immediately.
    let executor = Arc::new(
        MockExecutor::empty()
            .with_tool(
                "read",
                ToolBehavior::ReplyAfter("read-result".to_owned(), Duration::from_millis(50)),
            )
            .with_tool("grep", ToolBehavior::Reply("grep-result".to_owned())),
    );
    let runner = AgentRunner::new(
        config(10),
        Arc::clone(&provider) as Arc<dyn codebutler::chat::ChatProvider>,
        Arc::clone(&executor) as Arc<dyn codebutler::tool::ToolExecutor>,
    );
    let cancel = CancellationToken::new();

    let result = runner.run(&cancel, &task()).await;
    assert_eq!(result.tool_calls, 2);

    // grep finished first...
    assert_eq!(executor.executed(), vec!["grep", "read"]);

    // ...but the conversation still answers in call order.
    let requests = provider.requests();
    let second = &requests[1].messages;
    let tool_messages: Vec<&Message> = second
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 2);
    assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("first"));
    assert_eq!(tool_messages[0].content.as_deref(), Some("read-result"));
    assert_eq!(tool_messages[1].tool_call_id.as_deref(), Some("second"));
    assert_eq!(tool_messages[1].content.as_deref(), Some("grep-result"));
}

#[tokio::test]
async fn max_turns_is_a_bounded_stop() {
    let provider = Arc::new(MockProvider::with_script(vec![
        Message::assistant_tool_calls(vec![ToolCall::new("c1", "read", r#"{"n":1}"#)]),
        Message::assistant_tool_calls(vec![ToolCall::new("c2", "read", r#"{"n":2}"#)]),
        Message::assistant_tool_calls(vec![ToolCall::new("c3", "read", r#"{"n":3}"#)]),
    ]));
    let executor =
        MockExecutor::empty().with_tool("read", ToolBehavior::Reply("data".to_owned()));
    let runner = AgentRunner::new(
        config(3),
        Arc::clone(&provider) as Arc<dyn codebutler::chat::ChatProvider>,
        Arc::new(executor),
    );
    let cancel = CancellationToken::new();

    let result = runner.run(&cancel, &task()).await;

    assert_eq!(result.state, RunState::MaxTurnsReached);
    assert_eq!(result.response, "");
    assert_eq!(result.turns_used, 3);
    assert_eq!(result.tool_calls, 3);
}

#[tokio::test]
async fn stuck_then_escape_then_progress() {
    let same_call = |id: &str| {
        Message::assistant_tool_calls(vec![ToolCall::new(id, "read", r#"{"path":"x.go"}"#)])
    };
    let provider = Arc::new(MockProvider::with_script(vec![
        same_call("c1"),
        same_call("c2"),
        same_call("c3"),
        Message::assistant_tool_calls(vec![ToolCall::new(
            "c4",
            "grep",
            r#"{"pattern":"y"}"#,
        )]),
        Message::assistant("figured it out"),
    ]));
    let executor = MockExecutor::empty()
        .with_tool("read", ToolBehavior::Reply("same data".to_owned()))
        .with_tool("grep", ToolBehavior::Reply("fresh data".to_owned()));
    let runner = AgentRunner::new(
        config(10),
        Arc::clone(&provider) as Arc<dyn codebutler::chat::ChatProvider>,
        Arc::new(executor),
    );
    let cancel = CancellationToken::new();

    let result = runner.run(&cancel, &task()).await;

    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.response, "figured it out");
    assert!(result.loops_detected >= 1);
    assert!(!result.escalated);

    // The reflection nudge was injected before the fourth call.
    let requests = provider.requests();
    let fourth = &requests[3].messages;
    assert!(fourth.iter().any(|m| {
        m.role == MessageRole::User
            && m.content
                .as_deref()
                .unwrap_or_default()
                .contains("You appear to be in a loop")
    }));
}

#[tokio::test]
async fn exhausted_ladder_escalates() {
    let provider = Arc::new(MockProvider::with_script(vec![
        Message::assistant_tool_calls(vec![ToolCall::new(
            "c",
            "read",
            r#"{"path":"x.go"}"#,
        )]),
    ]));
    let executor =
        MockExecutor::empty().with_tool("read", ToolBehavior::Reply("same".to_owned()));
    let sender = Arc::new(MockSender::new());
    let runner = AgentRunner::new(
        config(20),
        Arc::clone(&provider) as Arc<dyn codebutler::chat::ChatProvider>,
        Arc::new(executor),
    )
    .with_sender(Arc::clone(&sender) as Arc<dyn codebutler::chat::MessageSender>);
    let cancel = CancellationToken::new();

    let result = runner.run(&cancel, &task()).await;

    assert_eq!(result.state, RunState::Escalated);
    assert!(result.escalated);
    assert!(result.turns_used < 20);

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, "chan");
    assert!(sent[0].text.contains("stuck"));
    assert!(sent[0].text.contains("coder"));

    // After tool reduction the provider stops being offered the stuck tool.
    let requests = provider.requests();
    assert!(requests[0].tools.is_some());
    assert!(requests.last().unwrap().tools.is_none());
}

#[tokio::test]
async fn completed_run_replays_from_the_store() {
    let store = Arc::new(MemoryConversationStore::new());
    let provider = Arc::new(MockProvider::with_texts(vec!["the answer"]));
    let runner = AgentRunner::new(
        config(10),
        Arc::clone(&provider) as Arc<dyn codebutler::chat::ChatProvider>,
        Arc::new(MockExecutor::empty()),
    )
    .with_store(Arc::clone(&store) as Arc<dyn ConversationStore>);
    let cancel = CancellationToken::new();

    let first = runner.run(&cancel, &task()).await;
    assert_eq!(first.response, "the answer");
    assert_eq!(provider.calls(), 1);

    // The stored conversation ends with the final assistant message, so the
    // replay answers from the store alone.
    let fresh_provider = Arc::new(MockProvider::with_texts(vec!["should not be called"]));
    let replay = AgentRunner::new(
        config(10),
        Arc::clone(&fresh_provider) as Arc<dyn codebutler::chat::ChatProvider>,
        Arc::new(MockExecutor::empty()),
    )
    .with_store(Arc::clone(&store) as Arc<dyn ConversationStore>);

    let second = replay.run(&cancel, &task()).await;
    assert_eq!(second.response, "the answer");
    assert_eq!(second.state, RunState::Completed);
    assert_eq!(fresh_provider.calls(), 0);
}

#[tokio::test]
async fn resumable_conversation_continues_where_it_left_off() {
    // A conversation that ended mid-tool-round: assistant call + result,
    // no final answer.
    let stored = vec![
        Message::system("sys"),
        Message::user("hi"),
        Message::assistant_tool_calls(vec![ToolCall::new("c1", "read", "{}")]),
        Message::tool(&codebutler::message::ToolResult::ok("c1", "data")),
    ];
    let store = Arc::new(MemoryConversationStore::with_messages(stored));
    let provider = Arc::new(MockProvider::with_texts(vec!["picking up"]));
    let runner = AgentRunner::new(
        config(10),
        Arc::clone(&provider) as Arc<dyn codebutler::chat::ChatProvider>,
        Arc::new(MockExecutor::empty()),
    )
    .with_store(Arc::clone(&store) as Arc<dyn ConversationStore>);
    let cancel = CancellationToken::new();

    let result = runner
        .run(&cancel, &Task::new("continue", "chan", "t1"))
        .await;

    assert_eq!(result.response, "picking up");
    // One prior assistant turn plus this run's call.
    assert_eq!(result.turns_used, 2);
    let request = &provider.requests()[0];
    // Loaded prefix, then the new task message.
    assert_eq!(request.messages.len(), 5);
    assert_eq!(
        request.messages.last().unwrap().content.as_deref(),
        Some("continue")
    );
}

#[tokio::test]
async fn budget_trip_stops_the_run() {
    let tracker = Arc::new(BudgetTracker::new(BudgetConfig {
        per_thread_usd: 0.000_000_1,
        per_day_usd: 0.0,
    }));
    let provider = Arc::new(MockProvider::with_texts(vec!["pricey"]));
    let runner = AgentRunner::new(
        config(10),
        Arc::clone(&provider) as Arc<dyn codebutler::chat::ChatProvider>,
        Arc::new(MockExecutor::empty()),
    )
    .with_budget(Arc::clone(&tracker));
    let cancel = CancellationToken::new();

    let result = runner.run(&cancel, &task()).await;

    assert_eq!(result.state, RunState::Failed);
    assert!(result.error.unwrap_or_default().contains("budget"));
    let (_, paused) = tracker.check_thread("t1");
    assert!(paused);
}

#[tokio::test]
async fn cancellation_before_the_first_call() {
    let provider = Arc::new(MockProvider::with_texts(vec!["never"]));
    let runner = AgentRunner::new(
        config(10),
        Arc::clone(&provider) as Arc<dyn codebutler::chat::ChatProvider>,
        Arc::new(MockExecutor::empty()),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = runner.run(&cancel, &task()).await;
    assert_eq!(result.state, RunState::Cancelled);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn tool_errors_flow_back_to_the_model() {
    let provider = Arc::new(MockProvider::with_script(vec![
        Message::assistant_tool_calls(vec![ToolCall::new("c1", "flaky", "{}")]),
        Message::assistant("recovered"),
    ]));
    let executor =
        MockExecutor::empty().with_tool("flaky", ToolBehavior::Fail("disk on fire".to_owned()));
    let runner = AgentRunner::new(
        config(10),
        Arc::clone(&provider) as Arc<dyn codebutler::chat::ChatProvider>,
        Arc::new(executor),
    );
    let cancel = CancellationToken::new();

    let result = runner.run(&cancel, &task()).await;

    // The error became a tool result, not a run failure.
    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.response, "recovered");

    let second = &provider.requests()[1].messages;
    let tool = second.last().unwrap();
    assert_eq!(tool.role, MessageRole::Tool);
    assert!(tool.content.as_deref().unwrap().starts_with("error: "));
    assert!(tool.content.as_deref().unwrap().contains("disk on fire"));
}
