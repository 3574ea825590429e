//! Delegating orchestrator - a persona that works through tools
//!
//! The tool-using loop:
//! 1. Load session history (if a memory store and session key are given)
//! 2. Ask the planner for the next action
//! 3. If it wants tools, run them and feed their results back; repeat
//! 4. When it responds, append the exchange to memory and return the text

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::{cancellable, CancellationToken};
use crate::error::{AgentError, Result};
use crate::events::{EventSink, EventSender};
use crate::llm::{Message, Role};
use crate::memory::{MemoryStore, NewMemoryMessage, SessionKey};
use crate::persona::{Generation, Persona};
use crate::planner::{BackendPlanner, PlanContext, Planner, PlannerAction};
use crate::tools::ToolSet;

/// Default bound on planner iterations
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Default number of history messages loaded per generation
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// What to do when appending to memory fails after a successful generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryFailurePolicy {
    /// Log a warning and return the generation
    #[default]
    Warn,
    /// Return the memory error instead of the generation
    Fail,
}

/// A persona that may delegate to tools before answering
pub struct Orchestrator {
    persona: Persona,
    tools: ToolSet,
    planner: Arc<dyn Planner>,
    memory: Option<Arc<dyn MemoryStore>>,
    history_limit: Option<usize>,
    max_iterations: usize,
    memory_failure: MemoryFailurePolicy,
    event_sender: EventSink,
}

impl Orchestrator {
    /// Create an orchestrator with no tools, no memory and a backend planner
    pub fn new(persona: Persona) -> Self {
        Self {
            persona,
            tools: ToolSet::new(),
            planner: Arc::new(BackendPlanner::new()),
            memory: None,
            history_limit: Some(DEFAULT_HISTORY_LIMIT),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            memory_failure: MemoryFailurePolicy::default(),
            event_sender: EventSink::none(),
        }
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Limit loaded history to the newest `limit` messages (`None` loads all)
    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_memory_failure_policy(mut self, policy: MemoryFailurePolicy) -> Self {
        self.memory_failure = policy;
        self
    }

    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = EventSink::new(sender);
        self
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn planner_name(&self) -> &'static str {
        self.planner.name()
    }

    async fn load_history(
        &self,
        session: Option<&SessionKey>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>> {
        let (Some(memory), Some(session)) = (&self.memory, session) else {
            return Ok(Vec::new());
        };

        let history = cancellable(cancel, memory.load(session, self.history_limit)).await?;
        tracing::debug!(session = %session, messages = history.len(), "Loaded history");
        Ok(history.iter().map(|m| m.to_message()).collect())
    }

    async fn save_exchange(
        &self,
        session: Option<&SessionKey>,
        exchange: Vec<NewMemoryMessage>,
    ) -> Result<()> {
        let (Some(memory), Some(session)) = (&self.memory, session) else {
            return Ok(());
        };

        match memory.append(session, exchange).await {
            Ok(()) => Ok(()),
            Err(e) => match self.memory_failure {
                MemoryFailurePolicy::Warn => {
                    tracing::warn!(session = %session, "Failed to append to memory: {}", e);
                    Ok(())
                }
                MemoryFailurePolicy::Fail => Err(e),
            },
        }
    }

    /// Generate a reply to `prompt`, delegating to tools as the planner decides
    ///
    /// Tool failures stop the generation and propagate unchanged. Nothing is
    /// written to memory unless the generation succeeds.
    pub async fn generate(
        &self,
        prompt: &str,
        session: Option<&SessionKey>,
        cancel: &CancellationToken,
    ) -> Result<Generation> {
        if prompt.trim().is_empty() {
            return Err(AgentError::validation(
                format!("{} prompt", self.persona.name()),
                "prompt must not be empty",
            ));
        }

        self.event_sender.generation_start(prompt);
        let result = self.run_loop(prompt, session, cancel).await;
        if let Err(e) = &result {
            self.event_sender.error(&e.to_string());
        }
        result
    }

    async fn run_loop(
        &self,
        prompt: &str,
        session: Option<&SessionKey>,
        cancel: &CancellationToken,
    ) -> Result<Generation> {
        let total_start = Instant::now();
        let mut messages = vec![Message::system(self.persona.instructions())];
        messages.extend(self.load_history(session, cancel).await?);
        messages.push(Message::user(prompt));

        let tools = self.tools.definitions();
        let mut exchange = vec![NewMemoryMessage::new(Role::User, prompt)];

        tracing::info!(
            persona = %self.persona.name(),
            planner = self.planner.name(),
            tools = tools.len(),
            "Orchestrator started"
        );

        for iteration in 1..=self.max_iterations {
            let ctx = PlanContext {
                persona: &self.persona,
                messages: &messages,
                tools: &tools,
                iteration,
            };

            match self.planner.next_action(ctx, cancel).await? {
                PlannerAction::Respond(text) => {
                    tracing::info!(iterations = iteration, "Orchestrator responding");
                    exchange.push(NewMemoryMessage::new(Role::Assistant, &text));
                    self.save_exchange(session, exchange).await?;

                    self.event_sender
                        .generation_complete(&text, iteration, total_start.elapsed());
                    return Ok(Generation { text });
                }
                PlannerAction::CallTools { content, calls } => {
                    self.event_sender.iteration(iteration, calls.len());
                    tracing::info!("Orchestrator making {} tool call(s)", calls.len());

                    messages.push(Message::assistant(content).with_tool_calls(calls.clone()));

                    for call in &calls {
                        self.event_sender.tool_start(call.name(), call.arguments());
                        let started = Instant::now();
                        let result = self.tools.call(call, cancel).await;
                        self.event_sender
                            .tool_complete(call.name(), started.elapsed(), result.is_err());

                        let output = match result {
                            Ok(output) => Value::Object(output).to_string(),
                            Err(e) => {
                                tracing::warn!(tool = %call.name(), "Tool call failed: {}", e);
                                return Err(e);
                            }
                        };

                        exchange.push(
                            NewMemoryMessage::new(Role::Assistant, call.arguments().to_string())
                                .with_tool(call.name()),
                        );
                        exchange.push(
                            NewMemoryMessage::new(Role::Tool, &output).with_tool(call.name()),
                        );
                        messages.push(Message::tool(output));
                    }
                }
            }
        }

        tracing::warn!("Orchestrator reached max iterations ({}), stopping", self.max_iterations);
        Err(AgentError::IterationLimit(self.max_iterations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, PersonaTask};
    use crate::events::{event_channel, RunEvent};
    use crate::llm::ToolCall;
    use crate::memory::{InMemoryStore, MemoryMessage};
    use crate::planner::SequencePlanner;
    use crate::schema::Schema;
    use crate::testing::MockBackend;
    use async_trait::async_trait;
    use serde_json::json;

    fn writer_tool(backend: Arc<MockBackend>) -> Capability {
        let persona = Persona::new("Copywriter", "write", backend);
        Capability::new(
            "copywriter-agent",
            "Calls the copywriter agent to write blog post copy.",
            Schema::new().string("topic", "Blog post topic"),
            Schema::new().string("copy", "Blog post copy"),
            PersonaTask::new(persona, "Write a blog post about {topic}", "copy"),
        )
    }

    fn editor_tool(backend: Arc<MockBackend>) -> Capability {
        let persona = Persona::new("Editor", "edit", backend);
        Capability::new(
            "editor-agent",
            "Calls the editor agent to edit blog post copy.",
            Schema::new().string("copy", "Blog post copy"),
            Schema::new().string("copy", "Blog post copy"),
            PersonaTask::new(persona, "Edit: {copy}", "copy"),
        )
    }

    #[tokio::test]
    async fn test_backend_planned_tool_chain() {
        let planner_backend = Arc::new(
            MockBackend::new()
                .reply_calls(vec![ToolCall::new("copywriter-agent", json!({"topic": "Rust"}))])
                .reply_calls(vec![ToolCall::new("editor-agent", json!({"copy": "draft"}))])
                .reply("final edited copy"),
        );
        let tool_backend = Arc::new(MockBackend::new().reply("draft").reply("edited"));

        let publisher = Persona::new("Publisher", "publish", planner_backend.clone());
        let orchestrator = Orchestrator::new(publisher)
            .with_tools(
                ToolSet::new()
                    .with_tool(writer_tool(tool_backend.clone()))
                    .with_tool(editor_tool(tool_backend.clone())),
            );

        let generation = orchestrator
            .generate("Write a blog post about Rust", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(generation.text, "final edited copy");
        assert_eq!(
            tool_backend.prompts(),
            vec!["Write a blog post about Rust", "Edit: draft"]
        );

        // Third planner request carries both tool results
        let last = &planner_backend.requests()[2];
        let tool_results: Vec<_> = last.messages.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_results.len(), 2);
        assert_eq!(tool_results[0].content, r#"{"copy":"draft"}"#);
    }

    #[tokio::test]
    async fn test_planner_may_skip_tools() {
        let backend = Arc::new(MockBackend::new().reply("I answered directly."));
        let tool_backend = Arc::new(MockBackend::new());
        let orchestrator = Orchestrator::new(Persona::new("Publisher", "publish", backend))
            .with_tools(ToolSet::new().with_tool(writer_tool(tool_backend.clone())));

        let generation = orchestrator
            .generate("hello", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(generation.text, "I answered directly.");
        assert_eq!(tool_backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_sequence_planner_with_memory() {
        let tool_backend = Arc::new(MockBackend::echo());
        let memory = Arc::new(InMemoryStore::new());
        let publisher = Persona::new("Publisher", "publish", Arc::new(MockBackend::new()));
        let orchestrator = Orchestrator::new(publisher)
            .with_tools(
                ToolSet::new()
                    .with_tool(writer_tool(tool_backend.clone()))
                    .with_tool(editor_tool(tool_backend.clone())),
            )
            .with_planner(Arc::new(SequencePlanner::new(
                ["copywriter-agent", "editor-agent"],
                "topic",
                "copy",
            )))
            .with_memory(memory.clone());

        let session = SessionKey::thread("blog-thread");
        let generation = orchestrator
            .generate("Angular frameworks", Some(&session), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            generation.text,
            "echo: Edit: echo: Write a blog post about Angular frameworks"
        );

        let stored: Vec<MemoryMessage> = memory.load(&session, None).await.unwrap();
        let roles: Vec<Role> = stored.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::User,
                Role::Assistant,
                Role::Tool,
                Role::Assistant,
                Role::Tool,
                Role::Assistant
            ]
        );
        assert_eq!(stored.last().unwrap().content, generation.text);
    }

    #[tokio::test]
    async fn test_history_is_replayed_for_same_session() {
        let backend = Arc::new(MockBackend::new().reply("first answer").reply("second answer"));
        let memory = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(Persona::new("Publisher", "publish", backend.clone()))
            .with_memory(memory);
        let session = SessionKey::thread("t1");
        let cancel = CancellationToken::new();

        orchestrator.generate("first", Some(&session), &cancel).await.unwrap();
        orchestrator.generate("second", Some(&session), &cancel).await.unwrap();

        let second_request = &backend.requests()[1];
        let contents: Vec<&str> =
            second_request.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["publish", "first", "first answer", "second"]);
    }

    #[tokio::test]
    async fn test_no_session_means_no_memory() {
        let backend = Arc::new(MockBackend::new().reply("a").reply("b"));
        let memory = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(Persona::new("Publisher", "publish", backend.clone()))
            .with_memory(memory);
        let cancel = CancellationToken::new();

        orchestrator.generate("one", None, &cancel).await.unwrap();
        orchestrator.generate("two", None, &cancel).await.unwrap();

        assert_eq!(backend.requests()[1].messages.len(), 2);
    }

    #[tokio::test]
    async fn test_tool_failure_propagates_and_skips_memory() {
        let planner_backend = Arc::new(
            MockBackend::new()
                .reply_calls(vec![ToolCall::new("copywriter-agent", json!({"topic": 5}))]),
        );
        let memory = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(Persona::new("Publisher", "publish", planner_backend))
            .with_tools(ToolSet::new().with_tool(writer_tool(Arc::new(MockBackend::new()))))
            .with_memory(memory.clone());
        let session = SessionKey::thread("t");

        let err = orchestrator
            .generate("go", Some(&session), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert!(memory.load(&session, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let backend = Arc::new(
            MockBackend::new().reply_calls(vec![ToolCall::new("publish-now", json!({}))]),
        );
        let orchestrator = Orchestrator::new(Persona::new("Publisher", "publish", backend));

        let err = orchestrator
            .generate("go", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::UnknownTool("publish-now".to_string()));
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let backend = Arc::new(MockBackend::new().responder(|_| {
            Ok(crate::llm::ChatResponse::calls(vec![ToolCall::new(
                "copywriter-agent",
                json!({"topic": "again"}),
            )]))
        }));
        let orchestrator = Orchestrator::new(Persona::new("Publisher", "publish", backend))
            .with_tools(ToolSet::new().with_tool(writer_tool(Arc::new(MockBackend::echo()))))
            .with_max_iterations(3);

        let err = orchestrator
            .generate("loop forever", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::IterationLimit(3));
    }

    struct FailingMemory;

    #[async_trait]
    impl MemoryStore for FailingMemory {
        async fn load(
            &self,
            _session: &SessionKey,
            _limit: Option<usize>,
        ) -> Result<Vec<MemoryMessage>> {
            Ok(Vec::new())
        }

        async fn append(
            &self,
            _session: &SessionKey,
            _messages: Vec<NewMemoryMessage>,
        ) -> Result<()> {
            Err(AgentError::memory("disk full"))
        }
    }

    struct UnreadableMemory;

    #[async_trait]
    impl MemoryStore for UnreadableMemory {
        async fn load(
            &self,
            _session: &SessionKey,
            _limit: Option<usize>,
        ) -> Result<Vec<MemoryMessage>> {
            Err(AgentError::memory("database is locked"))
        }

        async fn append(
            &self,
            _session: &SessionKey,
            _messages: Vec<NewMemoryMessage>,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn error_events(rx: &mut crate::events::EventReceiver) -> Vec<String> {
        let mut errors = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RunEvent::Error { message } = event {
                errors.push(message);
            }
        }
        errors
    }

    #[tokio::test]
    async fn test_history_load_failure_reported() {
        let (tx, mut rx) = event_channel();
        let backend = Arc::new(MockBackend::new().reply("never"));
        let orchestrator = Orchestrator::new(Persona::new("P", "p", backend.clone()))
            .with_memory(Arc::new(UnreadableMemory))
            .with_event_sender(tx);

        let err = orchestrator
            .generate("x", Some(&SessionKey::thread("t")), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, AgentError::Memory("database is locked".to_string()));
        assert_eq!(backend.call_count(), 0);
        assert_eq!(error_events(&mut rx), vec![err.to_string()]);
    }

    #[tokio::test]
    async fn test_append_failure_reported_under_fail_policy() {
        let (tx, mut rx) = event_channel();
        let persona = Persona::new("P", "p", Arc::new(MockBackend::new().reply("lost")));
        let orchestrator = Orchestrator::new(persona)
            .with_memory(Arc::new(FailingMemory))
            .with_memory_failure_policy(MemoryFailurePolicy::Fail)
            .with_event_sender(tx);

        let err = orchestrator
            .generate("x", Some(&SessionKey::thread("t")), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error_events(&mut rx), vec![err.to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_during_tool_call() {
        let planner_backend = Arc::new(
            MockBackend::new()
                .reply_calls(vec![ToolCall::new("copywriter-agent", json!({"topic": "Rust"}))]),
        );
        let tool_backend =
            Arc::new(MockBackend::echo().with_delay(std::time::Duration::from_secs(30)));
        let memory = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(Persona::new("Publisher", "publish", planner_backend))
            .with_tools(ToolSet::new().with_tool(writer_tool(tool_backend.clone())))
            .with_memory(memory.clone());
        let session = SessionKey::thread("t");

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = orchestrator.generate("go", Some(&session), &token).await.unwrap_err();

        assert_eq!(err, AgentError::Cancelled);
        assert_eq!(tool_backend.call_count(), 1);
        assert!(memory.load(&session, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_failure_policies() {
        let session = SessionKey::thread("t");
        let cancel = CancellationToken::new();

        let kept = Persona::new("P", "p", Arc::new(MockBackend::new().reply("kept")));
        let warn = Orchestrator::new(kept).with_memory(Arc::new(FailingMemory));
        assert_eq!(warn.generate("x", Some(&session), &cancel).await.unwrap().text, "kept");

        let lost = Persona::new("P", "p", Arc::new(MockBackend::new().reply("lost")));
        let fail = Orchestrator::new(lost)
            .with_memory(Arc::new(FailingMemory))
            .with_memory_failure_policy(MemoryFailurePolicy::Fail);
        assert_eq!(
            fail.generate("x", Some(&session), &cancel).await.unwrap_err(),
            AgentError::Memory("disk full".to_string())
        );
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let (tx, mut rx) = event_channel();
        let planner_backend = Arc::new(
            MockBackend::new()
                .reply_calls(vec![ToolCall::new("copywriter-agent", json!({"topic": "Rust"}))])
                .reply("done"),
        );
        let orchestrator = Orchestrator::new(Persona::new("Publisher", "publish", planner_backend))
            .with_tools(ToolSet::new().with_tool(writer_tool(Arc::new(MockBackend::echo()))))
            .with_event_sender(tx);

        orchestrator.generate("go", None, &CancellationToken::new()).await.unwrap();
        drop(orchestrator);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(match event {
                RunEvent::GenerationStart { .. } => "start",
                RunEvent::Iteration { .. } => "iteration",
                RunEvent::ToolStart { .. } => "tool_start",
                RunEvent::ToolComplete { is_error, .. } => {
                    assert!(!is_error);
                    "tool_complete"
                }
                RunEvent::GenerationComplete { .. } => "complete",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["start", "iteration", "tool_start", "tool_complete", "complete"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let backend = Arc::new(MockBackend::new().reply("never"));
        let orchestrator = Orchestrator::new(Persona::new("Publisher", "publish", backend.clone()));
        let token = CancellationToken::new();
        token.cancel();

        let err = orchestrator.generate("go", None, &token).await.unwrap_err();
        assert_eq!(err, AgentError::Cancelled);
        assert_eq!(backend.call_count(), 0);
    }
}
