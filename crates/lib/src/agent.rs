//! Agent loop: ask the model, run any tool requests through a [`ToolExecutor`], feed results back,
//! and stop once the model answers without tool calls.
//!
//! Two modes share the loop: free-form questions ([`run_query`]) and issue diagnosis
//! ([`run_diagnosis`]), whose final answer is parsed into a [`Diagnosis`].

use serde::{Deserialize, Serialize};

use crate::gateway::CommandResult;
use crate::llm::{ChatBackend, ChatError, ChatMessage, ChatResponse, ToolDefinition};

pub const SYSTEM_PROMPT: &str = "You are a Kubernetes expert. \
Your task is to help users explore and fix Kubernetes clusters.\n\
- Use the kubectl tool to gather information about the cluster.\n\
- Provide a clear and concise response, focused on primary failure conditions.\n\
- Keep the response directly relevant to the query.\n\
- If you used kubectl, include the commands you ran.\n\
- Explain your reasoning for any recommendation by referencing data you observed.";

pub const DIAGNOSIS_PROMPT: &str = "You are a Kubernetes expert. \
Your task is to diagnose cluster issues.\n\
- Analyze the reported issue.\n\
- Use the kubectl tool whenever you need cluster information.\n\
- When you have enough information, stop calling tools and reply with only a JSON object:\n\
{\"diagnosis\": \"<analysis of the issue>\", \"recommended_actions\": [\"<step>\", ...]}";

/// Executes a tool by name and JSON arguments. Returns output or error string.
pub trait ToolExecutor: Send + Sync {
    /// Tool definitions offered to the model.
    fn definitions(&self) -> Vec<ToolDefinition>;

    fn execute(&self, name: &str, args: &serde_json::Value) -> Result<String, String>;

    /// Commands run since the last call, with their results. Executors that do not run
    /// cluster commands report nothing.
    fn drain_commands(&self) -> Vec<(String, CommandResult)> {
        Vec::new()
    }
}

/// One tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub tool: String,
    pub arguments: serde_json::Value,
}

/// What the model asked for in one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStep {
    ToolRequest(Vec<ToolRequest>),
    FinalAnswer(String),
}

impl AgentStep {
    pub fn from_response(res: &ChatResponse) -> Self {
        let calls = res.tool_calls();
        if calls.is_empty() {
            return AgentStep::FinalAnswer(res.content().to_string());
        }
        AgentStep::ToolRequest(
            calls
                .iter()
                .map(|c| ToolRequest {
                    tool: c.function.name.clone(),
                    arguments: c.function.arguments.clone(),
                })
                .collect(),
        )
    }
}

/// Outcome of one query: the answer plus every command issued and its result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentReport {
    pub response: String,
    pub commands: Vec<String>,
    pub outputs: Vec<CommandResult>,
}

/// Structured final answer of a diagnosis run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub diagnosis: String,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
}

impl Diagnosis {
    /// Parse the model's final reply. Takes the outermost `{...}` in the text (models often wrap
    /// JSON in prose or code fences); anything unparsable becomes the diagnosis text with no actions.
    pub fn parse(text: &str) -> Self {
        let json = match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if start < end => {
                serde_json::from_str::<Diagnosis>(&text[start..=end]).ok()
            }
            _ => None,
        };
        json.unwrap_or_else(|| {
            log::debug!("agent: diagnosis reply was not JSON, keeping text");
            Diagnosis {
                diagnosis: text.trim().to_string(),
                recommended_actions: Vec::new(),
            }
        })
    }
}

/// Diagnosis plus the commands that informed it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosisReport {
    pub diagnosis: Diagnosis,
    pub commands: Vec<String>,
    pub outputs: Vec<CommandResult>,
}

/// Run one query. `history` carries the conversation across calls; the system prompt is added
/// when it is empty. Bounded by `max_steps` model calls.
pub async fn run_query<B: ChatBackend + ?Sized>(
    backend: &B,
    model: &str,
    executor: &dyn ToolExecutor,
    history: &mut Vec<ChatMessage>,
    query: &str,
    max_steps: usize,
) -> Result<AgentReport, ChatError> {
    run_loop(backend, model, executor, history, SYSTEM_PROMPT, query, max_steps).await
}

/// Diagnose a reported issue in a fresh conversation.
pub async fn run_diagnosis<B: ChatBackend + ?Sized>(
    backend: &B,
    model: &str,
    executor: &dyn ToolExecutor,
    issue: &str,
    max_steps: usize,
) -> Result<DiagnosisReport, ChatError> {
    let mut history = Vec::new();
    let report = run_loop(
        backend,
        model,
        executor,
        &mut history,
        DIAGNOSIS_PROMPT,
        issue,
        max_steps,
    )
    .await?;
    Ok(DiagnosisReport {
        diagnosis: Diagnosis::parse(&report.response),
        commands: report.commands,
        outputs: report.outputs,
    })
}

async fn run_loop<B: ChatBackend + ?Sized>(
    backend: &B,
    model: &str,
    executor: &dyn ToolExecutor,
    history: &mut Vec<ChatMessage>,
    system_prompt: &str,
    query: &str,
    max_steps: usize,
) -> Result<AgentReport, ChatError> {
    if history.is_empty() {
        history.push(ChatMessage::new("system", system_prompt));
    }
    history.push(ChatMessage::new("user", query));

    let tools = executor.definitions();
    let mut report = AgentReport::default();

    for _ in 0..max_steps.max(1) {
        log::info!("agent: generating response with {}", model);
        let res = backend
            .chat(model, history.clone(), Some(tools.clone()))
            .await?;
        report.response = res.content().to_string();

        let requests = match AgentStep::from_response(&res) {
            AgentStep::FinalAnswer(text) => {
                history.push(ChatMessage::new("assistant", text));
                return Ok(report);
            }
            AgentStep::ToolRequest(requests) => requests,
        };
        history.push(
            res.message
                .clone()
                .unwrap_or_else(|| ChatMessage::new("assistant", "")),
        );

        for req in requests {
            let content = match executor.execute(&req.tool, &req.arguments) {
                Ok(out) => out,
                Err(e) => {
                    log::warn!("agent: tool {} failed: {}", req.tool, e);
                    format!("error: {}", e)
                }
            };
            for (command, result) in executor.drain_commands() {
                report.commands.push(command);
                report.outputs.push(result);
            }
            history.push(ChatMessage::tool_result(&req.tool, content));
        }
    }

    log::warn!("agent: max steps reached without a final answer");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tests::FakeRunner;
    use crate::gateway::Gateway;
    use crate::llm::{ToolCall, ToolCallFunction};
    use crate::tools::{KubectlTool, KUBECTL_TOOL_NAME};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Replays canned replies in order and records what it was sent.
    struct ScriptedBackend {
        replies: Mutex<Vec<ChatResponse>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedBackend {
        fn new(mut replies: Vec<ChatResponse>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn chat(
            &self,
            _model: &str,
            messages: Vec<ChatMessage>,
            _tools: Option<Vec<ToolDefinition>>,
        ) -> Result<ChatResponse, ChatError> {
            self.seen.lock().unwrap().push(messages);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ChatError::Api("no more replies".to_string()))
        }
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            typ: "function".to_string(),
            function: ToolCallFunction {
                index: None,
                name: name.to_string(),
                arguments: args,
            },
        }
    }

    fn kubectl(cmd: &str) -> ToolCall {
        call(KUBECTL_TOOL_NAME, json!({ "command": cmd }))
    }

    #[test]
    fn step_from_plain_reply_is_final() {
        let res = ChatResponse::assistant("all good", vec![]);
        assert_eq!(
            AgentStep::from_response(&res),
            AgentStep::FinalAnswer("all good".to_string())
        );
    }

    #[test]
    fn step_from_tool_calls_is_request() {
        let res = ChatResponse::assistant("", vec![kubectl("get pods"), call("other", json!({}))]);
        let AgentStep::ToolRequest(reqs) = AgentStep::from_response(&res) else {
            panic!("expected tool request");
        };
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].tool, KUBECTL_TOOL_NAME);
        assert_eq!(reqs[0].arguments, json!({ "command": "get pods" }));
        assert_eq!(reqs[1].tool, "other");
    }

    #[tokio::test]
    async fn answers_without_tools() {
        let backend = ScriptedBackend::new(vec![ChatResponse::assistant("Kubernetes is...", vec![])]);
        let runner = Arc::new(FakeRunner::ok("unused"));
        let tool = KubectlTool::new(Gateway::default().with_runner(runner.clone()));
        let mut history = Vec::new();

        let report = run_query(&backend, "m", &tool, &mut history, "What is Kubernetes?", 8)
            .await
            .unwrap();

        assert_eq!(report.response, "Kubernetes is...");
        assert!(report.commands.is_empty());
        assert_eq!(runner.spawn_count(), 0);
        assert_eq!(history[0].role, "system");
        assert_eq!(history.last().unwrap().role, "assistant");
    }

    #[tokio::test]
    async fn runs_requested_commands_then_answers() {
        let backend = ScriptedBackend::new(vec![
            ChatResponse::assistant("Checking pods", vec![kubectl("get pods")]),
            ChatResponse::assistant("Checking services", vec![kubectl("kubectl get services")]),
            ChatResponse::assistant("Final response", vec![]),
        ]);
        let runner = Arc::new(FakeRunner::ok("NAME READY\n"));
        let tool = KubectlTool::new(Gateway::default().with_runner(runner.clone()));
        let mut history = Vec::new();

        let report = run_query(&backend, "m", &tool, &mut history, "Describe cluster state", 8)
            .await
            .unwrap();

        assert_eq!(report.response, "Final response");
        assert_eq!(report.commands, ["get pods", "kubectl get services"]);
        assert!(report.outputs.iter().all(|o| o.output == "NAME READY"));
        assert_eq!(runner.spawn_count(), 2);

        let seen = backend.seen.lock().unwrap();
        let tool_msg = seen[1].last().unwrap();
        assert_eq!(tool_msg.role, "tool");
        assert_eq!(tool_msg.tool_name.as_deref(), Some(KUBECTL_TOOL_NAME));
        assert_eq!(tool_msg.content, "Command: get pods\nOutput: NAME READY\nError: None");
    }

    #[tokio::test]
    async fn rejected_command_is_reported_to_model() {
        let backend = ScriptedBackend::new(vec![
            ChatResponse::assistant("", vec![kubectl("delete pod web-0")]),
            ChatResponse::assistant("I cannot delete pods.", vec![]),
        ]);
        let runner = Arc::new(FakeRunner::ok(""));
        let tool = KubectlTool::new(Gateway::default().with_runner(runner.clone()));
        let mut history = Vec::new();

        let report = run_query(&backend, "m", &tool, &mut history, "delete web-0", 8)
            .await
            .unwrap();

        assert_eq!(runner.spawn_count(), 0);
        assert_eq!(report.outputs.len(), 1);
        assert!(report.outputs[0].error.as_deref().unwrap().contains("not allowed"));
        let seen = backend.seen.lock().unwrap();
        assert!(seen[1].last().unwrap().content.contains("Error: Command 'delete'"));
    }

    #[tokio::test]
    async fn unknown_tool_gets_error_message() {
        let backend = ScriptedBackend::new(vec![
            ChatResponse::assistant("", vec![call("helm", json!({ "command": "list" }))]),
            ChatResponse::assistant("done", vec![]),
        ]);
        let tool = KubectlTool::new(Gateway::default().with_runner(Arc::new(FakeRunner::ok(""))));
        let mut history = Vec::new();

        let report = run_query(&backend, "m", &tool, &mut history, "q", 8).await.unwrap();

        assert!(report.commands.is_empty());
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[1].last().unwrap().content, "error: unknown tool: helm");
    }

    #[tokio::test]
    async fn stops_at_step_bound() {
        let backend = ScriptedBackend::new(vec![
            ChatResponse::assistant("one", vec![kubectl("get pods")]),
            ChatResponse::assistant("two", vec![kubectl("get pods")]),
            ChatResponse::assistant("never", vec![]),
        ]);
        let runner = Arc::new(FakeRunner::ok("x"));
        let tool = KubectlTool::new(Gateway::default().with_runner(runner.clone()));
        let mut history = Vec::new();

        let report = run_query(&backend, "m", &tool, &mut history, "q", 2).await.unwrap();

        assert_eq!(report.response, "two");
        assert_eq!(runner.spawn_count(), 2);
        assert_eq!(backend.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn history_carries_across_queries() {
        let backend = ScriptedBackend::new(vec![
            ChatResponse::assistant("first", vec![]),
            ChatResponse::assistant("second", vec![]),
        ]);
        let tool = KubectlTool::new(Gateway::default().with_runner(Arc::new(FakeRunner::ok(""))));
        let mut history = Vec::new();

        run_query(&backend, "m", &tool, &mut history, "q1", 8).await.unwrap();
        run_query(&backend, "m", &tool, &mut history, "q2", 8).await.unwrap();

        let roles: Vec<&str> = history.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user", "assistant"]);
    }

    #[tokio::test]
    async fn backend_error_propagates() {
        let backend = ScriptedBackend::new(vec![]);
        let tool = KubectlTool::new(Gateway::default().with_runner(Arc::new(FakeRunner::ok(""))));
        let mut history = Vec::new();
        let err = run_query(&backend, "m", &tool, &mut history, "q", 8).await.unwrap_err();
        assert!(err.to_string().contains("no more replies"));
    }

    /// Executor with no cluster access: echoes its arguments.
    struct EchoExecutor;

    impl ToolExecutor for EchoExecutor {
        fn definitions(&self) -> Vec<ToolDefinition> {
            Vec::new()
        }

        fn execute(&self, name: &str, args: &serde_json::Value) -> Result<String, String> {
            match name {
                "echo" => Ok(args.to_string()),
                _ => Err(format!("unknown tool: {}", name)),
            }
        }
    }

    #[tokio::test]
    async fn loop_dispatches_through_any_executor() {
        let backend = ScriptedBackend::new(vec![
            ChatResponse::assistant("", vec![call("echo", json!({ "x": 1 }))]),
            ChatResponse::assistant("done", vec![]),
        ]);
        let mut history = Vec::new();

        let report = run_query(&backend, "m", &EchoExecutor, &mut history, "q", 8)
            .await
            .unwrap();

        assert_eq!(report.response, "done");
        assert!(report.commands.is_empty());
        let seen = backend.seen.lock().unwrap();
        let tool_msg = seen[1].last().unwrap();
        assert_eq!(tool_msg.tool_name.as_deref(), Some("echo"));
        assert_eq!(tool_msg.content, r#"{"x":1}"#);
    }

    #[test]
    fn diagnosis_parses_json_reply() {
        let d = Diagnosis::parse(
            r#"{"diagnosis": "Image tag does not exist", "recommended_actions": ["Fix the tag", "Roll out again"]}"#,
        );
        assert_eq!(d.diagnosis, "Image tag does not exist");
        assert_eq!(d.recommended_actions, ["Fix the tag", "Roll out again"]);
    }

    #[test]
    fn diagnosis_parses_fenced_json() {
        let text = "Here is my diagnosis:\n```json\n{\"diagnosis\": \"OOMKilled\"}\n```";
        let d = Diagnosis::parse(text);
        assert_eq!(d.diagnosis, "OOMKilled");
        assert!(d.recommended_actions.is_empty());
    }

    #[test]
    fn diagnosis_falls_back_to_text() {
        let d = Diagnosis::parse("  The node is out of disk.  ");
        assert_eq!(d.diagnosis, "The node is out of disk.");
        assert!(d.recommended_actions.is_empty());
        let d = Diagnosis::parse("{ not json }");
        assert_eq!(d.diagnosis, "{ not json }");
    }

    #[tokio::test]
    async fn diagnosis_runs_commands_then_parses_answer() {
        let backend = ScriptedBackend::new(vec![
            ChatResponse::assistant("", vec![kubectl("describe pod web-0")]),
            ChatResponse::assistant(
                r#"{"diagnosis": "web-0 is in CrashLoopBackOff", "recommended_actions": ["Check logs"]}"#,
                vec![],
            ),
        ]);
        let runner = Arc::new(FakeRunner::ok("State: Waiting\nReason: CrashLoopBackOff\n"));
        let tool = KubectlTool::new(Gateway::default().with_runner(runner.clone()));

        let report = run_diagnosis(&backend, "m", &tool, "web-0 keeps restarting", 8)
            .await
            .unwrap();

        assert_eq!(report.diagnosis.diagnosis, "web-0 is in CrashLoopBackOff");
        assert_eq!(report.diagnosis.recommended_actions, ["Check logs"]);
        assert_eq!(report.commands, ["describe pod web-0"]);
        assert_eq!(report.outputs[0].output, "State: Waiting\nReason: CrashLoopBackOff");
        assert_eq!(runner.spawn_count(), 1);
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0][0].content, DIAGNOSIS_PROMPT);
        assert_eq!(seen[0][1].content, "web-0 keeps restarting");
    }
}
