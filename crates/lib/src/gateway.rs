//! Command execution gateway: validate a raw kubectl command against the policy,
//! run it as a subprocess, and normalize the outcome into a [`CommandResult`].
//!
//! Every failure is reported as data. Nothing raised here crosses [`Gateway::execute`].

use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::{EventKind, EventSink, GatewayEvent, NoopSink};
use crate::exec::{CommandRunner, EnvSource, Invocation, ProcessEnv, ProcessRunner};
use crate::policy::{PolicyConfig, ValidatedCommand};

/// Environment variable holding the kubeconfig path forwarded to the child.
pub const DEFAULT_KUBECONFIG_ENV: &str = "KUBECONFIG";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("empty command")]
    EmptyCommand,
    #[error("Command '{verb}' is not allowed. Allowed commands: [{}]", .allowed.join(", "))]
    CommandNotAllowed { verb: String, allowed: Vec<String> },
    #[error("Error executing command: {}", failure_detail(.status, .stderr))]
    ExecutionFailed { status: Option<i32>, stderr: String },
    #[error("failed to launch {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },
}

fn failure_detail(status: &Option<i32>, stderr: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match status {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Normalized outcome of one gateway call. `error` is set whenever `output` is not trustworthy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<Result<String, GatewayError>> for CommandResult {
    fn from(res: Result<String, GatewayError>) -> Self {
        match res {
            Ok(out) => Self::success(out),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

/// Validates and executes kubectl commands. Holds no per-call state; clones share the policy.
#[derive(Clone)]
pub struct Gateway {
    policy: Arc<PolicyConfig>,
    kubeconfig_env: String,
    runner: Arc<dyn CommandRunner>,
    env: Arc<dyn EnvSource>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("policy", &self.policy)
            .field("kubeconfig_env", &self.kubeconfig_env)
            .finish_non_exhaustive()
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

impl Gateway {
    /// Gateway with real subprocesses, the calling process's environment, and no event listener.
    pub fn new(policy: PolicyConfig) -> Self {
        Self {
            policy: Arc::new(policy),
            kubeconfig_env: DEFAULT_KUBECONFIG_ENV.to_string(),
            runner: Arc::new(ProcessRunner),
            env: Arc::new(ProcessEnv),
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.runner = Arc::new(runner);
        self
    }

    pub fn with_env(mut self, env: impl EnvSource + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Name of the variable forwarded into the child (default `KUBECONFIG`).
    pub fn with_kubeconfig_env(mut self, name: impl Into<String>) -> Self {
        self.kubeconfig_env = name.into();
        self
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Validate and run `raw`. Never fails; the outcome is carried in the result.
    pub fn execute(&self, raw: &str) -> CommandResult {
        self.try_execute(raw).into()
    }

    /// Same flow as [`Gateway::execute`], keeping the error kind.
    pub fn try_execute(&self, raw: &str) -> Result<String, GatewayError> {
        self.emit(EventKind::Validating, raw);
        let res = self
            .policy
            .validate(raw)
            .map_err(|e| {
                log::warn!("gateway: rejected {:?}: {}", raw, e);
                e
            })
            .and_then(|cmd| self.run(&cmd));
        match &res {
            Ok(out) => self.emit(EventKind::Succeeded, format!("{} bytes", out.len())),
            Err(e) => self.emit(EventKind::Failed, e.to_string()),
        }
        res
    }

    fn run(&self, cmd: &ValidatedCommand) -> Result<String, GatewayError> {
        let kubeconfig = self.env.var(&self.kubeconfig_env).unwrap_or_default();
        let invocation = Invocation {
            program: cmd.program.clone(),
            args: cmd.args.clone(),
            env: vec![(self.kubeconfig_env.clone(), kubeconfig)],
        };
        let argv = cmd.argv().join(" ");
        log::debug!("gateway: running {}", argv);
        self.emit(EventKind::Executing, argv);

        let output = self
            .runner
            .run(&invocation)
            .map_err(|source| GatewayError::SpawnFailed {
                program: cmd.program.clone(),
                source,
            })?;
        if output.success {
            return Ok(output.stdout.trim_end().to_string());
        }
        log::warn!(
            "gateway: {} exited with {:?}",
            cmd.program,
            output.status
        );
        Err(GatewayError::ExecutionFailed {
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        })
    }

    fn emit(&self, kind: EventKind, detail: impl Into<String>) {
        self.sink.emit(&GatewayEvent::new(kind, detail));
    }
}
