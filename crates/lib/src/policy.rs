//! Command policy: split a raw command string into an argument vector and decide
//! whether its verb may run. Pure; never touches a process.

use crate::gateway::GatewayError;

/// Verbs permitted when no allowlist is configured.
pub const DEFAULT_ALLOWED_COMMANDS: [&str; 3] = ["get", "describe", "logs"];

/// Program name used to invoke the cluster-control tool.
pub const DEFAULT_PROGRAM: &str = "kubectl";

/// Immutable allowlist plus the program name that callers may prefix commands with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    program: String,
    allowed: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM, DEFAULT_ALLOWED_COMMANDS)
    }
}

impl PolicyConfig {
    /// Build a policy for `program` permitting exactly `allowed` (order kept, duplicates dropped).
    pub fn new<I, S>(program: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut verbs: Vec<String> = Vec::new();
        for verb in allowed {
            let verb = verb.into();
            if !verbs.contains(&verb) {
                verbs.push(verb);
            }
        }
        Self {
            program: program.into(),
            allowed: verbs,
        }
    }

    /// Same program, different allowlist.
    pub fn with_allowed<I, S>(&self, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(self.program.clone(), allowed)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Case-sensitive exact match.
    pub fn is_allowed(&self, verb: &str) -> bool {
        self.allowed.iter().any(|v| v == verb)
    }

    /// Validate a raw command and return the argv to execute.
    ///
    /// `"get pods"` and `"kubectl get pods"` are equivalent: a leading program
    /// token is stripped before the verb check. Only the first token after that
    /// is inspected; flags and later positionals pass through as-is.
    pub fn validate(&self, raw: &str) -> Result<ValidatedCommand, GatewayError> {
        let mut tokens: Vec<&str> = raw.split_whitespace().collect();
        if tokens.first() == Some(&self.program.as_str()) {
            tokens.remove(0);
        }
        let verb = *tokens.first().ok_or(GatewayError::EmptyCommand)?;
        if !self.is_allowed(verb) {
            return Err(GatewayError::CommandNotAllowed {
                verb: verb.to_string(),
                allowed: self.allowed.clone(),
            });
        }
        Ok(ValidatedCommand {
            program: self.program.clone(),
            args: tokens.into_iter().map(String::from).collect(),
        })
    }
}

/// Accepted command: program name plus verb and remaining arguments, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ValidatedCommand {
    pub fn verb(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }

    /// Full argument vector with the program re-attached.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}
