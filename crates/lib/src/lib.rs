//! kubeassist core library: the kubectl command policy and execution gateway, plus the
//! agent loop and Ollama client used by the CLI.

pub mod agent;
pub mod config;
pub mod events;
pub mod exec;
pub mod gateway;
pub mod llm;
pub mod policy;
pub mod tools;
