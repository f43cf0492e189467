//! Tool layer: the kubectl tool exposed to the model, backed by the command gateway.

mod kubectl;

pub use kubectl::{kubectl_tool_definition, KubectlTool, KUBECTL_TOOL_NAME};
