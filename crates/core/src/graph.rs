use serde::{Deserialize, Serialize};

use crate::conversation::Message;
use crate::tools::PENDING_BUY_MARKER;

/// Nodes of the approval workflow graph. `End` is terminal and never
/// executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeName {
    Chatbot,
    Tools,
    Approval,
    End,
}

impl NodeName {
    /// Every run enters the graph here.
    pub const START: NodeName = NodeName::Chatbot;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chatbot => "chatbot",
            Self::Tools => "tools",
            Self::Approval => "approval",
            Self::End => "end",
        }
    }
}

/// Routing decision after `node` produced (or declined to produce) output.
/// Inspects only the last message appended so far.
pub fn route_after(node: NodeName, last: Option<&Message>) -> NodeName {
    match node {
        NodeName::Chatbot => match last {
            Some(message) if message.is_tool() && message.content.starts_with(PENDING_BUY_MARKER) => {
                NodeName::Approval
            }
            Some(message) if message.has_tool_calls() => NodeName::Tools,
            _ => NodeName::End,
        },
        NodeName::Tools => NodeName::Approval,
        NodeName::Approval => NodeName::End,
        NodeName::End => NodeName::End,
    }
}
