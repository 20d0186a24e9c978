pub mod canvas;
pub mod chart;

pub use canvas::*;
pub use chart::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const GENERAL_SESSION_ID: &str = "general";

#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn general() -> Self {
        Self(GENERAL_SESSION_ID.to_string())
    }

    pub fn is_general(&self) -> bool {
        self.0 == GENERAL_SESSION_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry of a session transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ChatSession {
    pub fn new(id: SessionId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            messages: Vec::new(),
        }
    }

    pub fn general() -> Self {
        Self::new(SessionId::general(), "General")
    }
}

/// A node of the component tree rendered by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiNode {
    pub component: String,
    #[serde(default)]
    pub props: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub children: Vec<UiNode>,
}

impl UiNode {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            props: serde_json::Map::new(),
            children: Vec::new(),
        }
    }

    pub fn with_prop(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }

    pub fn with_child(mut self, child: UiNode) -> Self {
        self.children.push(child);
        self
    }
}

/// A message of the shared conversation thread owned by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Components rendered alongside the text (assistant messages only).
    #[serde(default)]
    pub ui: Vec<UiNode>,
}

impl ThreadMessage {
    pub fn to_message(&self) -> Message {
        Message {
            id: self.id.clone(),
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Column descriptor reported by the dataset schema provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(default)]
    pub detected_type: String,
}

/// Notifications published by the router for the canvas/UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CanvasEvent {
    SessionOpened {
        session_id: SessionId,
        title: String,
    },
    ReplyUpdated {
        session_id: SessionId,
        message_id: String,
    },
    ChartsPlaced {
        source_message_id: String,
        node_ids: Vec<String>,
    },
    SendFailed {
        session_id: SessionId,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_session_id() {
        let id = SessionId::general();
        assert!(id.is_general());
        assert_eq!(id.to_string(), "general");
        assert!(!SessionId::from("node-abc").is_general());
    }

    #[test]
    fn thread_message_without_ui_defaults_to_empty() {
        let json = r#"{"id":"m1","role":"assistant","content":"hi"}"#;
        let msg: ThreadMessage = serde_json::from_str(json).unwrap();
        assert!(msg.ui.is_empty());
        assert_eq!(msg.to_message().role, Role::Assistant);
    }

    #[test]
    fn ui_tree_deserializes_nested_children() {
        let json = r#"{
            "component": "Group",
            "children": [
                {"component": "ScatterPlot", "props": {"x": "Age", "y": "Salary"}},
                {"component": "Text", "props": {"text": "done"}}
            ]
        }"#;
        let node: UiNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.children.len(), 2);
        assert_eq!(node.children[0].props["x"], "Age");
        assert!(node.props.is_empty());
    }

    #[test]
    fn canvas_event_serde_roundtrip() {
        let event = CanvasEvent::ChartsPlaced {
            source_message_id: "m1".into(),
            node_ids: vec!["a".into(), "b".into()],
        };
        let json = serde_json::to_string(&event).unwrap();
        let de: CanvasEvent = serde_json::from_str(&json).unwrap();
        match de {
            CanvasEvent::ChartsPlaced { node_ids, .. } => assert_eq!(node_ids.len(), 2),
            _ => panic!("Expected ChartsPlaced"),
        }
    }
}
