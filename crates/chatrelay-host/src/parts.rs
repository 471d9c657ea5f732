//! Rich response parts produced by request handlers.
//!
//! These are the handler-side representation; they never cross the host
//! link as-is. [`crate::serializer::serialize_part`] maps each one onto the
//! wire taxonomy.

use serde::Serialize;
use serde_json::Value;

/// Markdown either as a plain string or wrapped with rendering options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MarkdownContent {
    Plain(String),
    #[serde(rename_all = "camelCase")]
    Rich {
        value: String,
        is_trusted: bool,
        support_html: bool,
    },
}

impl MarkdownContent {
    /// The markdown source, without any wrapper.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain(value) | Self::Rich { value, .. } => value,
        }
    }
}

impl From<&str> for MarkdownContent {
    fn from(value: &str) -> Self {
        Self::Plain(value.to_string())
    }
}

impl From<String> for MarkdownContent {
    fn from(value: String) -> Self {
        Self::Plain(value)
    }
}

/// Body of a reasoning/thinking part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ThinkingBody {
    Single(String),
    Lines(Vec<String>),
}

impl ThinkingBody {
    pub fn joined(&self) -> String {
        match self {
            Self::Single(value) => value.clone(),
            Self::Lines(lines) => lines.join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vulnerability {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileTreeNode {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileTreeNode>,
}

/// One fragment of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ResponsePart {
    Progress {
        value: String,
    },
    Markdown {
        value: MarkdownContent,
    },
    MarkdownWithVulnerabilities {
        value: MarkdownContent,
        vulnerabilities: Vec<Vulnerability>,
    },
    Thinking {
        id: Option<String>,
        value: ThinkingBody,
    },
    Warning {
        value: MarkdownContent,
    },
    CodeblockUri {
        uri: String,
    },
    Reference {
        value: String,
    },
    PrepareToolInvocation {
        tool_name: String,
    },
    ToolInvocation {
        tool_name: String,
        tool_call_id: String,
        is_error: bool,
        is_complete: bool,
    },
    TextEdit {
        uri: String,
        edits: Vec<Value>,
    },
    NotebookEdit {
        uri: String,
        edits: Vec<Value>,
    },
    CodeCitation {
        uri: String,
        license: String,
        snippet: String,
    },
    FileTree {
        base_uri: String,
        value: Vec<FileTreeNode>,
    },
    Anchor {
        value: String,
        title: Option<String>,
    },
    CommandButton {
        command: String,
        title: String,
        arguments: Vec<Value>,
    },
    /// A part this crate has no dedicated shape for, passed through verbatim.
    #[serde(skip)]
    Other(Value),
}

impl ResponsePart {
    pub fn markdown(value: impl Into<String>) -> Self {
        Self::Markdown {
            value: MarkdownContent::Plain(value.into()),
        }
    }

    pub fn progress(value: impl Into<String>) -> Self {
        Self::Progress {
            value: value.into(),
        }
    }

    /// Whether the part is kept in the response turn recorded in history.
    pub const fn is_history_content(&self) -> bool {
        matches!(
            self,
            Self::Markdown { .. }
                | Self::FileTree { .. }
                | Self::Anchor { .. }
                | Self::CommandButton { .. }
                | Self::ToolInvocation { .. }
        )
    }
}
