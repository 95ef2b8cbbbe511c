use serde::{Deserialize, Serialize};

/// Where a prompt's final answer goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputTarget {
    #[default]
    Stdout,
    Chat,
}

/// One request per connection, newline-terminated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IpcRequest {
    /// Drive the orchestrator.
    Prompt {
        prompt: String,
        #[serde(default)]
        output: OutputTarget,
        #[serde(default)]
        channel: Option<String>,
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        context: Option<String>,
    },
    /// Send straight to the chat platform, no LLM involved.
    Message {
        message: String,
        #[serde(default)]
        channel: Option<String>,
        #[serde(default)]
        user: Option<String>,
    },
}

/// Response frames. The connection closes after `done` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IpcResponse {
    Chunk { content: String },
    Status { content: String },
    Done { content: String },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_request_parses_with_defaults() {
        let req: IpcRequest =
            serde_json::from_str(r#"{"type": "prompt", "prompt": "hi"}"#).unwrap();
        match req {
            IpcRequest::Prompt {
                prompt,
                output,
                channel,
                ..
            } => {
                assert_eq!(prompt, "hi");
                assert_eq!(output, OutputTarget::Stdout);
                assert!(channel.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn response_frames_use_the_wire_names() {
        let done = serde_json::to_value(IpcResponse::Done {
            content: "4".into(),
        })
        .unwrap();
        assert_eq!(done, serde_json::json!({"type": "done", "content": "4"}));
        let err = serde_json::to_value(IpcResponse::Error {
            message: "boom".into(),
        })
        .unwrap();
        assert_eq!(err, serde_json::json!({"type": "error", "message": "boom"}));
    }
}
