//! Streaming chat client for Ollama-compatible endpoints.
//!
//! One request shape: a single user message whose content is
//! `context + "\n" + prompt`, optionally carrying base64 images. Responses
//! stream as newline-delimited JSON; chunks are forwarded on a channel with
//! a terminal `Done` event, and the collected text is the return value.

pub mod backend;
pub mod client;
pub mod error;
pub mod stream;

pub use backend::ChatBackend;
pub use client::{ChatRequest, ModelInfo, OllamaClient};
pub use error::LlmError;
pub use stream::StreamEvent;
