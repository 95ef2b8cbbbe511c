/// Events emitted while a chat response streams in.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text content from the model.
    TextDelta { text: String },

    /// Stream completed. Token counts come from the final NDJSON record.
    Done {
        model: String,
        tokens_in: u32,
        tokens_out: u32,
    },

    /// Stream ended with an error after partial output.
    Error { message: String },
}
