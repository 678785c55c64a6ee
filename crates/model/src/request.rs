use serde_json::Value;

/// A request to be sent to the model provider.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelRequest {
    /// The input messages.
    pub messages: Vec<ModelMessage>,
    /// Constrains the output to a JSON document, if set.
    pub response_format: Option<ResponseFormat>,
    /// The sampling temperature. Providers use their default if unset.
    pub temperature: Option<f32>,
}

/// A complete message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelMessage {
    /// The system instructions.
    System(String),
    /// A user input text.
    User(String),
    /// An assistant text.
    Assistant(String),
}

/// Describes the structured output the model must produce.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResponseFormat {
    /// Name of the output type, e.g. `search_query_list`.
    pub name: String,
    /// The [JSON schema](https://json-schema.org/) of the output.
    pub schema: Value,
    /// Whether the provider should enforce the schema strictly.
    pub strict: bool,
}

impl ModelRequest {
    /// Returns the name of the requested output format, if any.
    #[inline]
    pub fn format_name(&self) -> Option<&str> {
        self.response_format.as_ref().map(|f| f.name.as_str())
    }
}
