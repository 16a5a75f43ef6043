use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("malformed key {0:?}")]
    Malformed(String),

    #[error("key {key} not found in {document}")]
    NotFound { document: String, key: String },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot render {document}: {message}")]
    Content { document: String, message: String },

    #[error("key {key} is not part of {document}")]
    UnknownKey { document: String, key: String },
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state payload is not valid JSON")]
    Json(#[from] serde_json::Error),

    #[error("state payload must be a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown document category {0:?}")]
pub struct UnknownCategory(pub String);
