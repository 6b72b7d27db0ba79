use serde_json::error::Category;

/// Errors that can occur when building or (de)serializing a map.
///
/// Missing keys are never errors; lookups report them through `Option` or
/// `bool` results.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The shard count is invalid (must be greater than 0).
    #[error("shard count must be greater than 0")]
    InvalidShardCount,

    /// The input is not syntactically valid JSON.
    #[error("malformed input: {0}")]
    Parse(#[source] serde_json::Error),

    /// The input is valid JSON but not an object of the expected key/value types.
    #[error("type mismatch: {0}")]
    TypeMismatch(#[source] serde_json::Error),

    /// The map could not be rendered as JSON (e.g. keys without a text form).
    #[error("serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl Error {
    /// Classify a decoding failure as a parse error or a type mismatch.
    pub(crate) fn from_decode(err: serde_json::Error) -> Self {
        match err.classify() {
            Category::Data => Error::TypeMismatch(err),
            Category::Syntax | Category::Eof | Category::Io => Error::Parse(err),
        }
    }
}
