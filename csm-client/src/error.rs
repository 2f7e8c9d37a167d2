/// Errors that can happen when talking to the user state service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any error emitted from the underlying [`reqwest`] client, including non-success HTTP
    /// statuses and malformed response bodies.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// The connection settings do not form a valid service URL.
    #[error("invalid service url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The service URL cannot have path segments appended to it.
    #[error("service url `{0}` cannot be used as a base")]
    CannotBeABase(String),
    /// A storage failure reported by a non-HTTP client.
    #[error("storage error: {0}")]
    Storage(String),
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
