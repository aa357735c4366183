/// Result alias that carries the custom [`StudioBridgeError`] type.
pub type Result<T> = std::result::Result<T, StudioBridgeError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum StudioBridgeError {
    /// Free-form message for failures that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors, e.g. an unreadable config file.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// A config value was present but could not be converted to the
    /// requested numeric type.
    #[error("config value `{value}` for `{key}` is not a valid {kind}")]
    InvalidNumber {
        key: String,
        value: String,
        kind: &'static str,
    },
    /// The audio middleware rejected a call.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// An engine operation was attempted before `initialize` succeeded.
    #[error("audio engine is not initialized")]
    NotInitialized,
}

impl StudioBridgeError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for StudioBridgeError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for StudioBridgeError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Failure reported by a [`StudioBackend`](crate::audio::StudioBackend)
/// implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("studio system is not valid")]
    InvalidSystem,
    #[error("invalid or released event instance")]
    InvalidHandle,
    #[error("bank `{0}` could not be loaded")]
    BankNotFound(String),
    #[error("event `{0}` not found")]
    EventNotFound(String),
    #[error("plugin `{0}` could not be loaded")]
    PluginNotFound(String),
    #[error("parameter `{0}` not found")]
    ParameterNotFound(String),
    #[error("{0}")]
    Other(String),
}
