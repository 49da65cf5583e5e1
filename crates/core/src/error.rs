/// Result alias that carries the custom [`HustlerError`] type.
pub type Result<T> = std::result::Result<T, HustlerError>;

/// Common error type for the core crate.
///
/// The display strings double as the payload of `error` responses sent back
/// to the operator, so they name the offending entity or value.
#[derive(Debug, thiserror::Error)]
pub enum HustlerError {
    /// A rate was constructed or updated with a non-positive or non-finite
    /// value.
    #[error("invalid rate: {0}")]
    InvalidRate(String),
    /// No entity is registered under the requested name.
    #[error("no entity with name `{0}`")]
    UnknownEntity(String),
    /// The entity exists but does not declare the requested parameter.
    #[error("`{entity}` has no parameter named `{parameter}`")]
    UnknownParameter { entity: String, parameter: String },
    /// The parameter exists but its validator rejected the payload.
    #[error("invalid value for `{parameter}`: {reason}")]
    InvalidValue { parameter: String, reason: String },
    /// A calibration table failed its ordering post-condition.
    #[error("calibration table is not ordered: {0}")]
    CalibrationOrdering(String),
    /// An inbound control message could not be decoded.
    #[error("could not decode control message: {0}")]
    TransportDecode(String),
    /// An entity name was registered twice.
    #[error("duplicate entity name: {0}")]
    DuplicateEntity(String),
    /// An entity name does not follow the `entity.parameter` addressing rules.
    #[error("invalid entity name `{0}`")]
    InvalidName(String),
    /// Two fixtures claim overlapping DMX channels, or a fixture runs off the
    /// end of the frame.
    #[error("DMX address conflict: {0}")]
    AddressConflict(String),
    /// A command type that is neither reserved nor `entity.parameter`.
    #[error("invalid command `{0}`")]
    InvalidCommand(String),
    /// Free-form message for conditions that have no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around JSON (de)serialisation errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl HustlerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Shorthand for [`HustlerError::InvalidValue`].
    pub fn invalid_value(parameter: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&str> for HustlerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for HustlerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
