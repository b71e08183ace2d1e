use thiserror::Error;

/// Failures scoped to one conversation evaluation or one collaborator call.
///
/// None of these is fatal to the process. Only `MalformedConversationTimestamp` and
/// `Persistence` are returned from an evaluation; the rest are absorbed and logged.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EscalationError {
    #[error("classification capability unavailable: {0}")]
    ClassificationUnavailable(String),
    #[error("notification dispatch to `{target}` failed: {message}")]
    DispatchFailure { target: String, message: String },
    #[error("no contact mapping for agent `{0}`")]
    UnknownAgentMapping(String),
    #[error("malformed quote timestamp `{raw}` for conversation `{conversation_id}`")]
    MalformedConversationTimestamp { conversation_id: String, raw: String },
    #[error("agent response observation failed: {0}")]
    ObservationUnavailable(String),
    #[error("alert persistence failed: {0}")]
    Persistence(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Escalation(#[from] EscalationError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Escalation(
                error @ EscalationError::MalformedConversationTimestamp { .. },
            )
            | ApplicationError::Escalation(error @ EscalationError::UnknownAgentMapping(_)) => {
                Self::BadRequest {
                    message: error.to_string(),
                    correlation_id: "unassigned".to_owned(),
                }
            }
            ApplicationError::Escalation(error) => Self::ServiceUnavailable {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, EscalationError, InterfaceError};

    #[test]
    fn malformed_timestamp_maps_to_bad_request_interface_error() {
        let interface =
            ApplicationError::from(EscalationError::MalformedConversationTimestamp {
                conversation_id: "maria souza".to_owned(),
                raw: "yesterday-ish".to_owned(),
            })
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn alert_persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::from(EscalationError::Persistence(
            "database lock timeout".to_owned(),
        ))
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("invalid window".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
