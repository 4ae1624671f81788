use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub type Result<T> = std::result::Result<T, AccessGraphError>;

/// Express whether a failure is about the caller's input, the loaded tables,
/// the configuration, or the serving machinery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorLayer {
    /// The request or command line itself is unusable, like an unknown output
    /// format.  Resolution misses are never reported this way; they become
    /// "Unknown" data in the edge list.
    BadInput,
    /// A table file exists but could not be parsed into its record type.
    DataLayer,
    /// The config file or a template is broken.
    ConfigLayer,
    /// Something went wrong rendering or serving a response.
    ServerLayer,
}

/// Payload describing what went wrong for investigation purposes.
#[derive(Debug)]
pub struct ErrorDetails {
    pub layer: ErrorLayer,
    /// Stringified version of the lower level error.
    pub message: String,
}

#[derive(Debug)]
pub enum AccessGraphError {
    /// One or more required table files were absent.  We check every table
    /// before loading any of them so that all the missing names are reported
    /// at once.
    MissingInputs(Vec<String>),
    /// An error that will persist until the inputs or config are fixed.
    StickyProblem(ErrorDetails),
}

impl AccessGraphError {
    pub fn sticky(layer: ErrorLayer, message: impl Into<String>) -> Self {
        AccessGraphError::StickyProblem(ErrorDetails {
            layer,
            message: message.into(),
        })
    }
}

impl fmt::Display for AccessGraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessGraphError::MissingInputs(files) => {
                write!(f, "Missing input tables: {}", files.join(", "))
            }
            AccessGraphError::StickyProblem(details) => {
                write!(f, "{:?}: {}", details.layer, details.message)
            }
        }
    }
}

impl std::error::Error for AccessGraphError {}

impl From<std::io::Error> for AccessGraphError {
    fn from(err: std::io::Error) -> AccessGraphError {
        AccessGraphError::sticky(ErrorLayer::ServerLayer, err.to_string())
    }
}

// JSON parse errors are sticky data problems.
impl From<serde_json::Error> for AccessGraphError {
    fn from(err: serde_json::Error) -> AccessGraphError {
        AccessGraphError::sticky(ErrorLayer::DataLayer, err.to_string())
    }
}

impl From<toml::de::Error> for AccessGraphError {
    fn from(err: toml::de::Error) -> AccessGraphError {
        AccessGraphError::sticky(ErrorLayer::ConfigLayer, err.to_string())
    }
}

impl From<liquid::Error> for AccessGraphError {
    fn from(err: liquid::Error) -> AccessGraphError {
        AccessGraphError::sticky(
            ErrorLayer::ConfigLayer,
            format!("Template problems: {}", err),
        )
    }
}

impl IntoResponse for AccessGraphError {
    fn into_response(self) -> Response {
        let status = match &self {
            AccessGraphError::MissingInputs(_) => StatusCode::BAD_REQUEST,
            AccessGraphError::StickyProblem(ErrorDetails {
                layer: ErrorLayer::BadInput,
                ..
            }) => StatusCode::BAD_REQUEST,
            AccessGraphError::StickyProblem(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[test]
fn test_missing_inputs_lists_every_file() {
    let err = AccessGraphError::MissingInputs(vec![
        "users.json".to_string(),
        "groups.json".to_string(),
    ]);
    assert_eq!(err.to_string(), "Missing input tables: users.json, groups.json");
}
