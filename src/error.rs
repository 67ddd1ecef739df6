use thiserror::Error;

/// Pinning an external toolkit failed. Nothing downstream of the pin can be
/// built.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PinError {
    #[error("Unresolvable repository url '{0}'")]
    Url(String),

    #[error("Unresolvable revision '{0}': {1}")]
    Revision(String, &'static str),

    #[error("Executable path is empty")]
    EmptyPath,
}

/// A configuration could not be built. Raised while the graph is being
/// composed, never after a job was submitted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing configuration key '{0}'")]
    MissingKey(String),

    #[error("Configuration key '{path}' is not {expected}")]
    WrongType {
        path: String,
        expected: &'static str,
    },

    #[error("Option '{0}' conflicts with {1}")]
    Conflict(&'static str, String),

    #[error("Option '{option}' requires datastream '{stream}'")]
    MissingStream {
        option: &'static str,
        stream: String,
    },

    #[error("Invalid value for '{option}': {reason}")]
    Invalid {
        option: &'static str,
        reason: String,
    },

    #[error("Expected a JSON object at the top level")]
    NotAnObject,

    #[error("Unknown corpus '{0}'")]
    UnknownCorpus(String),
}

impl ConfigError {
    pub(crate) fn invalid(option: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            option,
            reason: reason.into(),
        }
    }

    pub(crate) fn missing_stream(option: &'static str, stream: impl Into<String>) -> Self {
        Self::MissingStream {
            option,
            stream: stream.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Job '{kind}' has no output named '{name}'")]
    UnknownOutput { kind: &'static str, name: String },

    #[error("Output '{0}' is already registered for a different artifact")]
    DuplicateOutput(String),

    #[error("Artifact '{0}' was not created by this blueprint")]
    ForeignArtifact(String),

    #[error("Cycle detected in job graph at '{0}'")]
    Cycle(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Couldn't read settings file.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't parse settings.\n{0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Couldn't write plan.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't serialize plan.\n{0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum KumitateError {
    #[error(transparent)]
    Pin(#[from] PinError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Error while loading settings:\n{0}")]
    Settings(#[from] SettingsError),

    #[error("Error while writing the plan:\n{0}")]
    Plan(#[from] PlanError),
}
