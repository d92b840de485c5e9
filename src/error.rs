use thiserror::Error;
use uuid::Uuid;

/// Errors raised by activities while previewing or executing.
///
/// Setting and input errors carry the offending setting key or input port so
/// callers can attach them to the right place in the workflow.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActivityError {
    #[error("Invalid setting '{key}': {message}")]
    InvalidSetting { key: String, message: String },

    #[error("Invalid input on port {port}: {message}")]
    InvalidInput { port: usize, message: String },

    #[error("{0}")]
    Generic(String),
}

/// Discriminant of an [`ActivityError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityErrorKind {
    InvalidSetting,
    InvalidInput,
    Generic,
}

impl ActivityError {
    pub fn invalid_setting(key: impl Into<String>, message: impl Into<String>) -> Self {
        ActivityError::InvalidSetting {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(port: usize, message: impl Into<String>) -> Self {
        ActivityError::InvalidInput {
            port,
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        ActivityError::Generic(message.into())
    }

    pub fn kind(&self) -> ActivityErrorKind {
        match self {
            ActivityError::InvalidSetting { .. } => ActivityErrorKind::InvalidSetting,
            ActivityError::InvalidInput { .. } => ActivityErrorKind::InvalidInput,
            ActivityError::Generic(_) => ActivityErrorKind::Generic,
        }
    }

    pub fn setting_key(&self) -> Option<&str> {
        match self {
            ActivityError::InvalidSetting { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn port(&self) -> Option<usize> {
        match self {
            ActivityError::InvalidInput { port, .. } => Some(*port),
            _ => None,
        }
    }

    /// The message without the kind-specific prefix.
    pub fn message(&self) -> &str {
        match self {
            ActivityError::InvalidSetting { message, .. }
            | ActivityError::InvalidInput { message, .. }
            | ActivityError::Generic(message) => message,
        }
    }
}

pub type ActivityResult<T> = Result<T, ActivityError>;

/// Errors produced while building or querying the activity registry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Activity type '{0}' is registered more than once")]
    DuplicateType(String),

    #[error("Activity type '{0}' is not registered")]
    UnknownType(String),

    #[error("Definition of activity type '{activity_type}' is invalid: {message}")]
    InvalidDefinition {
        activity_type: String,
        message: String,
    },
}

/// Errors raised by checkpoint storage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("No checkpoint exists for activity {activity_id} on port {port}")]
    CheckpointNotFound { activity_id: Uuid, port: usize },

    #[error("A checkpoint already exists for activity {activity_id} on port {port}")]
    CheckpointExists { activity_id: Uuid, port: usize },

    #[error("Entity '{0}' does not exist")]
    EntityNotFound(String),

    #[error("Tuple does not match the checkpoint type: {0}")]
    TypeMismatch(String),
}

/// Errors raised while resolving variable references.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VariableError {
    #[error("Variable reference '{0}' cannot be resolved")]
    NotFound(String),

    #[error("Variable reference must be a string, found {0}")]
    InvalidReference(String),
}

impl From<StorageError> for ActivityError {
    fn from(err: StorageError) -> Self {
        ActivityError::Generic(err.to_string())
    }
}

impl From<VariableError> for ActivityError {
    fn from(err: VariableError) -> Self {
        ActivityError::Generic(err.to_string())
    }
}

/// Errors raised while executing a submission.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Activity {activity_id} failed: {source}")]
    Activity {
        activity_id: Uuid,
        #[source]
        source: ActivityError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Plan evaluation failed: {0}")]
    Plan(String),

    #[error("Activity {activity_id} did not write its output on port {port}")]
    MissingOutput { activity_id: Uuid, port: usize },

    #[error("Execution was interrupted")]
    Interrupted,

    #[error("Worker thread panicked: {0}")]
    WorkerPanic(String),
}

impl ExecutionError {
    pub fn activity(activity_id: Uuid, source: ActivityError) -> Self {
        ExecutionError::Activity {
            activity_id,
            source,
        }
    }
}

/// Errors raised by operations on a workflow graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Activity {0} does not exist in the workflow")]
    ActivityNotFound(Uuid),

    #[error("Activity {0} already exists in the workflow")]
    DuplicateActivity(Uuid),

    #[error("Edge {0} does not exist in the workflow")]
    EdgeNotFound(String),

    #[error("Edge {0} already exists in the workflow")]
    DuplicateEdge(String),

    #[error("Invalid workflow structure: {0}")]
    InvalidStructure(String),

    #[error("Activity {activity_id} cannot change state from {from} to {to}")]
    IllegalTransition {
        activity_id: Uuid,
        from: String,
        to: String,
    },

    #[error("Workflow is already executing")]
    AlreadyExecuting,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Activity(#[from] ActivityError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Errors raised while loading engine configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
