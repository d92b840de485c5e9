//! Prelude module for convenient imports
//!
//! Re-exports the types needed to define activities, build workflows and run them.
//!
//! # Example
//!
//! ```rust
//! use polyflow::prelude::*;
//!
//! # fn build() -> Result<()> {
//! let registry = ActivityRegistry::with_builtins()?;
//! let mut workflow = Workflow::default();
//! let values = workflow.add_activity(&registry, "relValues")?;
//! let preview = workflow.get(values)?.out_type_preview();
//! assert!(preview[0].is_present());
//! # Ok(())
//! # }
//! ```

// Activities and their capabilities
pub use crate::activity::{
    Activity, ActivityCategory, ActivityDef, ActivityId, ActivityState, ActivityWrapper,
    ContextConsumer, Fusable, Pipeable, Readers, VariableWriter,
};
pub use crate::registry::{ActivityInfo, ActivityRegistry};

// Workflow graph
pub use crate::dag::{ControlStateMerger, DataStateMerger, Edge, EdgeState, Workflow};
pub use crate::model::{ActivityConfigModel, ActivityModel, EdgeModel, WorkflowModel};

// Types, settings and variables
pub use crate::settings::{SettingDef, Settings, SettingsPreview};
pub use crate::types::{DataModel, Field, FieldType, PortType, TupleType, TypePreview};
pub use crate::value::{Tuple, Value};
pub use crate::variables::VariableStore;

// Execution
pub use crate::config::EngineConfig;
pub use crate::engine::{
    ExecutionContext, ExecutionStrategy, ExecutionSummary, FuseContext, InputPipe, OutputPipe,
    PipeContext, WorkflowRunner,
};
pub use crate::plan::{PlanNode, QueryEngine};
pub use crate::storage::{InMemoryStorage, StorageManager};

// Error types
pub use crate::error::{ActivityError, ActivityResult, ExecutionError, RegistryError, WorkflowError};

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;
