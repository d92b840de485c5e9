//! The table of known activity types.
//!
//! The registry is built once and passed explicitly to whatever needs to create
//! activities. There is no global instance.
//!
//! ```rust
//! use polyflow::registry::ActivityRegistry;
//!
//! let registry = ActivityRegistry::builder()
//!     .with_builtin_activities()
//!     .build()
//!     .expect("built-in activities are valid");
//! assert!(registry.get("relLimit").is_some());
//! ```

use crate::activity::{Activity, ActivityDef};
use crate::error::RegistryError;
use ahash::AHashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Creates a fresh activity instance.
pub type ActivityFactory = Arc<dyn Fn() -> Box<dyn Activity> + Send + Sync>;

/// A registered activity type: its definition and how to construct it.
#[derive(Clone)]
pub struct ActivityInfo {
    def: Arc<ActivityDef>,
    factory: ActivityFactory,
}

impl ActivityInfo {
    pub fn def(&self) -> &Arc<ActivityDef> {
        &self.def
    }

    pub fn create(&self) -> Box<dyn Activity> {
        (self.factory)()
    }
}

impl fmt::Debug for ActivityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityInfo")
            .field("type", &self.def.activity_type())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActivityRegistry {
    entries: AHashMap<String, ActivityInfo>,
}

pub struct ActivityRegistryBuilder {
    entries: AHashMap<String, ActivityInfo>,
    errors: Vec<RegistryError>,
}

impl ActivityRegistryBuilder {
    pub fn new() -> Self {
        Self {
            entries: AHashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Adds all activities shipped with this crate.
    pub fn with_builtin_activities(self) -> Self {
        crate::activities::register_builtin_activities(self)
    }

    /// Adds an activity type. A definition that failed to build is reported by `build`.
    pub fn register<F>(mut self, def: Result<ActivityDef, RegistryError>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Activity> + Send + Sync + 'static,
    {
        match def {
            Ok(def) => {
                let activity_type = def.activity_type().to_string();
                if self.entries.contains_key(&activity_type) {
                    self.errors.push(RegistryError::DuplicateType(activity_type));
                } else {
                    self.entries.insert(
                        activity_type,
                        ActivityInfo {
                            def: Arc::new(def),
                            factory: Arc::new(factory),
                        },
                    );
                }
            }
            Err(e) => self.errors.push(e),
        }
        self
    }

    /// Finishes the registry. Fails with the first registration error.
    pub fn build(self) -> Result<ActivityRegistry, RegistryError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }
        Ok(ActivityRegistry {
            entries: self.entries,
        })
    }
}

impl Default for ActivityRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityRegistry {
    pub fn builder() -> ActivityRegistryBuilder {
        ActivityRegistryBuilder::new()
    }

    /// A registry holding exactly the built-in activities.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        Self::builder().with_builtin_activities().build()
    }

    pub fn get(&self, activity_type: &str) -> Option<&ActivityInfo> {
        self.entries.get(activity_type)
    }

    pub fn def(&self, activity_type: &str) -> Result<Arc<ActivityDef>, RegistryError> {
        self.get(activity_type)
            .map(|info| Arc::clone(&info.def))
            .ok_or_else(|| RegistryError::UnknownType(activity_type.to_string()))
    }

    /// Creates a new instance of `activity_type` together with its definition.
    pub fn create(
        &self,
        activity_type: &str,
    ) -> Result<(Arc<ActivityDef>, Box<dyn Activity>), RegistryError> {
        let info = self
            .get(activity_type)
            .ok_or_else(|| RegistryError::UnknownType(activity_type.to_string()))?;
        Ok((Arc::clone(&info.def), info.create()))
    }

    /// Registered types in lexicographic order.
    pub fn activity_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The catalog of all definitions as JSON, keyed by activity type.
    pub fn serialize(&self) -> Result<Value, serde_json::Error> {
        let catalog: BTreeMap<&str, &ActivityDef> = self
            .entries
            .iter()
            .map(|(k, info)| (k.as_str(), info.def.as_ref()))
            .collect();
        serde_json::to_value(catalog)
    }
}
