//! Activities shipped with the crate.
//!
//! Every built-in activity provides a `TYPE` constant, a `definition` and a `Default`
//! instance. The list below registers them all at once.

mod extract;
mod filter;
mod limit;
mod project;
mod set_variable;
mod to_doc;
mod union;
mod values;

pub use extract::RelTableExtract;
pub use filter::RelFilter;
pub use limit::RelLimit;
pub use project::RelProject;
pub use set_variable::SetVariable;
pub use to_doc::RelToDoc;
pub use union::RelUnion;
pub use values::RelValues;

use crate::activity::Activity;
use crate::error::{ActivityError, ActivityResult};
use crate::registry::ActivityRegistryBuilder;
use crate::types::{Field, TupleType, TypePreview};

macro_rules! define_builtin_activities {
    ( $( $activity:ident ),* $(,)? ) => {
        /// Type names of all built-in activities.
        pub const BUILTIN_ACTIVITY_TYPES: &[&str] = &[ $( $activity::TYPE ),* ];

        pub(crate) fn register_builtin_activities(
            builder: ActivityRegistryBuilder,
        ) -> ActivityRegistryBuilder {
            builder
                $( .register($activity::definition(), || {
                    Box::new($activity::default()) as Box<dyn Activity>
                }) )*
        }
    };
}

define_builtin_activities! {
    RelValues,
    RelTableExtract,
    RelFilter,
    RelProject,
    RelLimit,
    RelUnion,
    RelToDoc,
    SetVariable,
}

/// Fields of a relational input preview, `None` while they are not known.
fn input_fields(in_types: &[TypePreview], port: usize) -> Option<&[Field]> {
    in_types.get(port).and_then(TypePreview::fields)
}

/// The relational fields of a locked input type.
fn locked_fields(in_types: &[Option<TupleType>], port: usize) -> ActivityResult<&[Field]> {
    match in_types.get(port).and_then(Option::as_ref) {
        Some(TupleType::Relational { fields }) => Ok(fields),
        Some(other) => Err(ActivityError::invalid_input(
            port,
            format!("expected relational input but found {}", other),
        )),
        None => Err(ActivityError::invalid_input(port, "input is not available")),
    }
}
