use crate::activity::{
    Activity, ActivityCategory, ActivityDef, ActivityId, ContextConsumer, Readers,
};
use crate::engine::ExecutionContext;
use crate::error::{ActivityError, ActivityResult, RegistryError};
use crate::settings::{SettingDef, Settings, SettingsPreview};
use crate::storage::StorageManager;
use crate::types::{DataModel, PortType, TypePreview};
use std::fmt;
use std::sync::Arc;

/// Copies a named table of the underlying store into a checkpoint.
#[derive(Default)]
pub struct RelTableExtract {
    storage: Option<Arc<dyn StorageManager>>,
}

impl fmt::Debug for RelTableExtract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelTableExtract")
            .field("attached", &self.storage.is_some())
            .finish()
    }
}

impl RelTableExtract {
    pub const TYPE: &'static str = "relTableExtract";

    pub fn definition() -> Result<ActivityDef, RegistryError> {
        ActivityDef::builder(Self::TYPE, "Extract Table")
            .description("Extracts all rows of a table.")
            .category(ActivityCategory::Extract)
            .category(ActivityCategory::Relational)
            .out_port(PortType::Rel, "Rows of the table")
            .setting(
                SettingDef::string("table", "Table", "")
                    .non_blank()
                    .describe("Name of the table to extract."),
            )
            .build()
    }
}

impl Activity for RelTableExtract {
    fn preview_out_types(
        &self,
        _in_types: &[TypePreview],
        settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>> {
        let unknown = TypePreview::unknown_of(DataModel::Relational);
        let (Some(table), Some(storage)) = (settings.get_string("table"), &self.storage) else {
            return Ok(vec![unknown]);
        };
        match storage.entity_type(table) {
            Some(tuple_type) => Ok(vec![TypePreview::of_type(&tuple_type)]),
            None => Err(ActivityError::invalid_setting(
                "table",
                format!("table '{}' does not exist", table),
            )),
        }
    }

    fn execute(
        &mut self,
        _inputs: Readers,
        settings: &Settings,
        ctx: &mut ExecutionContext,
    ) -> ActivityResult<()> {
        let table = settings.get_string("table")?;
        let reader = ctx.storage().read_entity(table)?;
        let total = reader.tuple_count();
        let mut writer = ctx.create_writer(0, reader.tuple_type().clone())?;
        let interval = ctx.progress_interval().max(1);
        for (i, tuple) in reader.enumerate() {
            if i as u64 % interval == 0 {
                ctx.check_interrupted()?;
                if total > 0 {
                    ctx.update_progress(i as f64 / total as f64);
                }
            }
            writer.write(tuple)?;
        }
        ctx.log_info(format!("Extracted {} rows from '{}'", writer.written(), table));
        writer.close()?;
        Ok(())
    }

    fn dynamic_name(
        &self,
        _in_types: &[TypePreview],
        settings: &SettingsPreview,
    ) -> ActivityResult<Option<String>> {
        Ok(settings.get_string("table").map(|t| format!("Extract {}", t)))
    }

    fn as_context_consumer(&mut self) -> Option<&mut dyn ContextConsumer> {
        Some(self)
    }
}

impl ContextConsumer for RelTableExtract {
    fn accept(&mut self, _activity_id: ActivityId, storage: Arc<dyn StorageManager>) {
        self.storage = Some(storage);
    }
}
