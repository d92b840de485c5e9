use crate::activity::{
    Activity, ActivityCategory, ActivityDef, Fusable, Pipeable, Readers, execute_fused,
};
use crate::engine::{ExecutionContext, FuseContext, InputPipe, OutputPipe, PipeContext};
use crate::error::{ActivityResult, RegistryError};
use crate::plan::PlanNode;
use crate::settings::{SettingDef, Settings, SettingsPreview};
use crate::types::{Field, FieldType, PortType, TupleType, TypePreview};
use crate::value::{Tuple, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const NAMES: [&str; 8] = [
    "Alice", "Bob", "Carla", "Daniel", "Emma", "Finn", "Greta", "Hugo",
];
const LAST_NAMES: [&str; 6] = ["Meier", "Schmid", "Keller", "Weber", "Huber", "Frei"];

/// Generates a small table of sample persons.
#[derive(Debug, Default)]
pub struct RelValues;

impl RelValues {
    pub const TYPE: &'static str = "relValues";

    pub fn definition() -> Result<ActivityDef, RegistryError> {
        ActivityDef::builder(Self::TYPE, "Relational Values")
            .description("Generates a table of sample persons.")
            .category(ActivityCategory::Extract)
            .category(ActivityCategory::Relational)
            .category(ActivityCategory::Development)
            .out_port(PortType::Rel, "Generated table")
            .setting(
                SettingDef::int("rowCount", "Row Count", 3)
                    .with_int_range(Some(0), Some(1_000_000))
                    .describe("Number of rows to generate."),
            )
            .setting(
                SettingDef::boolean("random", "Random Values", false)
                    .describe("Pick names and ages at random instead of a fixed sequence."),
            )
            .setting(SettingDef::int("seed", "Seed", 42))
            .build()
    }

    pub fn tuple_type() -> TupleType {
        TupleType::relational(vec![
            Field::new("id", FieldType::BigInt),
            Field::new("name", FieldType::Text),
            Field::new("lastName", FieldType::Text),
            Field::new("age", FieldType::BigInt),
            Field::nullable("salary", FieldType::Double),
        ])
    }

    /// The rows produced for the given settings. Equal settings yield equal rows.
    pub fn rows(settings: &Settings) -> ActivityResult<Vec<Tuple>> {
        let count = settings.get_int("rowCount")?;
        let rows = if settings.get_bool("random")? {
            let mut rng = StdRng::seed_from_u64(settings.get_int("seed")? as u64);
            (0..count)
                .map(|id| {
                    let salary = match rng.random_range(0..10) {
                        0 => Value::Null,
                        _ => Value::Double(rng.random_range(3000..12000) as f64),
                    };
                    vec![
                        Value::Int(id),
                        Value::from(NAMES[rng.random_range(0..NAMES.len())]),
                        Value::from(LAST_NAMES[rng.random_range(0..LAST_NAMES.len())]),
                        Value::Int(rng.random_range(18..80)),
                        salary,
                    ]
                })
                .collect()
        } else {
            (0..count)
                .map(|id| {
                    let i = id as usize;
                    vec![
                        Value::Int(id),
                        Value::from(NAMES[i % NAMES.len()]),
                        Value::from(LAST_NAMES[i % LAST_NAMES.len()]),
                        Value::Int(20 + id % 45),
                        Value::Double(4000.0 + (id % 7) as f64 * 500.0),
                    ]
                })
                .collect()
        };
        Ok(rows)
    }
}

impl Activity for RelValues {
    fn preview_out_types(
        &self,
        _in_types: &[TypePreview],
        _settings: &SettingsPreview,
    ) -> ActivityResult<Vec<TypePreview>> {
        Ok(vec![TypePreview::of_type(&Self::tuple_type())])
    }

    fn execute(
        &mut self,
        inputs: Readers,
        settings: &Settings,
        ctx: &mut ExecutionContext,
    ) -> ActivityResult<()> {
        execute_fused(self, inputs, settings, ctx)
    }

    fn dynamic_name(
        &self,
        _in_types: &[TypePreview],
        settings: &SettingsPreview,
    ) -> ActivityResult<Option<String>> {
        Ok(settings
            .get_int("rowCount")
            .map(|count| format!("{} Sample Rows", count)))
    }

    fn as_fusable(&mut self) -> Option<&mut dyn Fusable> {
        Some(self)
    }

    fn as_pipeable(&mut self) -> Option<&mut dyn Pipeable> {
        Some(self)
    }
}

impl Fusable for RelValues {
    fn fuse(
        &mut self,
        _inputs: Vec<Option<PlanNode>>,
        settings: &Settings,
        _ctx: &mut FuseContext,
    ) -> ActivityResult<PlanNode> {
        Ok(PlanNode::Values {
            tuple_type: Self::tuple_type(),
            rows: Self::rows(settings)?,
        })
    }
}

impl Pipeable for RelValues {
    fn lock_output_type(
        &mut self,
        _in_types: &[Option<TupleType>],
        _settings: &Settings,
    ) -> ActivityResult<TupleType> {
        Ok(Self::tuple_type())
    }

    fn pipe(
        &mut self,
        _inputs: Vec<Option<InputPipe>>,
        output: &mut OutputPipe,
        settings: &Settings,
        ctx: &mut PipeContext,
    ) -> ActivityResult<()> {
        for row in Self::rows(settings)? {
            if !output.put(row) {
                break;
            }
            ctx.tuple_processed();
        }
        Ok(())
    }

    fn estimate_tuple_count(
        &self,
        _in_types: &[Option<TupleType>],
        settings: &Settings,
        _in_counts: &[Option<i64>],
    ) -> i64 {
        settings.get_int("rowCount").unwrap_or(-1)
    }
}
