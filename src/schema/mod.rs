//! Driver config schemas and the aggregate `machine` schema.

pub mod machine;
pub mod publisher;
pub mod translate;

pub use machine::{machine_schema, RoleProfile, MACHINE_SCHEMA_NAME};
pub use publisher::SchemaPublisher;
pub use translate::{flag_field_name, translate_flags, FieldOverrides};
