//! Destination types: form schema and the target URL codec.

pub mod catalog;
pub mod codec;
pub mod field;
pub mod schema;
pub mod url;

pub use catalog::{catalog, DestinationType};
pub use codec::{from_target_url, to_target_url, Layout, Mapper};
pub use field::{DestinationFields, FieldSpec, FieldType, FieldValue};
pub use schema::{describe, validate, BackendModule, DestinationSchema, FieldIssue};
pub use test::{approve, Approved, TestOutcome};
