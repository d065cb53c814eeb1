//! Schema model: loading, `$ref` resolution, patching, conversion and validation.
//!
//! Schemas live in a [`SchemaRegistry`] arena and refer to each other by
//! [`SchemaId`]. A registry is built with a [`RegistryBuilder`] (load documents,
//! link references) and then shared read-only, usually through a [`SchemaStore`].

mod convert;
mod error;
mod format;
mod parser;
mod patch;
mod registry;
mod store;
mod types;
mod validate;

pub use convert::to_json_schema;
pub use error::{RefError, ValidationError};
pub use format::{check_number as check_number_format, check_string as check_string_format};
pub use parser::{ParseOptions, Parser};
pub use patch::patch;
pub use registry::{DynamicScope, RegistryBuilder, SchemaRegistry, MEMORY_BASE};
pub use store::{Listener, SchemaStore, Subscription};
pub use types::{
    kind_of, AdditionalProperties, Bound, Location, Pattern, Reference, ResourceId, Schema, SchemaId, TypeTag,
    Types, XmlBinding,
};
pub use validate::{deep_equal, validate};

pub(crate) use error::{compact, escape_pointer};
