//! Mimic: the core of a schema-driven API mock server.
//!
//! - [`schema`]: a cyclic-safe schema arena with `$ref`/`$dynamicRef` resolution,
//!   patching, JSON-Schema export and a coercing validator.
//! - [`parameter`]: OpenAPI 3 parameter decoding for path, query, header and cookie.
//! - [`codec`]: schema-aware JSON, XML, form, multipart and text bodies.
//! - [`generator`]: seeded generation of schema-conforming sample payloads.
//! - [`expr`] and [`workflow`]: the `${{ }}` expression language and trigger-bound
//!   workflows with a scheduler.
//!
//! The library emits `tracing` events but installs no subscriber.

pub mod codec;
pub mod config;
pub mod error;
pub mod expr;
pub mod generator;
pub mod media;
pub mod parameter;
pub mod schema;
pub mod workflow;

pub use codec::{marshal, unmarshal, CodecError, SchemaHandle};
pub use error::{Error, ErrorKind};
pub use generator::{GenerationError, GenerationRequest, Generator, GeneratorOptions};
pub use media::{negotiate, MediaType};
pub use parameter::{from_request, Parameter, ParameterError, RequestParameters};
pub use schema::{RefError, SchemaId, SchemaRegistry, ValidationError};
pub use workflow::{Runtime, Scheduler, Summary, Workflow};
