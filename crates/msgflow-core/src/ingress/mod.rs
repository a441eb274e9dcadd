//! Ingress side of the pipeline.

mod emitter;
mod writer;

pub use emitter::{AnalyticsEmitter, DrainReport};
pub use writer::IngressWriter;
