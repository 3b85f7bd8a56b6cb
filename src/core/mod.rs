//! Core resolution machinery shared by the HTTP frontend and the CLI.

pub mod events;
pub mod query;
pub mod resolver;

pub use events::{Event, EventSink, LogSink};
pub use resolver::resolve_query;
