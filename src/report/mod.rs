//! Output rendering for result documents.

pub mod generator;

pub use generator::{generate_json_document, generate_json_report, generate_markdown_report};
