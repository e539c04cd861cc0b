//! Rendering of result documents for the controller and for humans.
//!
//! JSON output is the wire form: one compact document per line, or a
//! pretty array. The Markdown report is for reading; it is not meant to be
//! parsed back.

use crate::models::{ReportMetadata, ResultDocument, Section, TableSection, TextSection, Value};
use anyhow::Result;

/// Serialize one document as a single JSON line (no trailing newline).
pub fn generate_json_document(document: &ResultDocument) -> Result<String> {
    serde_json::to_string(document).map_err(Into::into)
}

/// Serialize a whole batch as a pretty JSON array.
pub fn generate_json_report(documents: &[ResultDocument]) -> Result<String> {
    serde_json::to_string_pretty(documents).map_err(Into::into)
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(metadata: &ReportMetadata, documents: &[ResultDocument]) -> String {
    let mut output = String::new();

    output.push_str("# memrelay Report\n\n");
    output.push_str(&generate_metadata_section(metadata));
    output.push_str(&generate_table_of_contents(documents));

    for document in documents {
        output.push_str(&generate_document_section(document));
    }

    output.push_str(&generate_footer());
    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Target:** `{}`\n", metadata.target));
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.analysis_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Plugins Requested:** {}\n",
        metadata.plugins_requested
    ));
    if metadata.plugins_failed > 0 {
        section.push_str(&format!("- **Plugins Failed:** {}\n", metadata.plugins_failed));
    }
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn plugin_label(document: &ResultDocument) -> &str {
    document.plugin_name.as_deref().unwrap_or("(unnamed)")
}

fn anchor(name: &str) -> String {
    format!("plugin-{}", name.replace(['/', '.', ' ', '(', ')'], "-").to_lowercase())
}

/// Generate the table of contents.
fn generate_table_of_contents(documents: &[ResultDocument]) -> String {
    if documents.is_empty() {
        return String::new();
    }

    let mut toc = String::new();
    toc.push_str("## Plugins\n\n");
    for document in documents {
        let name = plugin_label(document);
        let status = if document.is_ok() { "" } else { " (failed)" };
        toc.push_str(&format!("- [{}](#{}){}\n", name, anchor(name), status));
    }
    toc.push('\n');

    toc
}

/// Generate the section for one plugin's document.
fn generate_document_section(document: &ResultDocument) -> String {
    let mut section = String::new();

    let name = plugin_label(document);
    section.push_str(&format!("## Plugin: {} {{#{}}}\n\n", name, anchor(name)));

    if let Some(ref error) = document.error {
        section.push_str(&format!("> **Error:** {}\n\n", escape_inline(error)));
    }

    if document.sections.is_empty() && document.error.is_none() {
        section.push_str("*No output.*\n\n");
    }

    for part in &document.sections {
        match part {
            Section::Table(table) => section.push_str(&generate_table(table)),
            Section::Text(text) => section.push_str(&generate_text(text)),
        }
    }

    section
}

/// Render a table section as a Markdown table.
fn generate_table(table: &TableSection) -> String {
    let mut block = String::new();

    let width = table
        .rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(table.headers.len()))
        .max()
        .unwrap_or(0);
    if width == 0 {
        return block;
    }

    let mut headers: Vec<String> = table
        .headers
        .iter()
        .map(|h| escape_cell(&h.display_name))
        .collect();
    headers.resize(width, String::new());

    block.push_str(&format!("| {} |\n", headers.join(" | ")));
    block.push_str(&format!("|{}\n", ":---|".repeat(width)));

    for row in &table.rows {
        let mut cells: Vec<String> = row.iter().map(|v| escape_cell(&v.display_text())).collect();
        cells.resize(width, String::new());
        block.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    block.push('\n');

    block
}

/// Render a text section, one interpolated entry per line.
fn generate_text(text: &TextSection) -> String {
    let mut block = String::from("```\n");
    for entry in &text.entries {
        block.push_str(&interpolate(&entry.template, &entry.args));
        if !block.ends_with('\n') {
            block.push('\n');
        }
    }
    block.push_str("```\n\n");
    block
}

/// Substitute `{}`, `{N}` and `{N:spec}` placeholders with the display text
/// of the matching argument. `{{` and `}}` are literal braces. Placeholders
/// without a matching argument are left as written.
pub fn interpolate(template: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut next_auto = 0;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    field.push(inner);
                }
                if !closed {
                    out.push('{');
                    out.push_str(&field);
                    continue;
                }

                let index_part = field.split_once(':').map_or(field.as_str(), |(i, _)| i).trim();
                let index = if index_part.is_empty() {
                    let index = next_auto;
                    next_auto += 1;
                    Some(index)
                } else {
                    index_part.parse::<usize>().ok()
                };

                match index.and_then(|i| args.get(i)) {
                    Some(value) => out.push_str(&value.display_text()),
                    None => {
                        out.push('{');
                        out.push_str(&field);
                        out.push('}');
                    }
                }
            }
            _ => out.push(c),
        }
    }

    out
}

fn escape_cell(text: &str) -> String {
    escape_inline(text).replace('|', "\\|")
}

fn escape_inline(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Generate the report footer.
fn generate_footer() -> String {
    format!(
        "---\n\n*Report generated by memrelay v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}
