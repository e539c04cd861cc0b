//! Section-based accumulator for plugin output.
//!
//! Plugins drive a [`ResultBuilder`] through table and text calls. Runs of
//! same-mode writes share one section; switching between table and text
//! output, or an explicit [`ResultBuilder::close_section`], starts a new one.

use crate::coerce::{coerce, SourceValue};
use crate::models::{ColumnHeader, FormattedText, ResultDocument, Section, TableSection, TextSection};

/// Kind of section a write goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionMode {
    Table,
    Text,
}

/// Observable builder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Empty,
    TableActive,
    TextActive,
}

/// Accumulates one [`ResultDocument`].
///
/// `finalize` consumes the builder, so writes after finalization do not
/// compile.
#[derive(Debug, Default)]
pub struct ResultBuilder {
    document: ResultDocument,
    mode: Option<SectionMode>,
    active: Option<usize>,
}

impl ResultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label the document with the plugin that produced it.
    pub fn set_plugin_label(&mut self, name: impl Into<String>) {
        self.document.plugin_name = Some(name.into());
    }

    pub fn state(&self) -> BuilderState {
        match (self.active, self.mode) {
            (Some(_), Some(SectionMode::Table)) => BuilderState::TableActive,
            (Some(_), Some(SectionMode::Text)) => BuilderState::TextActive,
            _ => BuilderState::Empty,
        }
    }

    /// Make sure a section of `mode` is active.
    pub fn begin_section(&mut self, mode: SectionMode) {
        self.activate(mode);
    }

    /// Install column headers on the active table.
    ///
    /// Calling this again before any row replaces the headers; once rows
    /// exist a new table section is opened instead.
    pub fn set_table_header<I>(&mut self, columns: I)
    where
        I: IntoIterator<Item = ColumnHeader>,
    {
        if self.active_table().rows.is_empty() {
            self.active_table().headers = columns.into_iter().collect();
            return;
        }
        self.close_section();
        self.active_table().headers = columns.into_iter().collect();
    }

    /// Append one row of coerced values to the active table.
    pub fn add_row(&mut self, values: &[&dyn SourceValue]) {
        let row = values.iter().map(|value| coerce(*value)).collect();
        self.active_table().rows.push(row);
    }

    /// Append a formatted-text entry. The template is stored as-is.
    pub fn write_text(&mut self, template: impl Into<String>, args: &[&dyn SourceValue]) {
        let entry = FormattedText {
            template: template.into(),
            args: args.iter().map(|value| coerce(*value)).collect(),
        };
        self.active_text().entries.push(entry);
    }

    /// Plain text line without arguments.
    pub fn write(&mut self, text: impl Into<String>) {
        self.write_text(text, &[]);
    }

    /// Forget the active section; the next write opens a new one.
    pub fn close_section(&mut self) {
        self.active = None;
    }

    pub fn finalize(self) -> ResultDocument {
        self.document
    }

    fn activate(&mut self, mode: SectionMode) -> usize {
        if self.mode != Some(mode) {
            self.active = None;
        }
        self.mode = Some(mode);

        if let Some(index) = self.active {
            return index;
        }

        let section = match mode {
            SectionMode::Table => Section::Table(TableSection::default()),
            SectionMode::Text => Section::Text(TextSection::default()),
        };
        self.document.sections.push(section);
        let index = self.document.sections.len() - 1;
        self.active = Some(index);
        index
    }

    fn active_table(&mut self) -> &mut TableSection {
        let index = self.activate(SectionMode::Table);
        match &mut self.document.sections[index] {
            Section::Table(table) => table,
            Section::Text(_) => unreachable!("active section is not a table"),
        }
    }

    fn active_text(&mut self) -> &mut TextSection {
        let index = self.activate(SectionMode::Text);
        match &mut self.document.sections[index] {
            Section::Text(text) => text,
            Section::Table(_) => unreachable!("active section is not text"),
        }
    }
}
