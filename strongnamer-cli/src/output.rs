use comfy_table::{presets, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

use crate::app::GlobalOptions;

/// Result of a command: JSON with `--json`, text otherwise.
pub trait Report: Serialize {
    /// Print the human-readable form to stdout.
    fn print_text(&self);
}

/// Print `report` in the format selected by the global options.
pub fn emit<R: Report>(report: &R, opts: &GlobalOptions) -> anyhow::Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        report.print_text();
    }
    Ok(())
}

/// Print one `Label:  value` line, values aligned across calls.
pub fn field(label: &str, value: impl std::fmt::Display) {
    println!("{:<15}{value}", format!("{label}:"));
}

/// Borderless columns separated by two spaces, left aligned unless told otherwise.
pub struct Columns {
    table: Table,
    prefix: &'static str,
}

impl Columns {
    pub fn new(headers: &[&str]) -> Self {
        let mut table = Table::new();
        table
            .load_preset(presets::NOTHING)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(headers.to_vec());

        let last = headers.len().saturating_sub(1);
        for index in 0..headers.len() {
            if let Some(column) = table.column_mut(index) {
                column.set_padding((u16::from(index != 0), u16::from(index != last)));
            }
        }

        Columns { table, prefix: "" }
    }

    /// Right-align the column at `index`.
    pub fn right_aligned(mut self, index: usize) -> Self {
        if let Some(column) = self.table.column_mut(index) {
            column.set_cell_alignment(CellAlignment::Right);
        }
        self
    }

    /// Indent every line with `prefix`.
    pub fn prefixed(mut self, prefix: &'static str) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn push(&mut self, cells: Vec<String>) {
        self.table.add_row(cells);
    }

    pub fn print(&self) {
        for line in self.table.to_string().lines() {
            println!("{}{}", self.prefix, line.trim_end());
        }
    }
}

/// Uppercase hex without separators, the notation of public keys in assembly names.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02X}")).collect()
}
