//! Purpose: Drive the scanner and tokenizer over a dump reader.
//! Exports: `ExtractConfig`, `ExtractStats`, `TableRows`, `extract_tables`, `for_each_row`.
//! Role: Library entry point for collaborators (record mapping, attachment export).
//! Invariants: Rows keep statement-then-tuple order per table.
//! Invariants: Only I/O failures and callback errors abort; dump content never does.
use std::collections::BTreeMap;
use std::io::BufRead;

use tracing::{debug, info, warn};

use crate::core::encoding::{DumpEncoding, DumpLines};
use crate::core::error::Error;
use crate::core::scalar::Row;
use crate::core::scanner::StatementScanner;
use crate::core::tokenizer::parse_values;

#[derive(Clone, Debug, Default)]
pub struct ExtractConfig {
    /// Watched tables, matched in this order.
    pub tables: Vec<String>,
    pub encoding: DumpEncoding,
}

impl ExtractConfig {
    pub fn new<I, S>(tables: I, encoding: DumpEncoding) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
            encoding,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ExtractStats {
    pub lines: u64,
    pub statements: u64,
    pub rows: u64,
    /// Statements dropped because input ended before their `;`.
    pub unterminated: u64,
}

#[derive(Clone, Debug, Default)]
pub struct TableRows {
    rows: BTreeMap<String, Vec<Row>>,
    pub stats: ExtractStats,
}

impl TableRows {
    /// Rows for `table`; empty when the table was not watched or had no statements.
    pub fn rows(&self, table: &str) -> &[Row] {
        self.rows.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[Row])> {
        self.rows
            .iter()
            .map(|(table, rows)| (table.as_str(), rows.as_slice()))
    }

    pub fn take(&mut self, table: &str) -> Vec<Row> {
        self.rows
            .get_mut(table)
            .map(std::mem::take)
            .unwrap_or_default()
    }
}

/// Collects every row of the watched tables.
pub fn extract_tables<R: BufRead>(reader: R, config: &ExtractConfig) -> Result<TableRows, Error> {
    let mut rows: BTreeMap<String, Vec<Row>> = config
        .tables
        .iter()
        .map(|table| (table.clone(), Vec::new()))
        .collect();
    let stats = for_each_row(reader, config, |table, row| {
        if let Some(list) = rows.get_mut(table) {
            list.push(row);
        }
        Ok(())
    })?;
    Ok(TableRows { rows, stats })
}

/// Streams `(table, row)` pairs in dump order without retaining them.
pub fn for_each_row<R, F>(
    reader: R,
    config: &ExtractConfig,
    mut on_row: F,
) -> Result<ExtractStats, Error>
where
    R: BufRead,
    F: FnMut(&str, Row) -> Result<(), Error>,
{
    let mut stats = ExtractStats::default();
    let mut scanner = StatementScanner::new(config.tables.iter().cloned());
    let mut lines = DumpLines::new(reader, config.encoding);

    for line in lines.by_ref() {
        let line = line?;
        let Some(statement) = scanner.push_line(&line) else {
            continue;
        };
        let parsed = parse_values(&statement.body);
        stats.statements += 1;
        stats.rows += parsed.len() as u64;
        debug!(
            table = %statement.table,
            rows = parsed.len(),
            "decoded insert statement"
        );
        for row in parsed {
            on_row(&statement.table, row)?;
        }
    }
    stats.lines = lines.line_no();

    if let Some(dropped) = scanner.finish() {
        stats.unterminated += 1;
        warn!(
            table = %dropped.table,
            collected_bytes = dropped.collected_bytes,
            "dump ended inside an INSERT statement; its rows were dropped"
        );
    }

    info!(
        lines = stats.lines,
        statements = stats.statements,
        rows = stats.rows,
        "dump scan complete"
    );
    Ok(stats)
}
