//! Headless grid front-end.
//!
//! Stands in for the grid widget: each [`Command`] maps to a toolbar button
//! or a cell edit and mutates the local store with [`Origin::Local`]; the
//! running sync picks the change up from there.

use std::fmt::Write as _;

use gridsync_engine::{
    FieldType, Fields, Identity, LocalStoreAdapter, Origin, Record, RecordDraft, RecordSchema,
};
use serde_json::Value;

/// A line of user input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the table
    List,
    /// Add a row with default values
    Add,
    /// Edit one cell
    Set {
        id: Identity,
        field: String,
        value: String,
    },
    /// Remove the given rows
    Remove(Vec<Identity>),
    /// Reload everything from the remote
    Resync,
    /// Show the command list
    Help,
    /// Exit
    Quit,
}

/// Input that could not be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid row id '{0}'")]
    InvalidId(String),
}

pub const HELP: &str = "\
commands:
  list                    show all rows
  add                     add a row with default values
  set <id> <field> <val>  edit a cell
  rm <id>...              remove rows
  resync                  reload from the server
  quit                    exit";

impl Command {
    /// Parse one input line. Blank lines parse as [`Command::List`].
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match verb {
            "" | "list" | "ls" => Ok(Command::List),
            "add" => Ok(Command::Add),
            "set" => {
                let mut parts = rest.splitn(3, char::is_whitespace);
                let (Some(id), Some(field), value) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err(ParseError::Usage("set <id> <field> <value>"));
                };
                Ok(Command::Set {
                    id: parse_id(id)?,
                    field: field.to_string(),
                    value: value.unwrap_or("").trim().to_string(),
                })
            }
            "rm" | "remove" => {
                if rest.is_empty() {
                    return Err(ParseError::Usage("rm <id>..."));
                }
                let ids = rest
                    .split_whitespace()
                    .map(parse_id)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Command::Remove(ids))
            }
            "resync" => Ok(Command::Resync),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

fn parse_id(raw: &str) -> Result<Identity, ParseError> {
    Identity::parse(raw).ok_or_else(|| ParseError::InvalidId(raw.to_string()))
}

/// Add a row with the schema's draft values. Returns the new identity.
pub fn add_row<S: LocalStoreAdapter>(store: &mut S, schema: &RecordSchema) -> Option<Identity> {
    store
        .add(vec![RecordDraft::new(schema.draft())], Origin::Local)
        .into_iter()
        .next()
        .map(|record| record.id)
}

/// Edit one cell the way a grid editor would: numeric columns receive a
/// number (or null), text columns the raw text.
pub fn edit_cell<S: LocalStoreAdapter>(
    store: &mut S,
    schema: &RecordSchema,
    id: &Identity,
    field: &str,
    raw: &str,
) -> Result<bool, String> {
    let Some(def) = schema.field(field) else {
        return Err(format!("unknown column '{field}'"));
    };

    let value = match def.field_type {
        FieldType::Number => def.normalize(Some(&Value::String(raw.to_string()))),
        FieldType::String => Value::String(raw.to_string()),
    };

    let mut fields = Fields::new();
    fields.insert(field.to_string(), value);

    match store.update(id, &fields, Origin::Local) {
        None => Err(format!("no row with id {id}")),
        Some(changes) => Ok(!changes.is_empty()),
    }
}

/// Render records as a fixed-width text table in schema column order.
pub fn render_table(schema: &RecordSchema, records: &[Record]) -> String {
    let mut columns = vec!["id".to_string()];
    columns.extend(schema.fields.iter().map(|f| f.name.clone()));

    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|record| {
            let mut row = vec![record.id.to_string()];
            row.extend(
                schema
                    .fields
                    .iter()
                    .map(|f| cell_text(record.get(&f.name))),
            );
            row
        })
        .collect();

    let widths: Vec<usize> = (0..columns.len())
        .map(|i| {
            rows.iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(columns[i].len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    write_row(&mut out, &columns, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    write_row(&mut out, &rule, &widths);
    for row in &rows {
        write_row(&mut out, row, &widths);
    }
    let _ = write!(out, "({} rows)", records.len());
    out
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn write_row(out: &mut String, cells: &[String], widths: &[usize]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect();
    let _ = writeln!(out, "{}", line.join(" | ").trim_end());
}
