//! CSV writer for flat records.
//!
//! The header is the union of record fields in first-seen order. Strings are
//! written raw, arrays and objects as compact JSON, null as an empty cell.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde_json::Value;

use crate::domain::Record;

const SEP: char = ',';

fn needs_quotes(field: &str) -> bool {
    field.contains(SEP) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Writes one row with RFC 4180 quoting, terminated by CRLF.
pub fn write_row<W: Write>(w: &mut W, row: &[String]) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            write!(w, "{SEP}")?;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{cell}")?;
        }
    }
    write!(w, "\r\n")
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[must_use]
pub fn header_for(records: &[Record]) -> Vec<String> {
    let mut header: Vec<String> = Vec::new();
    for record in records {
        for (field, _) in record.fields() {
            if !header.iter().any(|h| h == field) {
                header.push(field.clone());
            }
        }
    }
    header
}

pub fn write_records<W: Write>(w: &mut W, records: &[Record]) -> io::Result<()> {
    let header = header_for(records);
    write_row(w, &header)?;
    for record in records {
        let row: Vec<String> = header.iter().map(|f| cell(record.get(f))).collect();
        write_row(w, &row)?;
    }
    Ok(())
}

/// Creates (or truncates) `path` and writes all records to it.
pub fn write_csv_file(path: &Path, records: &[Record]) -> io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut w = BufWriter::new(File::create(path)?);
    write_records(&mut w, records)?;
    w.flush()
}
