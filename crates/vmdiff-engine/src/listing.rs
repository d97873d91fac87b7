//! File listing rows, the text table writer, and numbered JSON rows

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::io::{self, Write};
use vmdiff_core::FileRow;

const RULE_WIDTH: usize = 60;

/// Write rows as a right-aligned text table
///
/// ```text
///       Size Permission        Last Modified                 Name
/// ============================================================
///          2  rw-r--r--  2023-11-14 22:13:20 /hello.txt
/// ```
pub fn write_listing<W: Write>(rows: &[FileRow], out: &mut W) -> io::Result<()> {
    writeln!(
        out,
        "{:>10} {:>10} {:>20} {:>20}",
        "Size", "Permission", "Last Modified", "Name"
    )?;
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;

    for row in rows {
        writeln!(
            out,
            "{:>10} {:>10} {:>20} {}",
            row.size.to_string(),
            row.permissions,
            row.modified_time,
            row.path
        )?;
    }
    Ok(())
}

/// Rows keyed `"1"`, `"2"`, ... in listing order
pub struct NumberedRows<'a>(pub &'a [FileRow]);

struct LabeledRow<'a>(&'a FileRow);

impl Serialize for LabeledRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut row = serializer.serialize_struct("FileRow", 4)?;
        row.serialize_field("Size", &self.0.size)?;
        row.serialize_field("Permission", &self.0.permissions)?;
        row.serialize_field("Last Modified", &self.0.modified_time)?;
        row.serialize_field("Name", &self.0.path)?;
        row.end()
    }
}

impl Serialize for NumberedRows<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (i, row) in self.0.iter().enumerate() {
            map.serialize_entry(&(i + 1).to_string(), &LabeledRow(row))?;
        }
        map.end()
    }
}
