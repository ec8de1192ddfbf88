//! Row-oriented serializations of the aggregate table.

use crate::models::{AggregateTable, TableRow};
use anyhow::Context;
use providers::ProviderKind;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::io::Write;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => anyhow::bail!("unknown output format: {other} (expected json or csv)"),
        }
    }
}

struct RowView<'a> {
    columns: &'a [ProviderKind],
    row: &'a TableRow,
}

impl Serialize for RowView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len() + 1))?;
        map.serialize_entry("image", &self.row.image)?;
        for (kind, cell) in self.columns.iter().zip(&self.row.cells) {
            map.serialize_entry(kind.as_str(), cell)?;
        }
        map.end()
    }
}

/// Serializes as an array of `{ "image": ..., "<provider>": [tags] | null }` objects,
/// provider keys in column order.
impl Serialize for AggregateTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(&RowView {
                columns: &self.columns,
                row,
            })?;
        }
        seq.end()
    }
}

pub fn write_json<W: Write>(table: &AggregateTable, mut writer: W) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut writer, table).context("serialize table as json")?;
    writeln!(writer)?;
    writer.flush().context("flush json output")?;
    Ok(())
}

/// One line per image; each provider cell holds the JSON list of tags, or
/// nothing when the provider has no data.
pub fn write_csv<W: Write>(table: &AggregateTable, writer: W) -> anyhow::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    let mut header = vec!["image".to_string()];
    header.extend(table.columns.iter().map(|k| k.to_string()));
    out.write_record(&header)?;

    for row in &table.rows {
        let mut record = Vec::with_capacity(row.cells.len() + 1);
        record.push(row.image.clone());
        for cell in &row.cells {
            record.push(match cell {
                Some(tags) => serde_json::to_string(tags)?,
                None => String::new(),
            });
        }
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_table<W: Write>(
    table: &AggregateTable,
    format: OutputFormat,
    writer: W,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => write_json(table, writer),
        OutputFormat::Csv => write_csv(table, writer),
    }
}
