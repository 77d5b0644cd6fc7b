//! Message definition registry, loaded once from a CSV export
//!
//! The definitions file is a fixed-column export: six rows of metadata and
//! headers, then one row per message with the arbitration ID in column 3 as
//! a 0x-prefixed hex literal. Rows that fail to parse are skipped; a
//! partial registry is better than none.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::db::Database;

/// Number of leading metadata/header rows in the definitions export
const HEADER_ROWS: usize = 6;
/// Minimum number of columns for a definition row to be considered
const MIN_COLUMNS: usize = 16;

/// One named message definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    /// Arbitration ID as a decimal integer
    pub id_dec: u32,
    /// Arbitration ID as the source's 0x-prefixed hex literal
    pub id_hex: String,
    /// Human-readable message name
    pub name: String,
    /// Data length code, defaulted to 8 when the column is blank
    pub dlc: u8,
    /// Grouping category from the export
    pub category: String,
    /// Free-text description
    pub description: String,
}

/// Errors from loading the definitions file
#[derive(Debug, Snafu)]
pub enum RegistryError {
    /// The definitions file could not be opened
    #[snafu(display("Failed to open definitions file: {source}"))]
    OpenFile {
        /// The underlying io error
        source: std::io::Error,
    },
    /// Reading a line from the definitions file failed
    #[snafu(display("Failed to read definitions file: {source}"))]
    ReadLine {
        /// The underlying io error
        source: std::io::Error,
    },
    /// Writing the parsed definitions to the store failed
    #[snafu(display("Failed to store definitions: {source}"))]
    Store {
        /// The underlying persistence error
        source: crate::db::DbError,
    },
}

/// Immutable post-init lookup from arbitration ID to definition
///
/// Shared as `Arc<DefinitionRegistry>`; readers never take a lock.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    definitions: Vec<Definition>,
    name_by_id: HashMap<u32, usize>,
}

impl DefinitionRegistry {
    /// An empty registry; every lookup misses
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load definitions from `path`, mirroring them into the store
    ///
    /// All inserts run in a single transaction. Unparseable rows are
    /// logged and skipped.
    pub fn load_csv<P: AsRef<Path>>(path: P, db: &mut Database) -> Result<Self, RegistryError> {
        let file = File::open(path.as_ref()).context(OpenFileSnafu)?;
        let reader = BufReader::new(file);

        let mut definitions = Vec::new();
        for (line_no, line) in reader.lines().enumerate().skip(HEADER_ROWS) {
            let line = line.context(ReadLineSnafu)?;
            match parse_row(&line) {
                Some(def) => definitions.push(def),
                None => {
                    if !line.trim().is_empty() {
                        log::debug!("Skipping definitions row {}", line_no + 1);
                    }
                }
            }
        }

        db.replace_definitions(&definitions).context(StoreSnafu)?;
        log::info!(
            "Loaded {} message definitions from {}",
            definitions.len(),
            path.as_ref().display()
        );
        Ok(Self::from_definitions(definitions))
    }

    /// Build the registry from already-parsed definitions
    pub fn from_definitions(definitions: Vec<Definition>) -> Self {
        let name_by_id = definitions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id_dec, i))
            .collect();
        Self {
            definitions,
            name_by_id,
        }
    }

    /// Look up the name for an arbitration ID
    pub fn name_of(&self, id: u16) -> Option<&str> {
        self.name_by_id
            .get(&(id as u32))
            .map(|&i| self.definitions[i].name.as_str())
    }

    /// The full definition list, for operator drop-downs
    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }
}

/// Parse one export row into a definition
///
/// Expects ≥16 comma-separated columns with a 0x-prefixed hex ID in column
/// 3; returns None for anything else.
fn parse_row(line: &str) -> Option<Definition> {
    let cols: Vec<&str> = line.split(',').map(str::trim).collect();
    if cols.len() < MIN_COLUMNS {
        return None;
    }

    let id_hex = cols[2];
    let raw = id_hex.strip_prefix("0x").or_else(|| id_hex.strip_prefix("0X"))?;
    let id_dec = u32::from_str_radix(raw, 16).ok()?;

    let dlc = match cols[3] {
        "" => 8,
        text => text.parse().ok()?,
    };

    Some(Definition {
        id_dec,
        id_hex: id_hex.to_owned(),
        name: cols[13].to_owned(),
        dlc,
        category: cols[0].to_owned(),
        description: cols[14].to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn csv_with_rows(rows: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for _ in 0..HEADER_ROWS {
            writeln!(file, "meta,meta,meta").unwrap();
        }
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        file
    }

    fn padded_row(category: &str, id_hex: &str, dlc: &str, name: &str, desc: &str) -> String {
        // Columns: 1=category, 3=id, 4=dlc, 14=name, 15=description
        let mut cols = vec![""; 16];
        cols[0] = category;
        cols[2] = id_hex;
        cols[3] = dlc;
        cols[13] = name;
        cols[14] = desc;
        cols.join(",")
    }

    #[test]
    fn test_load_skips_headers_and_bad_rows() {
        let file = csv_with_rows(&[
            &padded_row("status", "0x180", "8", "MOTOR_STATUS", "Motor controller status"),
            &padded_row("status", "not-hex", "8", "BROKEN", "unparseable id"),
            "too,short,row",
            &padded_row("control", "0x200", "", "MOTOR_CMD", "Motor command"),
        ]);

        let mut db = Database::open_in_memory().unwrap();
        let registry = DefinitionRegistry::load_csv(file.path(), &mut db).unwrap();

        assert_eq!(registry.definitions().len(), 2);
        assert_eq!(registry.name_of(0x180), Some("MOTOR_STATUS"));
        assert_eq!(registry.name_of(0x200), Some("MOTOR_CMD"));
        assert_eq!(registry.name_of(0x300), None);
        // Blank DLC column falls back to 8
        assert_eq!(registry.definitions()[1].dlc, 8);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let mut db = Database::open_in_memory().unwrap();
        let res = DefinitionRegistry::load_csv("/nonexistent/defs.csv", &mut db);
        assert!(matches!(res, Err(RegistryError::OpenFile { .. })));
    }
}
