use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use crate::ValueKind;

/// A data source of a collectd type, as declared in `types.db`.
#[derive(Clone, Debug, PartialEq)]
pub struct DataSource {
    /// Name of the data source, for example `rx`.
    pub name: String,
    /// The kind every value of this data source must have.
    pub kind: ValueKind,
    /// Minimum value, `None` if unbounded.
    pub min: Option<f64>,
    /// Maximum value, `None` if unbounded.
    pub max: Option<f64>,
}

/// An error raised while loading a `types.db` file.
#[derive(Debug, thiserror::Error)]
pub enum TypesDbError {
    /// The file could not be read.
    #[error("failed to read types.db")]
    Io(#[from] io::Error),
    /// A line does not follow the `name ds:KIND:min:max[, ...]` syntax.
    #[error("invalid types.db entry on line {line}: {reason}")]
    InvalidLine {
        /// One-based line number.
        line: usize,
        /// What is wrong with the line.
        reason: &'static str,
    },
}

/// The type definition table mapping collectd type names to their data sources.
///
/// The table follows the syntax of collectd's `types.db`:
///
/// ```text
/// # comment
/// if_octets    rx:DERIVE:0:U, tx:DERIVE:0:U
/// load         shortterm:GAUGE:0:5000, midterm:GAUGE:0:5000, longterm:GAUGE:0:5000
/// ```
#[derive(Clone, Debug, Default)]
pub struct TypesDb {
    types: HashMap<String, Vec<DataSource>>,
}

impl TypesDb {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads and parses a `types.db` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TypesDbError> {
        fs::read_to_string(path)?.parse()
    }

    /// Returns the data sources of a type.
    pub fn get(&self, type_name: &str) -> Option<&[DataSource]> {
        self.types.get(type_name).map(Vec::as_slice)
    }

    /// Adds or replaces the definition of a type.
    pub fn insert(&mut self, type_name: impl Into<String>, sources: Vec<DataSource>) {
        self.types.insert(type_name.into(), sources);
    }

    /// Returns the number of defined types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if no types are defined.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn parse_bound(s: &str) -> Result<Option<f64>, &'static str> {
    if s == "U" {
        return Ok(None);
    }
    s.parse().map(Some).map_err(|_| "invalid bound")
}

fn parse_kind(s: &str) -> Result<ValueKind, &'static str> {
    match s.to_ascii_uppercase().as_str() {
        "COUNTER" => Ok(ValueKind::Counter),
        "GAUGE" => Ok(ValueKind::Gauge),
        "DERIVE" => Ok(ValueKind::Derive),
        "ABSOLUTE" => Ok(ValueKind::Absolute),
        _ => Err("unknown data source type"),
    }
}

fn parse_source(definition: &str) -> Result<DataSource, &'static str> {
    let mut fields = definition.split(':');
    let (Some(name), Some(kind), Some(min), Some(max), None) = (
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
    ) else {
        return Err("expected data source as name:type:min:max");
    };

    if name.is_empty() {
        return Err("empty data source name");
    }

    Ok(DataSource {
        name: name.to_owned(),
        kind: parse_kind(kind)?,
        min: parse_bound(min)?,
        max: parse_bound(max)?,
    })
}

fn parse_line(line: &str) -> Result<Option<(&str, Vec<DataSource>)>, &'static str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let Some((name, definitions)) = line.split_once(char::is_whitespace) else {
        return Err("type without data sources");
    };

    let sources = definitions
        .split(',')
        .map(str::trim)
        .filter(|definition| !definition.is_empty())
        .map(parse_source)
        .collect::<Result<Vec<_>, _>>()?;

    if sources.is_empty() {
        return Err("type without data sources");
    }

    Ok(Some((name, sources)))
}

impl FromStr for TypesDb {
    type Err = TypesDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut db = TypesDb::new();

        for (index, line) in s.lines().enumerate() {
            let parsed = parse_line(line).map_err(|reason| TypesDbError::InvalidLine {
                line: index + 1,
                reason,
            })?;

            if let Some((name, sources)) = parsed {
                db.insert(name, sources);
            }
        }

        Ok(db)
    }
}
