//! Subject mapping tables
//!
//! A mapping table is a CSV file with one row per subject. One column holds
//! the subject identifier; every other header is a dotted profile path whose
//! cell is substituted into that subject's profile.

use super::model::Profile;
use super::path::{self, ProfilePath};
use crate::domain::{DeidError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

/// Default subject identifier column
pub const DEFAULT_SUBJECT_COLUMN: &str = "subject.code";

/// Raw mapping table; every cell is kept as a string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MappingTable {
    /// Reads a mapping table from a CSV file
    ///
    /// # Errors
    ///
    /// Returns [`DeidError::Io`] if the file is missing and
    /// [`DeidError::Serialization`] for malformed CSV (including ragged rows).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DeidError::Io(format!(
                "Mapping file not found: {}",
                path.display()
            )));
        }
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Reads a mapping table from any CSV source
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers = csv_reader
            .headers()?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        tracing::debug!(columns = headers.len(), rows = rows.len(), "Loaded mapping table");
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }
}

/// Validates mapping tables against a profile
///
/// # Examples
///
/// ```no_run
/// use deid_export::profile::{MappingTable, MappingValidator, Profile};
///
/// # fn example() -> deid_export::domain::Result<()> {
/// let profile = Profile::from_file("deid-profile.yaml")?;
/// let table = MappingTable::from_path("subjects.csv")?;
/// let mapping = MappingValidator::new("subject.code").validate(&profile, table)?;
/// println!("{} subjects", mapping.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MappingValidator {
    subject_column: String,
    required_columns: Vec<String>,
}

impl MappingValidator {
    /// Creates a validator keyed on `subject_column`, which is always required
    pub fn new(subject_column: impl Into<String>) -> Self {
        let subject_column = subject_column.into();
        Self {
            required_columns: vec![subject_column.clone()],
            subject_column,
        }
    }

    /// Adds further required columns
    pub fn with_required_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            let column = column.into();
            if !self.required_columns.contains(&column) {
                self.required_columns.push(column);
            }
        }
        self
    }

    /// Validates `table` against `profile`
    ///
    /// Checks, in order: field-rule well-formedness, presence of required
    /// columns, uniqueness of subject identifiers. Columns that do not
    /// resolve to a profile path only produce a warning.
    ///
    /// # Errors
    ///
    /// - [`DeidError::InvalidFieldRule`] if the profile is malformed
    /// - [`DeidError::MissingColumn`] for the first absent required column
    /// - [`DeidError::DuplicateKey`] listing every repeated identifier
    pub fn validate(&self, profile: &Profile, table: MappingTable) -> Result<ValidatedMapping> {
        profile.validate_field_rules()?;

        for column in &self.required_columns {
            if table.column_index(column).is_none() {
                return Err(DeidError::MissingColumn(column.clone()));
            }
        }

        let id_index = table
            .column_index(&self.subject_column)
            .ok_or_else(|| DeidError::MissingColumn(self.subject_column.clone()))?;

        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for row in &table.rows {
            let id = row[id_index].as_str();
            if !seen.insert(id) {
                duplicates.insert(id.to_string());
            }
        }
        if !duplicates.is_empty() {
            return Err(DeidError::DuplicateKey {
                column: self.subject_column.clone(),
                values: duplicates.into_iter().collect(),
            });
        }

        let mut unmatched = Vec::new();
        for column in table.headers.iter().filter(|h| **h != self.subject_column) {
            let found = ProfilePath::parse(column)
                .map(|p| path::exists(profile.as_map(), &p))
                .unwrap_or(false);
            if !found {
                tracing::warn!(column = %column, "Column `{}` not found in DeID template", column);
                unmatched.push(column.clone());
            }
        }

        tracing::info!(
            subjects = table.len(),
            unmatched_columns = unmatched.len(),
            "Mapping table validated"
        );

        Ok(ValidatedMapping {
            id_index,
            subject_column: self.subject_column.clone(),
            table,
            unmatched_columns: unmatched,
        })
    }
}

/// A mapping table that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedMapping {
    id_index: usize,
    subject_column: String,
    table: MappingTable,
    unmatched_columns: Vec<String>,
}

impl ValidatedMapping {
    pub fn subject_column(&self) -> &str {
        &self.subject_column
    }

    /// Columns that did not resolve against the profile
    pub fn unmatched_columns(&self) -> &[String] {
        &self.unmatched_columns
    }

    /// Subject identifiers in table order
    pub fn subject_ids(&self) -> impl Iterator<Item = &str> {
        self.table.rows.iter().map(|row| row[self.id_index].as_str())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn contains(&self, subject_id: &str) -> bool {
        self.subject_ids().any(|id| id == subject_id)
    }

    /// Substitutions for one subject
    ///
    /// The identifier column and empty cells are left out.
    ///
    /// # Errors
    ///
    /// Returns [`DeidError::SubjectNotFound`] if no row carries `subject_id`.
    pub fn substitutions_for(&self, subject_id: &str) -> Result<Map<String, Value>> {
        let row = self
            .table
            .rows
            .iter()
            .find(|row| row[self.id_index] == subject_id)
            .ok_or_else(|| DeidError::SubjectNotFound(subject_id.to_string()))?;

        Ok(self
            .table
            .headers
            .iter()
            .zip(row)
            .enumerate()
            .filter(|(i, (_, cell))| *i != self.id_index && !cell.is_empty())
            .map(|(_, (header, cell))| (header.clone(), Value::String(cell.clone())))
            .collect())
    }
}
