//! Data grid settings
//!
//! A data grid setting holds rows of cells. Each cell tracks three values so
//! edits can be undone at two levels before they are committed:
//!
//! - `revert_row_changed` undoes the most recent edit of the cell
//! - `revert_all_changes` goes back to the last saved value
//! - `row_saved` commits the current value

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::value::{SettingValue, ValueType};

/// Text shown instead of a secret cell value
pub const SECRET_MASK: &str = "******";

// ─────────────────────────────────────────────────────────────────────────────
// Column Definition
// ─────────────────────────────────────────────────────────────────────────────

/// Column of a data grid setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataGridColumn {
    pub name: String,

    #[serde(default)]
    pub value_type: ValueType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_values: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_line_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_regex: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_explanation: Option<String>,

    #[serde(default)]
    pub is_secret: bool,

    #[serde(default)]
    pub is_read_only: bool,
}

impl DataGridColumn {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            valid_values: None,
            editor_line_count: None,
            validation_regex: None,
            validation_explanation: None,
            is_secret: false,
            is_read_only: false,
        }
    }

    /// Create an empty cell shaped by this column
    pub fn new_cell(&self, value: SettingValue) -> DataGridValue {
        DataGridValue {
            value: value.clone(),
            saved_value: value,
            previous_value: None,
            valid_values: self.valid_values.clone(),
            editor_line_count: self.editor_line_count,
            validation_regex: self.validation_regex.clone(),
            validation_explanation: self.validation_explanation.clone(),
            is_secret: self.is_secret,
            is_read_only: self.is_read_only,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cell
// ─────────────────────────────────────────────────────────────────────────────

/// A single cell of a data grid row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CellRecord", into = "CellRecord")]
pub struct DataGridValue {
    value: SettingValue,
    saved_value: SettingValue,
    previous_value: Option<SettingValue>,
    pub valid_values: Option<Vec<String>>,
    pub editor_line_count: Option<u32>,
    pub validation_regex: Option<String>,
    pub validation_explanation: Option<String>,
    pub is_secret: bool,
    is_read_only: bool,
}

/// Stored form of a cell: only the committed value survives a round trip.
#[derive(Serialize, Deserialize)]
struct CellRecord {
    #[serde(default, skip_serializing_if = "SettingValue::is_null")]
    value: SettingValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    valid_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    editor_line_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    validation_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    validation_explanation: Option<String>,
    #[serde(default)]
    is_secret: bool,
    #[serde(default)]
    is_read_only: bool,
}

impl From<CellRecord> for DataGridValue {
    fn from(record: CellRecord) -> Self {
        Self {
            saved_value: record.value.clone(),
            value: record.value,
            previous_value: None,
            valid_values: record.valid_values,
            editor_line_count: record.editor_line_count,
            validation_regex: record.validation_regex,
            validation_explanation: record.validation_explanation,
            is_secret: record.is_secret,
            is_read_only: record.is_read_only,
        }
    }
}

impl From<DataGridValue> for CellRecord {
    fn from(cell: DataGridValue) -> Self {
        Self {
            value: cell.saved_value,
            valid_values: cell.valid_values,
            editor_line_count: cell.editor_line_count,
            validation_regex: cell.validation_regex,
            validation_explanation: cell.validation_explanation,
            is_secret: cell.is_secret,
            is_read_only: cell.is_read_only,
        }
    }
}

impl DataGridValue {
    /// Create a committed cell with no column metadata
    pub fn new(value: impl Into<SettingValue>) -> Self {
        let value = value.into();
        Self {
            value: value.clone(),
            saved_value: value,
            previous_value: None,
            valid_values: None,
            editor_line_count: None,
            validation_regex: None,
            validation_explanation: None,
            is_secret: false,
            is_read_only: false,
        }
    }

    pub fn value(&self) -> &SettingValue {
        &self.value
    }

    /// The value as of the last commit
    pub fn saved_value(&self) -> &SettingValue {
        &self.saved_value
    }

    /// Edit the cell. The edit stays pending until `row_saved`.
    pub fn set_value(&mut self, value: SettingValue) {
        if value == self.value {
            return;
        }
        let previous = std::mem::replace(&mut self.value, value);
        self.previous_value = Some(previous);
    }

    /// The value as shown when the cell is not editable
    pub fn read_only_value(&self) -> String {
        if self.is_secret {
            SECRET_MASK.to_string()
        } else {
            self.value.display_string()
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.is_read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.is_read_only = read_only;
    }

    /// Whether the cell holds an uncommitted edit
    pub fn is_dirty(&self) -> bool {
        self.value != self.saved_value
    }

    /// Check the value against the cell's regex and valid values
    pub fn is_valid(&self) -> bool {
        let text = self.value.display_string();

        if let Some(valid) = &self.valid_values {
            if !self.value.is_null() && !valid.iter().any(|v| v == &text) {
                return false;
            }
        }

        match self.validation_regex.as_deref().map(Regex::new) {
            Some(Ok(regex)) => regex.is_match(&text),
            // An unparseable pattern cannot reject anything.
            Some(Err(_)) | None => true,
        }
    }

    /// Undo the most recent edit
    pub fn revert_row_changed(&mut self) {
        if let Some(previous) = self.previous_value.take() {
            self.value = previous;
        }
    }

    /// Discard every edit since the last save
    pub fn revert_all_changes(&mut self) {
        self.value = self.saved_value.clone();
        self.previous_value = None;
    }

    /// Commit the current value
    pub fn row_saved(&mut self) {
        self.saved_value = self.value.clone();
        self.previous_value = None;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row
// ─────────────────────────────────────────────────────────────────────────────

/// A data grid row: cells keyed by column name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataGridRow {
    pub cells: BTreeMap<String, DataGridValue>,
}

impl DataGridRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a committed row from plain values
    pub fn from_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SettingValue>,
    {
        Self {
            cells: values
                .into_iter()
                .map(|(k, v)| (k.into(), DataGridValue::new(v)))
                .collect(),
        }
    }

    pub fn cell(&self, column: &str) -> Option<&DataGridValue> {
        self.cells.get(column)
    }

    pub fn cell_mut(&mut self, column: &str) -> Option<&mut DataGridValue> {
        self.cells.get_mut(column)
    }

    pub fn is_dirty(&self) -> bool {
        self.cells.values().any(DataGridValue::is_dirty)
    }

    pub fn revert_row_changed(&mut self) {
        self.cells
            .values_mut()
            .for_each(DataGridValue::revert_row_changed);
    }

    pub fn revert_all_changes(&mut self) {
        self.cells
            .values_mut()
            .for_each(DataGridValue::revert_all_changes);
    }

    pub fn row_saved(&mut self) {
        self.cells.values_mut().for_each(DataGridValue::row_saved);
    }

    /// Committed plain values of the row
    pub fn to_value(&self) -> SettingValue {
        SettingValue::Map(
            self.cells
                .iter()
                .map(|(k, cell)| (k.clone(), cell.saved_value().clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_tier_undo() {
        let mut cell = DataGridValue::new("a");

        cell.set_value("b".into());
        cell.set_value("c".into());
        assert!(cell.is_dirty());

        cell.revert_row_changed();
        assert_eq!(cell.value(), &SettingValue::from("b"));

        cell.revert_all_changes();
        assert_eq!(cell.value(), &SettingValue::from("a"));
        assert!(!cell.is_dirty());

        cell.set_value("d".into());
        cell.row_saved();
        cell.revert_all_changes();
        assert_eq!(cell.value(), &SettingValue::from("d"));
    }

    #[test]
    fn test_secret_read_only_value() {
        let mut column = DataGridColumn::new("Password", ValueType::String);
        column.is_secret = true;

        let cell = column.new_cell("hunter2".into());
        assert_eq!(cell.read_only_value(), SECRET_MASK);
    }

    #[test]
    fn test_validation() {
        let mut column = DataGridColumn::new("Port", ValueType::Int);
        column.validation_regex = Some(r"^\d{2,5}$".to_string());

        let mut cell = column.new_cell(SettingValue::Int(8080));
        assert!(cell.is_valid());

        cell.set_value(SettingValue::Int(1));
        assert!(!cell.is_valid());

        let mut mode = DataGridColumn::new("Mode", ValueType::String);
        mode.valid_values = Some(vec!["A".into(), "B".into()]);
        let cell = mode.new_cell("C".into());
        assert!(!cell.is_valid());
    }

    #[test]
    fn test_row_saved_commits_all_cells() {
        let mut row = DataGridRow::from_values([("Name", "x"), ("Host", "h")]);
        row.cell_mut("Name").unwrap().set_value("y".into());
        assert!(row.is_dirty());

        row.row_saved();
        assert!(!row.is_dirty());
        assert_eq!(row.to_value().get("Name"), Some(&SettingValue::from("y")));
    }

    #[test]
    fn test_pending_edits_are_not_stored() {
        let mut row = DataGridRow::from_values([("Port", 80)]);
        row.cell_mut("Port").unwrap().set_value(SettingValue::Int(9090));

        assert_eq!(row.to_value().get("Port"), Some(&SettingValue::Int(80)));

        let stored: DataGridRow =
            serde_json::from_value(serde_json::to_value(&row).unwrap()).unwrap();
        assert_eq!(stored.cell("Port").unwrap().value(), &SettingValue::Int(80));
        assert!(!stored.is_dirty());
    }
}
