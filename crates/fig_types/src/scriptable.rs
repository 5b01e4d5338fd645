//! Scriptable client model
//!
//! This is the capability set a display script operates on. A
//! `ScriptableClient` is built fresh from a client's live settings for each
//! script run and discarded once its changes have been copied back.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data_grid::{DataGridColumn, DataGridRow};
use crate::value::{SettingValue, ValueType};

/// Separator used in setting names to denote nesting, e.g. `Parent->Child`
pub const PATH_SEPARATOR: &str = "->";

// ─────────────────────────────────────────────────────────────────────────────
// Scriptable Client
// ─────────────────────────────────────────────────────────────────────────────

/// A client and its settings as seen by display scripts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptableClient {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub settings: Vec<ScriptableSetting>,
}

impl ScriptableClient {
    pub fn new(id: Uuid, name: impl Into<String>, settings: Vec<ScriptableSetting>) -> Self {
        Self {
            id,
            name: name.into(),
            settings,
        }
    }

    /// Find a setting by its full name
    pub fn setting(&self, name: &str) -> Option<&ScriptableSetting> {
        self.settings.iter().find(|s| s.name == name)
    }

    pub fn setting_mut(&mut self, name: &str) -> Option<&mut ScriptableSetting> {
        self.settings.iter_mut().find(|s| s.name == name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Setting Kind
// ─────────────────────────────────────────────────────────────────────────────

/// Variant-specific state of a scriptable setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettingKind {
    /// Plain value (string, number, bool, date)
    Scalar {
        #[serde(default, skip_serializing_if = "SettingValue::is_null")]
        value: SettingValue,
    },
    /// Value restricted to a list of valid values
    DropDown {
        #[serde(default, skip_serializing_if = "SettingValue::is_null")]
        value: SettingValue,
        #[serde(default)]
        valid_values: Vec<String>,
    },
    /// Rows of typed cells
    DataGrid {
        #[serde(default)]
        columns: Vec<DataGridColumn>,
        #[serde(default)]
        rows: Vec<DataGridRow>,
    },
    /// Duration, exposed to scripts in milliseconds
    TimeSpan {
        #[serde(
            default,
            with = "crate::duration_ms",
            skip_serializing_if = "Option::is_none"
        )]
        value: Option<Duration>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Scriptable Setting
// ─────────────────────────────────────────────────────────────────────────────

/// A setting as seen by display scripts.
///
/// Visibility and read-only state are private: `Hidden` and `IsVisible` are
/// two views of the same flag, so the only way to change them is through
/// `set_visibility_from_script` and `set_read_only`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptableSetting {
    pub name: String,

    #[serde(flatten)]
    pub kind: SettingKind,

    #[serde(default)]
    pub value_type: ValueType,

    #[serde(default = "default_true")]
    pub is_valid: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_explanation: Option<String>,

    #[serde(default)]
    pub advanced: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_order: Option<i32>,

    #[serde(default)]
    hidden: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_color: Option<String>,

    #[serde(default)]
    is_read_only: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_line_count: Option<u32>,

    /// Display script attached to this setting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_script: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ScriptableSetting {
    /// Create a visible, editable, valid setting
    pub fn new(name: impl Into<String>, value_type: ValueType, kind: SettingKind) -> Self {
        Self {
            name: name.into(),
            kind,
            value_type,
            is_valid: true,
            validation_explanation: None,
            advanced: false,
            display_order: None,
            hidden: false,
            category_name: None,
            category_color: None,
            is_read_only: false,
            editor_line_count: None,
            display_script: None,
        }
    }

    /// Create a scalar setting
    pub fn scalar(name: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        let value = value.into();
        let value_type = match &value {
            SettingValue::Bool(_) => ValueType::Bool,
            SettingValue::Int(_) => ValueType::Int,
            SettingValue::Float(_) => ValueType::Double,
            SettingValue::List(_) => ValueType::List,
            _ => ValueType::String,
        };
        Self::new(name, value_type, SettingKind::Scalar { value })
    }

    /// Create a drop down setting
    pub fn drop_down(
        name: impl Into<String>,
        value: impl Into<String>,
        valid_values: Vec<String>,
    ) -> Self {
        Self::new(
            name,
            ValueType::String,
            SettingKind::DropDown {
                value: SettingValue::String(value.into()),
                valid_values,
            },
        )
    }

    /// Create a data grid setting
    pub fn data_grid(
        name: impl Into<String>,
        columns: Vec<DataGridColumn>,
        rows: Vec<DataGridRow>,
    ) -> Self {
        Self::new(name, ValueType::DataGrid, SettingKind::DataGrid { columns, rows })
    }

    /// Create a time span setting
    pub fn time_span(name: impl Into<String>, value: Option<Duration>) -> Self {
        Self::new(name, ValueType::TimeSpan, SettingKind::TimeSpan { value })
    }

    pub fn with_display_script(mut self, script: impl Into<String>) -> Self {
        self.display_script = Some(script.into());
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.is_read_only = read_only;
        self
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn is_visible(&self) -> bool {
        !self.hidden
    }

    /// Show or hide the setting
    pub fn set_visibility_from_script(&mut self, visible: bool) {
        self.hidden = !visible;
    }

    pub fn is_read_only(&self) -> bool {
        self.is_read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.is_read_only = read_only;
        if let SettingKind::DataGrid { rows, .. } = &mut self.kind {
            for cell in rows.iter_mut().flat_map(|r| r.cells.values_mut()) {
                cell.set_read_only(read_only);
            }
        }
    }

    /// Path segments for nested names, `None` for flat names
    pub fn path_segments(&self) -> Option<Vec<&str>> {
        if self.name.contains(PATH_SEPARATOR) {
            Some(
                self.name
                    .split(PATH_SEPARATOR)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect(),
            )
        } else {
            None
        }
    }

    /// The current value. Data grid rows contribute their committed cells.
    pub fn value(&self) -> SettingValue {
        match &self.kind {
            SettingKind::Scalar { value } | SettingKind::DropDown { value, .. } => value.clone(),
            SettingKind::DataGrid { rows, .. } => {
                SettingValue::List(rows.iter().map(DataGridRow::to_value).collect())
            }
            SettingKind::TimeSpan { value } => value
                .map(|d| SettingValue::Float(d.as_secs_f64() * 1000.0))
                .unwrap_or_default(),
        }
    }

    /// Replace the value of a scalar, drop down or time span setting.
    ///
    /// Data grid values are edited per cell, see [`DataGridRow`].
    pub fn set_value(&mut self, new_value: SettingValue) {
        let new_value = new_value.coerce_to(self.value_type);
        match &mut self.kind {
            SettingKind::Scalar { value } | SettingKind::DropDown { value, .. } => {
                *value = new_value;
            }
            SettingKind::TimeSpan { value } => {
                *value = new_value
                    .as_f64()
                    .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok());
            }
            SettingKind::DataGrid { .. } => {}
        }
    }

    /// Commit pending data grid edits
    pub fn row_saved(&mut self) {
        if let SettingKind::DataGrid { rows, .. } = &mut self.kind {
            rows.iter_mut().for_each(DataGridRow::row_saved);
        }
    }

    pub fn columns(&self) -> &[DataGridColumn] {
        match &self.kind {
            SettingKind::DataGrid { columns, .. } => columns,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_invariant() {
        let mut setting = ScriptableSetting::scalar("Mode", "A").with_hidden(true);
        assert!(setting.hidden());
        assert!(!setting.is_visible());

        setting.set_visibility_from_script(true);
        assert!(!setting.hidden());
        assert!(setting.is_visible());
    }

    #[test]
    fn test_path_segments() {
        let nested = ScriptableSetting::scalar("Database->Connection", "x");
        assert_eq!(nested.path_segments(), Some(vec!["Database", "Connection"]));

        let flat = ScriptableSetting::scalar("Database", "x");
        assert_eq!(flat.path_segments(), None);
    }

    #[test]
    fn test_time_span_value_in_milliseconds() {
        let mut setting = ScriptableSetting::time_span("Timeout", Some(Duration::from_secs(2)));
        assert_eq!(setting.value(), SettingValue::Float(2000.0));

        setting.set_value(SettingValue::Int(500));
        assert_eq!(
            setting.kind,
            SettingKind::TimeSpan {
                value: Some(Duration::from_millis(500))
            }
        );

        setting.set_value(SettingValue::Float(1e300));
        assert_eq!(setting.kind, SettingKind::TimeSpan { value: None });
    }

    #[test]
    fn test_set_value_coerces_to_declared_type() {
        let mut setting = ScriptableSetting::scalar("Retries", 3);
        setting.set_value(SettingValue::Float(5.0));
        assert_eq!(setting.value(), SettingValue::Int(5));
    }

    #[test]
    fn test_read_only_propagates_to_cells() {
        let mut setting = ScriptableSetting::data_grid(
            "Services",
            vec![DataGridColumn::new("Name", ValueType::String)],
            vec![DataGridRow::from_values([("Name", "api")])],
        );
        setting.set_read_only(true);

        let SettingKind::DataGrid { rows, .. } = &setting.kind else {
            panic!("expected data grid");
        };
        assert!(rows[0].cell("Name").unwrap().is_read_only());
    }

    #[test]
    fn test_deserialize_from_toml() {
        let toml_str = r#"
            id = "5b2a8a34-3c0c-4fb4-9d1c-3a9d5b1f0e11"
            name = "OrderService"

            [[settings]]
            name = "Mode"
            kind = "drop_down"
            value = "A"
            valid_values = ["A", "B"]
            display_script = "log(Mode.Value)"

            [[settings]]
            name = "Timeout"
            kind = "time_span"
            value_type = "time_span"
            value = 1500.0
            hidden = true
        "#;

        let client: ScriptableClient = toml::from_str(toml_str).unwrap();
        assert_eq!(client.settings.len(), 2);
        assert_eq!(client.setting("Mode").unwrap().value(), SettingValue::from("A"));

        let timeout = client.setting("Timeout").unwrap();
        assert!(timeout.hidden());
        assert_eq!(timeout.value(), SettingValue::Float(1500.0));
    }
}
