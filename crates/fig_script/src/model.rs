//! Scriptable model adapter
//!
//! Projects a [`ScriptableSetting`] into the plain object a display script
//! sees, and copies a script's edits back through the setting's own mutators.
//!
//! Script-side field names follow the operator-facing model (`Value`,
//! `IsVisible`, `IsReadOnly`, ...). Changes are detected by comparing the
//! object read back before execution with the one read back after it, so a
//! script that only reads leaves the setting untouched.

use fig_types::{
    DataGridColumn, DataGridRow, DataGridValue, ScriptableSetting, SettingKind, SettingValue,
};
use serde_json::{Map, Value, json};

// ─────────────────────────────────────────────────────────────────────────────
// Field Names
// ─────────────────────────────────────────────────────────────────────────────

const NAME: &str = "Name";
const VALUE: &str = "Value";
const VALUE_TYPE: &str = "ValueType";
const IS_VALID: &str = "IsValid";
const VALIDATION_EXPLANATION: &str = "ValidationExplanation";
const ADVANCED: &str = "Advanced";
const DISPLAY_ORDER: &str = "DisplayOrder";
const HIDDEN: &str = "Hidden";
const IS_VISIBLE: &str = "IsVisible";
const CATEGORY_NAME: &str = "CategoryName";
const CATEGORY_COLOR: &str = "CategoryColor";
const IS_READ_ONLY: &str = "IsReadOnly";
const EDITOR_LINE_COUNT: &str = "EditorLineCount";
const VALID_VALUES: &str = "ValidValues";
const VALIDATION_REGEX: &str = "ValidationRegex";
const IS_SECRET: &str = "IsSecret";
const READ_ONLY_VALUE: &str = "ReadOnlyValue";

// ─────────────────────────────────────────────────────────────────────────────
// Projection
// ─────────────────────────────────────────────────────────────────────────────

/// Build the object a display script sees for one setting
pub fn setting_to_script(setting: &ScriptableSetting) -> Value {
    let mut fields = Map::new();
    fields.insert(NAME.into(), json!(setting.name));
    fields.insert(VALUE_TYPE.into(), json!(setting.value_type.script_name()));
    fields.insert(IS_VALID.into(), json!(setting.is_valid));
    fields.insert(
        VALIDATION_EXPLANATION.into(),
        json!(setting.validation_explanation),
    );
    fields.insert(ADVANCED.into(), json!(setting.advanced));
    fields.insert(DISPLAY_ORDER.into(), json!(setting.display_order));
    fields.insert(HIDDEN.into(), json!(setting.hidden()));
    fields.insert(IS_VISIBLE.into(), json!(setting.is_visible()));
    fields.insert(CATEGORY_NAME.into(), json!(setting.category_name));
    fields.insert(CATEGORY_COLOR.into(), json!(setting.category_color));
    fields.insert(IS_READ_ONLY.into(), json!(setting.is_read_only()));
    fields.insert(EDITOR_LINE_COUNT.into(), json!(setting.editor_line_count));

    match &setting.kind {
        SettingKind::DataGrid { rows, .. } => {
            let rows = rows.iter().map(row_to_script).collect();
            fields.insert(VALUE.into(), Value::Array(rows));
        }
        SettingKind::DropDown { valid_values, .. } => {
            fields.insert(VALUE.into(), setting.value().into());
            fields.insert(VALID_VALUES.into(), json!(valid_values));
        }
        SettingKind::Scalar { .. } | SettingKind::TimeSpan { .. } => {
            fields.insert(VALUE.into(), setting.value().into());
        }
    }

    Value::Object(fields)
}

fn row_to_script(row: &DataGridRow) -> Value {
    Value::Object(
        row.cells
            .iter()
            .map(|(column, cell)| (column.clone(), cell_to_script(cell)))
            .collect(),
    )
}

fn cell_to_script(cell: &DataGridValue) -> Value {
    json!({
        VALUE: Value::from(cell.value().clone()),
        IS_READ_ONLY: cell.is_read_only(),
        VALID_VALUES: cell.valid_values,
        EDITOR_LINE_COUNT: cell.editor_line_count,
        VALIDATION_REGEX: cell.validation_regex,
        VALIDATION_EXPLANATION: cell.validation_explanation,
        IS_SECRET: cell.is_secret,
        READ_ONLY_VALUE: cell.read_only_value(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Apply Back
// ─────────────────────────────────────────────────────────────────────────────

/// Copy the edits a script made to a setting's object back onto the setting.
///
/// `before` and `after` are the script object read back before and after
/// execution. Only fields present in `after` that differ from `before` are
/// applied. Returns the names of the fields that were applied.
pub fn apply_script_changes(
    setting: &mut ScriptableSetting,
    before: &Value,
    after: &Value,
) -> Vec<&'static str> {
    let mut applied = Vec::new();
    // A script that rebinds the global instead of editing it changed nothing.
    if !after.is_object() {
        return applied;
    }
    let changed = |key: &str| after.get(key).filter(|new| Some(*new) != before.get(key));

    // Both flags describe one state; an explicit IsVisible edit wins.
    if let Some(visible) = changed(IS_VISIBLE).and_then(Value::as_bool) {
        setting.set_visibility_from_script(visible);
        applied.push(IS_VISIBLE);
    } else if let Some(hidden) = changed(HIDDEN).and_then(Value::as_bool) {
        setting.set_visibility_from_script(!hidden);
        applied.push(HIDDEN);
    }

    if let Some(read_only) = changed(IS_READ_ONLY).and_then(Value::as_bool) {
        setting.set_read_only(read_only);
        applied.push(IS_READ_ONLY);
    }

    if let Some(valid) = changed(IS_VALID).and_then(Value::as_bool) {
        setting.is_valid = valid;
        applied.push(IS_VALID);
    }

    if let Some(explanation) = changed(VALIDATION_EXPLANATION) {
        setting.validation_explanation = optional_string(explanation);
        applied.push(VALIDATION_EXPLANATION);
    }

    if let Some(advanced) = changed(ADVANCED).and_then(Value::as_bool) {
        setting.advanced = advanced;
        applied.push(ADVANCED);
    }

    if let Some(order) = changed(DISPLAY_ORDER) {
        setting.display_order = order.as_f64().map(|n| n as i32);
        applied.push(DISPLAY_ORDER);
    }

    if let Some(category) = changed(CATEGORY_NAME) {
        setting.category_name = optional_string(category);
        applied.push(CATEGORY_NAME);
    }

    if let Some(color) = changed(CATEGORY_COLOR) {
        setting.category_color = optional_string(color);
        applied.push(CATEGORY_COLOR);
    }

    if let Some(lines) = changed(EDITOR_LINE_COUNT) {
        setting.editor_line_count = lines.as_f64().filter(|n| *n >= 0.0).map(|n| n as u32);
        applied.push(EDITOR_LINE_COUNT);
    }

    if let Some(new_valid) = changed(VALID_VALUES) {
        if let SettingKind::DropDown { valid_values, .. } = &mut setting.kind {
            *valid_values = string_list(new_valid);
            applied.push(VALID_VALUES);
        }
    }

    if let Some(new_value) = changed(VALUE) {
        let empty = Vec::new();
        let before_rows = before
            .get(VALUE)
            .and_then(Value::as_array)
            .unwrap_or(&empty);

        let mut grid_check = None;
        match &mut setting.kind {
            SettingKind::DataGrid { columns, rows } => {
                if let Some(after_rows) = new_value.as_array() {
                    apply_rows(columns, rows, before_rows, after_rows);
                    applied.push(VALUE);
                    grid_check = Some(first_invalid_cell(rows));
                }
            }
            _ => {
                setting.set_value(SettingValue::from(new_value.clone()));
                applied.push(VALUE);
            }
        }

        // Cell validation decides IsValid unless the script set it itself.
        if let Some(invalid) = grid_check.filter(|_| changed(IS_VALID).is_none()) {
            setting.is_valid = invalid.is_none();
            if changed(VALIDATION_EXPLANATION).is_none() {
                setting.validation_explanation = invalid;
            }
            applied.push(IS_VALID);
        }
    }

    applied
}

/// Explanation for the first cell that fails its regex or valid values
fn first_invalid_cell(rows: &[DataGridRow]) -> Option<String> {
    rows.iter().enumerate().find_map(|(index, row)| {
        row.cells
            .iter()
            .find(|(_, cell)| !cell.is_valid())
            .map(|(column, cell)| {
                cell.validation_explanation.clone().unwrap_or_else(|| {
                    format!("Invalid value in row {}, column {}", index + 1, column)
                })
            })
    })
}

/// Reconcile grid rows with the array the script left behind. Rows the
/// script appended are created from the column definitions; rows it removed
/// are dropped. Edits stay pending until the run commits them.
fn apply_rows(
    columns: &[DataGridColumn],
    rows: &mut Vec<DataGridRow>,
    before_rows: &[Value],
    after_rows: &[Value],
) {
    rows.truncate(after_rows.len());

    for (index, after_row) in after_rows.iter().enumerate() {
        let Some(after_cells) = after_row.as_object() else {
            continue;
        };
        if index >= rows.len() {
            rows.push(DataGridRow::new());
        }
        let before_cells = before_rows.get(index).and_then(Value::as_object);
        let row = &mut rows[index];

        for (column_name, after_cell) in after_cells {
            let before_cell = before_cells.and_then(|cells| cells.get(column_name));
            if before_cell == Some(after_cell) {
                continue;
            }

            let column = columns.iter().find(|c| &c.name == column_name);
            let cell = row
                .cells
                .entry(column_name.clone())
                .or_insert_with(|| match column {
                    Some(column) => column.new_cell(SettingValue::Null),
                    None => DataGridValue::new(SettingValue::Null),
                });

            let (after_value, after_read_only) = split_cell(after_cell);
            let (before_value, before_read_only) =
                before_cell.map(split_cell).unwrap_or((None, None));

            if after_value != before_value {
                let value = SettingValue::from(after_value.cloned().unwrap_or(Value::Null));
                let value = match column {
                    Some(column) => value.coerce_to(column.value_type),
                    None => value,
                };
                cell.set_value(value);
            }

            if after_read_only != before_read_only {
                if let Some(read_only) = after_read_only {
                    cell.set_read_only(read_only);
                }
            }
        }
    }
}

/// A script may write either a cell object or a plain value into a row
fn split_cell(cell: &Value) -> (Option<&Value>, Option<bool>) {
    match cell.as_object() {
        Some(fields) if fields.contains_key(VALUE) => (
            fields.get(VALUE),
            fields.get(IS_READ_ONLY).and_then(Value::as_bool),
        ),
        _ => (Some(cell), None),
    }
}

fn optional_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect()
        })
        .unwrap_or_default()
}
