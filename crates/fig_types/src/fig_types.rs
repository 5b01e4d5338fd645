//! Fig Types - Core data model for dynamic setting behavior
//!
//! This crate contains the pure data structures shared by the display script
//! runtime and the verification runtime:
//!
//! - `SettingValue` - loosely typed setting values
//! - `ScriptableClient` / `ScriptableSetting` - what display scripts see
//! - `DataGridValue` / `DataGridRow` - data grid cells with undo state
//! - `VerificationDefinition` / `VerificationResult` - verification contract

mod data_grid;
mod duration_ms;
mod scriptable;
mod value;
mod verification;

pub use data_grid::*;
pub use scriptable::*;
pub use value::*;
pub use verification::*;
