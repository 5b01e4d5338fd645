//! Client Files
//!
//! A client file is a TOML description of one client: its settings (with
//! their display scripts) and its verification definitions.
//!
//! ```toml
//! id = "5b2a8a34-3c0c-4fb4-9d1c-3a9d5b1f0e11"
//! name = "OrderService"
//!
//! [[settings]]
//! name = "Mode"
//! kind = "drop_down"
//! value = "A"
//! valid_values = ["A", "B"]
//! display_script = "Sibling.IsVisible = Mode.Value == 'A'"
//!
//! [[plugin_verifications]]
//! name = "Rest200OkVerifier"
//! property_arguments = ["Uri"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use fig_types::{
    DynamicVerificationDefinition, PluginVerificationDefinition, ScriptableClient,
    ScriptableSetting, SettingValues, VerificationDefinition,
};

/// Error type for client file loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Client file does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Duplicate setting name: {0}")]
    DuplicateSetting(String),
}

/// A client as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFile {
    pub id: Uuid,
    pub name: String,

    #[serde(default)]
    pub settings: Vec<ScriptableSetting>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_verifications: Vec<DynamicVerificationDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugin_verifications: Vec<PluginVerificationDefinition>,
}

impl ClientFile {
    /// Load a client file from disk
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LoadError::PathNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await?;
        let client = Self::from_toml_str(&content)?;
        info!(
            "Loaded client {} ({}) with {} settings",
            client.name,
            client.id,
            client.settings.len()
        );
        Ok(client)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, LoadError> {
        let client: ClientFile = toml::from_str(content)?;

        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = client.settings.iter().find(|s| !seen.insert(s.name.as_str())) {
            return Err(LoadError::DuplicateSetting(duplicate.name.clone()));
        }
        Ok(client)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Fresh scriptable view of the client's settings
    pub fn scriptable_client(&self) -> ScriptableClient {
        ScriptableClient::new(self.id, self.name.clone(), self.settings.clone())
    }

    /// Take the settings back from a scriptable client after scripts ran
    pub fn apply_scriptable(&mut self, client: ScriptableClient) {
        self.settings = client.settings;
    }

    /// Current value of every setting, keyed by name
    pub fn setting_values(&self) -> SettingValues {
        self.settings
            .iter()
            .map(|s| (s.name.clone(), s.value()))
            .collect()
    }

    /// Dynamic definitions first, then plugin definitions
    pub fn verifications(&self) -> Vec<VerificationDefinition> {
        self.dynamic_verifications
            .iter()
            .cloned()
            .map(VerificationDefinition::from)
            .chain(
                self.plugin_verifications
                    .iter()
                    .cloned()
                    .map(VerificationDefinition::from),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fig_types::{SettingValue, TargetRuntime};

    const CLIENT: &str = r#"
        id = "5b2a8a34-3c0c-4fb4-9d1c-3a9d5b1f0e11"
        name = "OrderService"

        [[settings]]
        name = "Mode"
        kind = "drop_down"
        value = "A"
        valid_values = ["A", "B"]
        display_script = "Sibling.IsVisible = Mode.Value == 'A'"

        [[settings]]
        name = "Sibling"
        kind = "scalar"
        value = "x"
        hidden = true

        [[dynamic_verifications]]
        name = "ModeIsSet"
        target_runtime = "es2020"
        code = "export function verify(s) { return { success: !!s.Mode, message: '' }; }"

        [[plugin_verifications]]
        name = "Rest200OkVerifier"
        property_arguments = ["Uri"]
    "#;

    #[tokio::test]
    async fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        tokio::fs::write(&path, CLIENT).await.unwrap();

        let client = ClientFile::load(&path).await.unwrap();

        assert_eq!(client.name, "OrderService");
        assert_eq!(client.settings.len(), 2);
        assert_eq!(
            client.dynamic_verifications[0].target_runtime,
            TargetRuntime::Es2020
        );
        assert_eq!(client.verifications().len(), 2);
        assert_eq!(client.setting_values()["Mode"], SettingValue::from("A"));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientFile::load(dir.path().join("missing.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::PathNotFound(_)));
    }

    #[test]
    fn test_duplicate_settings_are_rejected() {
        let content = r#"
            id = "5b2a8a34-3c0c-4fb4-9d1c-3a9d5b1f0e11"
            name = "Dup"

            [[settings]]
            name = "A"
            kind = "scalar"

            [[settings]]
            name = "A"
            kind = "scalar"
        "#;

        assert!(matches!(
            ClientFile::from_toml_str(content),
            Err(LoadError::DuplicateSetting(name)) if name == "A"
        ));
    }

    #[test]
    fn test_scriptable_round_trip() {
        let mut file = ClientFile::from_toml_str(CLIENT).unwrap();
        let mut client = file.scriptable_client();
        client
            .setting_mut("Sibling")
            .unwrap()
            .set_visibility_from_script(true);

        file.apply_scriptable(client);

        let reparsed = ClientFile::from_toml_str(&file.to_toml_string().unwrap()).unwrap();
        assert!(reparsed.settings[1].is_visible());
        assert_eq!(reparsed, file);
    }
}
