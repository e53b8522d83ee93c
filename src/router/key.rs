use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identity of one backend session
///
/// Two keys are equal iff language, workspace and output directory all
/// match. Fields are private so a key cannot change once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectKey {
    language: String,
    workspace: PathBuf,
    #[serde(rename = "output")]
    output_directory: PathBuf,
}

impl ProjectKey {
    pub fn new(
        language: impl Into<String>,
        workspace: impl Into<PathBuf>,
        output_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            language: language.into(),
            workspace: workspace.into(),
            output_directory: output_directory.into(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    /// Params of the `selectLspServer` notification
    pub fn to_select_params(&self) -> Value {
        json!({
            "language": self.language,
            "workspace": self.workspace.display().to_string(),
            "output": self.output_directory.display().to_string(),
        })
    }

    /// Parse `selectLspServer` params; `output` may be omitted
    pub fn from_select_params(params: &Value) -> Option<Self> {
        let language = params.get("language")?.as_str()?;
        let workspace = params.get("workspace")?.as_str()?;
        let output = params.get("output").and_then(Value::as_str).unwrap_or("");
        if language.is_empty() || workspace.is_empty() {
            return None;
        }
        Some(Self::new(language, workspace, output))
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.language,
            self.workspace.display()
        )?;
        if !self.output_directory.as_os_str().is_empty() {
            write!(f, " -> {}", self.output_directory.display())?;
        }
        Ok(())
    }
}
