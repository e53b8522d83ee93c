//! Spawn recipes: how to launch a language server for a project key
//!
//! Recipes are pure: they map a [`ProjectKey`] to a [`ProcessDescriptor`]
//! and never touch the filesystem or spawn anything themselves.

use crate::io::process::ProcessDescriptor;
use crate::router::key::ProjectKey;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_CLANGD: &str = "clangd";
pub const DEFAULT_PYTHON: &str = "python3";
pub const DEFAULT_TYPESCRIPT_SERVER: &str = "typescript-language-server";
pub const DEFAULT_JDTLS: &str = "jdtls";

/// clangd symbol result cap
pub const CLANGD_RESULT_LIMIT: u32 = 500;

/// Backend families with a built-in recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageFamily {
    Cxx,
    Python,
    JavaScript,
    Java,
}

impl LanguageFamily {
    /// Case-insensitive match on the language names editors send
    pub fn from_language(language: &str) -> Option<Self> {
        match language.to_ascii_lowercase().as_str() {
            "c" | "cpp" | "c++" | "cxx" | "c/c++" | "objective-c" | "objective-cpp" => {
                Some(Self::Cxx)
            }
            "python" | "py" => Some(Self::Python),
            "js" | "javascript" | "javascriptreact" | "typescript" | "typescriptreact" | "ts" => {
                Some(Self::JavaScript)
            }
            "java" => Some(Self::Java),
            _ => None,
        }
    }
}

/// Resolved backend binaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeConfig {
    pub clangd_path: String,
    pub python_path: String,
    pub typescript_server_path: String,
    pub jdtls_path: String,
    /// Parent of per-workspace jdtls `-data` directories
    pub jdtls_data_root: PathBuf,
}

impl Default for RecipeConfig {
    fn default() -> Self {
        Self {
            clangd_path: DEFAULT_CLANGD.to_string(),
            python_path: DEFAULT_PYTHON.to_string(),
            typescript_server_path: DEFAULT_TYPESCRIPT_SERVER.to_string(),
            jdtls_path: DEFAULT_JDTLS.to_string(),
            jdtls_data_root: env::temp_dir().join("lsp-gateway").join("jdtls"),
        }
    }
}

/// Binary paths given on the command line
#[derive(Debug, Clone, Default)]
pub struct RecipeOverrides {
    pub clangd_path: Option<String>,
    pub python_path: Option<String>,
    pub typescript_server_path: Option<String>,
    pub jdtls_path: Option<String>,
}

impl RecipeConfig {
    /// Resolve each binary: command line, then environment, then default
    ///
    /// Environment variables: `CLANGD_PATH`, `PYLSP_PYTHON`,
    /// `TS_LANGUAGE_SERVER`, `JDTLS_PATH`.
    pub fn resolve(overrides: RecipeOverrides) -> Self {
        Self::resolve_with(overrides, |name| env::var(name).ok())
    }

    fn resolve_with(overrides: RecipeOverrides, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let pick = |cli: Option<String>, var: &str, default: &str| {
            cli.or_else(|| lookup(var))
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            clangd_path: pick(overrides.clangd_path, "CLANGD_PATH", DEFAULT_CLANGD),
            python_path: pick(overrides.python_path, "PYLSP_PYTHON", DEFAULT_PYTHON),
            typescript_server_path: pick(
                overrides.typescript_server_path,
                "TS_LANGUAGE_SERVER",
                DEFAULT_TYPESCRIPT_SERVER,
            ),
            jdtls_path: pick(overrides.jdtls_path, "JDTLS_PATH", DEFAULT_JDTLS),
            ..Self::default()
        }
    }
}

/// Maps a project key to the process that serves it
pub trait SpawnRecipe: Send + Sync {
    fn descriptor(&self, key: &ProjectKey) -> Option<ProcessDescriptor>;
}

impl<F> SpawnRecipe for F
where
    F: Fn(&ProjectKey) -> Option<ProcessDescriptor> + Send + Sync,
{
    fn descriptor(&self, key: &ProjectKey) -> Option<ProcessDescriptor> {
        self(key)
    }
}

pub fn clangd(config: &RecipeConfig, key: &ProjectKey) -> ProcessDescriptor {
    let mut descriptor = ProcessDescriptor::new(&config.clangd_path).arg("--log=verbose");
    if !key.output_directory().as_os_str().is_empty() {
        descriptor = descriptor.arg(format!(
            "--compile-commands-dir={}",
            key.output_directory().display()
        ));
    }
    descriptor
        .args([
            "--clang-tidy".to_string(),
            "--completion-style=bundled".to_string(),
            format!("--limit-results={CLANGD_RESULT_LIMIT}"),
        ])
        .working_dir(key.workspace())
}

pub fn pylsp(config: &RecipeConfig, key: &ProjectKey) -> ProcessDescriptor {
    ProcessDescriptor::new(&config.python_path)
        .args(["-m", "pylsp", "-v"])
        .working_dir(key.workspace())
}

pub fn typescript_language_server(config: &RecipeConfig, key: &ProjectKey) -> ProcessDescriptor {
    ProcessDescriptor::new(&config.typescript_server_path)
        .arg("--stdio")
        .working_dir(key.workspace())
}

pub fn jdtls(config: &RecipeConfig, key: &ProjectKey) -> ProcessDescriptor {
    ProcessDescriptor::new(&config.jdtls_path)
        .arg("-data")
        .arg(jdtls_data_dir(&config.jdtls_data_root, key.workspace()).display().to_string())
        .working_dir(key.workspace())
}

/// One jdtls workspace cache per project, named after the last path
/// component plus a short hash of the full path
fn jdtls_data_dir(root: &Path, workspace: &Path) -> PathBuf {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(workspace.as_os_str().as_encoded_bytes());
    let hash: String = digest.iter().take(6).map(|byte| format!("{byte:02x}")).collect();
    let name = workspace
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    root.join(format!("{name}-{hash}"))
}

/// Built-in recipes keyed by language family, plus registered extras
pub struct RecipeBook {
    config: RecipeConfig,
    custom: HashMap<String, Arc<dyn SpawnRecipe>>,
}

impl RecipeBook {
    pub fn new(config: RecipeConfig) -> Self {
        Self {
            config,
            custom: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RecipeConfig {
        &self.config
    }

    /// Register a recipe for `language`, taking precedence over built-ins
    pub fn register(&mut self, language: impl Into<String>, recipe: Arc<dyn SpawnRecipe>) {
        self.custom.insert(language.into().to_ascii_lowercase(), recipe);
    }
}

impl SpawnRecipe for RecipeBook {
    fn descriptor(&self, key: &ProjectKey) -> Option<ProcessDescriptor> {
        if let Some(recipe) = self.custom.get(&key.language().to_ascii_lowercase()) {
            return recipe.descriptor(key);
        }

        let descriptor = match LanguageFamily::from_language(key.language())? {
            LanguageFamily::Cxx => clangd(&self.config, key),
            LanguageFamily::Python => pylsp(&self.config, key),
            LanguageFamily::JavaScript => typescript_language_server(&self.config, key),
            LanguageFamily::Java => jdtls(&self.config, key),
        };
        Some(descriptor)
    }
}
