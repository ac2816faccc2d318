//! Prompt folder loader.
//!
//! Layout: `<dir>/<name>/skprompt.txt` plus an optional `<dir>/<name>/config.json`.
//! The folder is usually a read-only mount, so this module only ever reads from it.
//! Cached templates are re-read when a file's mtime or size changes.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, OnceLock},
    time::SystemTime,
};

use regex::Regex;
use serde::Deserialize;

use crate::{errors::Error, Result};

pub const TEMPLATE_FILE: &str = "skprompt.txt";
pub const CONFIG_FILE: &str = "config.json";

/// Completion settings from a prompt's `config.json`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub include_history: bool,
    pub include_input: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 500,
            temperature: 0.7,
            top_p: None,
            presence_penalty: None,
            frequency_penalty: None,
            include_history: true,
            include_input: true,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct PromptConfigFile {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    completion: CompletionConfig,
}

#[derive(Clone, Debug)]
pub struct PromptTemplate {
    pub name: String,
    pub description: Option<String>,
    pub text: String,
    pub completion: CompletionConfig,
}

impl PromptTemplate {
    /// Substitute `{{$name}}` placeholders. Unknown variables render empty.
    pub fn render(&self, vars: &HashMap<String, String>) -> String {
        placeholder_re()
            .replace_all(&self.text, |caps: &regex::Captures<'_>| {
                vars.get(&caps[1]).cloned().unwrap_or_default()
            })
            .trim()
            .to_string()
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*\$([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").expect("valid regex")
    })
}

/// Modification time and size of a prompt's files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Fingerprint {
    template: (Option<SystemTime>, u64),
    config: Option<(Option<SystemTime>, u64)>,
}

impl Fingerprint {
    fn of(folder: &Path) -> Option<Self> {
        let stamp = |path: PathBuf| {
            fs::metadata(path)
                .ok()
                .map(|m| (m.modified().ok(), m.len()))
        };
        Some(Self {
            template: stamp(folder.join(TEMPLATE_FILE))?,
            config: stamp(folder.join(CONFIG_FILE)),
        })
    }
}

type Cache = HashMap<String, (Fingerprint, Arc<PromptTemplate>)>;

pub struct PromptManager {
    dir: PathBuf,
    cache: Mutex<Cache>,
}

impl PromptManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load the prompt called `name`, reusing the cached copy while its files are unchanged.
    pub fn get(&self, name: &str) -> Result<Arc<PromptTemplate>> {
        validate_name(name)?;

        let fingerprint = Fingerprint::of(&self.dir.join(name));
        if let Some(fp) = fingerprint {
            if let Some((cached_fp, t)) = self.lock_cache().get(name) {
                if *cached_fp == fp {
                    return Ok(t.clone());
                }
            }
        }

        let loaded = Arc::new(self.load(name)?);
        if let Some(fp) = fingerprint {
            self.lock_cache()
                .insert(name.to_string(), (fp, loaded.clone()));
        }
        Ok(loaded)
    }

    /// Prompt folders that contain a template file, sorted.
    pub fn names(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            Error::Prompt(format!(
                "cannot read prompts folder {}: {e}",
                self.dir.display()
            ))
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.join(TEMPLATE_FILE).is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<PromptTemplate> {
        let folder = self.dir.join(name);
        let template_path = folder.join(TEMPLATE_FILE);
        let text = fs::read_to_string(&template_path).map_err(|e| {
            Error::Prompt(format!(
                "prompt {name:?} not found at {}: {e}",
                template_path.display()
            ))
        })?;

        let config_path = folder.join(CONFIG_FILE);
        let config = if config_path.is_file() {
            let raw = fs::read_to_string(&config_path)?;
            serde_json::from_str::<PromptConfigFile>(&raw).map_err(|e| {
                Error::Prompt(format!("invalid {}: {e}", config_path.display()))
            })?
        } else {
            PromptConfigFile::default()
        };

        tracing::debug!(prompt = name, path = %folder.display(), "loaded prompt");

        Ok(PromptTemplate {
            name: name.to_string(),
            description: config.description,
            text,
            completion: config.completion,
        })
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Cache> {
        // A poisoned cache only means a panic mid-insert; the map itself is still usable.
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if bad {
        return Err(Error::InvalidPath {
            path: PathBuf::from(name),
            reason: "prompt names must be a single folder name".to_string(),
        });
    }
    Ok(())
}
