/// Beneficiary address resolution.
///
/// Priority: `--email` flag, then the environment / config file, then the
/// persisted settings file, then an interactive prompt. A prompted answer is
/// saved so the next run does not ask again.
use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Addresses on this domain are template placeholders, not real recipients.
const PLACEHOLDER_DOMAIN: &str = "example.com";

/// Values remembered between runs.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedSettings {
    #[serde(default)]
    pub beneficiary: Option<String>,
}

/// JSON file holding [`PersistedSettings`].
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `.watchtower/settings.json` under the working directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from(".watchtower").join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved settings. Missing or unreadable files yield the defaults.
    pub fn load(&self) -> PersistedSettings {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("failed to parse {}: {e}", self.path.display());
                PersistedSettings::default()
            }),
            Err(_) => PersistedSettings::default(),
        }
    }

    /// Remember `beneficiary`, keeping any other saved values.
    pub fn save_beneficiary(&self, beneficiary: &str) -> std::io::Result<()> {
        let mut settings = self.load();
        settings.beneficiary = Some(beneficiary.to_string());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&self.path, json)
    }
}

/// Trimmed, non-empty, non-placeholder value, if any.
fn usable(value: Option<&str>) -> Option<String> {
    let v = value?.trim();
    if v.is_empty() || v.contains(PLACEHOLDER_DOMAIN) {
        return None;
    }
    Some(v.to_string())
}

/// Resolve the beneficiary, prompting on `input`/`output` as a last resort.
pub fn resolve<R, W>(
    flag: Option<&str>,
    configured: Option<&str>,
    store: &SettingsStore,
    mut input: R,
    mut output: W,
) -> Result<String, ConfigError>
where
    R: BufRead,
    W: Write,
{
    if let Some(v) = usable(flag) {
        return Ok(v);
    }
    if let Some(v) = usable(configured) {
        return Ok(v);
    }
    if let Some(v) = usable(store.load().beneficiary.as_deref()) {
        tracing::debug!(path = %store.path().display(), "using saved beneficiary");
        return Ok(v);
    }

    let answer = prompt(&mut input, &mut output).map_err(|e| ConfigError::InvalidValue {
        name: "BENEFICIARY_EMAIL",
        value: String::new(),
        reason: format!("failed to read from terminal: {e}"),
    })?;
    let Some(beneficiary) = usable(Some(&answer)) else {
        return Err(ConfigError::Missing {
            names: vec!["BENEFICIARY_EMAIL"],
        });
    };

    match store.save_beneficiary(&beneficiary) {
        Ok(()) => tracing::info!(path = %store.path().display(), "saved beneficiary email"),
        Err(e) => tracing::warn!(
            error = %e,
            path = %store.path().display(),
            "could not save beneficiary email"
        ),
    }
    Ok(beneficiary)
}

fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> std::io::Result<String> {
    writeln!(
        output,
        "Beneficiary email not found in arguments, environment, config, or saved settings."
    )?;
    write!(output, "Please enter the beneficiary email: ")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}
