use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, CliError, InitArgs};
use crate::core::conflict::MarkerSet;
use crate::llm::Backend;

/// File names tried (in order) when no `--config` is given.
pub const CONFIG_FILES: [&str; 3] = ["mendmerge.toml", ".mendmerge.toml", "mendmerge.json"];

/// Explicit engine and adapter configuration, passed into every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Context lines kept around each conflict for re-anchoring
    pub margin: usize,

    /// Coalesce regions whose margin windows touch
    pub merge_overlaps: bool,

    /// Retry budget for model queries and file-level passes
    pub retry_budget: usize,

    /// Let a diff line overwrite a mismatching target line when the next lines agree
    pub prioritize_diff: bool,

    /// Accept `+`/`-` lines before any context line has matched
    pub loose_apply: bool,

    /// Extra ignore globs for directory scans (in addition to .gitignore)
    pub ignore_patterns: Vec<String>,

    /// Conflict marker prefixes
    pub markers: MarkerSet,

    /// Model backend settings
    pub model: ModelConfig,

    /// Review server settings
    pub review: ReviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig
{
    pub backend: Backend,
    /// Prompt JSON overriding the built-in prompts
    pub prompt_file: Option<PathBuf>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub azure: AzureConfig,
    pub anthropic: AnthropicConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig
{
    /// Falls back to AZURE_OPENAI_ENDPOINT
    pub endpoint: Option<String>,
    /// Falls back to AZURE_OPENAI_DEPLOYMENT_NAME
    pub deployment: Option<String>,
    pub api_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig
{
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig
{
    pub host: String,
    pub branch: String,
    /// `|`-separated status list, e.g. "merged|open"
    pub status: String,
    pub since: String,
    pub download_dir: PathBuf,
}

impl Default for Config
{
    fn default() -> Self
    {
        Self {
            margin: 10,
            merge_overlaps: false,
            retry_budget: 3,
            prioritize_diff: false,
            loose_apply: false,
            ignore_patterns: vec![
                "target/**".to_string(),
                "node_modules/**".to_string(),
                ".git/**".to_string(),
            ],
            markers: MarkerSet::default(),
            model: ModelConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

impl Default for ModelConfig
{
    fn default() -> Self
    {
        Self {
            backend: Backend::Azure,
            prompt_file: None,
            timeout_secs: 300,
            max_tokens: 8192,
            azure: AzureConfig::default(),
            anthropic: AnthropicConfig::default(),
        }
    }
}

impl Default for AzureConfig
{
    fn default() -> Self
    {
        Self { endpoint: None, deployment: None, api_version: "2024-02-01".to_string() }
    }
}

impl Default for AnthropicConfig
{
    fn default() -> Self
    {
        Self {
            model: "claude-3-5-sonnet-latest".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }
}

impl Default for ReviewConfig
{
    fn default() -> Self
    {
        Self {
            host: "gerrit-ssh".to_string(),
            branch: "main".to_string(),
            status: "merged|open".to_string(),
            since: "1 week ago".to_string(),
            download_dir: PathBuf::from("."),
        }
    }
}

/// Load configuration: explicit file or first file found, then `MENDMERGE_*` env.
pub fn load_config(explicit: Option<&Path>) -> Result<Config>
{
    let mut builder = config::Config::builder();

    match explicit
    {
        Some(path) =>
        {
            if !path.exists()
            {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            builder = builder.add_source(config::File::from(path));
        }
        None =>
        {
            for path in &CONFIG_FILES
            {
                if Path::new(path).exists()
                {
                    builder = builder.add_source(config::File::with_name(path));
                    break;
                }
            }
        }
    }

    // MENDMERGE_MARGIN=5, MENDMERGE_MODEL__BACKEND=anthropic
    builder = builder.add_source(
        config::Environment::with_prefix("MENDMERGE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    tracing::debug!(
        margin = parsed.margin,
        retry_budget = parsed.retry_budget,
        "configuration loaded"
    );
    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join(CONFIG_FILES[0]);

    if config_path.exists() && !args.force
    {
        return Err(CliError::InvalidInput(format!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        ))
        .into());
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    if ctx.dry_run
    {
        println!("{toml_string}");
        return Ok(());
    }

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_toml()
    {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.margin, 10);
        assert_eq!(back.retry_budget, 3);
        assert_eq!(back.markers, MarkerSet::default());
        assert_eq!(back.review.host, "gerrit-ssh");
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("custom.toml");
        std::fs::write(&path, "margin = 4\n[model]\nbackend = \"anthropic\"\n").unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.margin, 4);
        assert_eq!(cfg.model.backend, Backend::Anthropic);
        assert_eq!(cfg.retry_budget, 3);
        assert_eq!(cfg.model.azure.api_version, "2024-02-01");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error()
    {
        assert!(load_config(Some(Path::new("/nope/mendmerge.toml"))).is_err());
    }
}
