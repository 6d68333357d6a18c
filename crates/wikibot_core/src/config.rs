use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::packages::DEFAULT_AUR_PACKAGES_URL;
use crate::scan::DEFAULT_JOBS;
use crate::status::{DEFAULT_BROWSER_USER_AGENT, DEFAULT_TIMEOUT_MS};

pub const DEFAULT_USER_AGENT: &str = "wikibot/0.2";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotConfig {
    #[serde(default)]
    pub bot: BotSection,
    #[serde(default)]
    pub check: CheckSection,
    #[serde(default)]
    pub packages: PackagesSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotSection {
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CheckSection {
    pub timeout_ms: Option<u64>,
    pub jobs: Option<usize>,
    pub browser_user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PackagesSection {
    pub aur_url: Option<String>,
    #[serde(default)]
    pub inventories: Vec<String>,
}

impl BotConfig {
    /// Resolve the bot user agent: env WIKIBOT_USER_AGENT > config > default.
    pub fn user_agent(&self) -> String {
        self.user_agent_with_lookup(env_lookup)
    }

    fn user_agent_with_lookup<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        resolve_string(
            lookup("WIKIBOT_USER_AGENT"),
            self.bot.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT),
        )
    }

    /// Resolve the per-request timeout: env WIKIBOT_TIMEOUT_MS > config > default.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms_with_lookup(env_lookup)
    }

    fn timeout_ms_with_lookup<F>(&self, lookup: F) -> u64
    where
        F: Fn(&str) -> Option<String>,
    {
        resolve_u64(
            lookup("WIKIBOT_TIMEOUT_MS"),
            self.check.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        )
    }

    /// Resolve the link check worker count: env WIKIBOT_JOBS > config > default.
    pub fn jobs(&self) -> usize {
        self.jobs_with_lookup(env_lookup)
    }

    fn jobs_with_lookup<F>(&self, lookup: F) -> usize
    where
        F: Fn(&str) -> Option<String>,
    {
        resolve_usize(lookup("WIKIBOT_JOBS"), self.check.jobs.unwrap_or(DEFAULT_JOBS))
    }

    /// Resolve the browser user agent sent with link probes.
    pub fn browser_user_agent(&self) -> String {
        self.browser_user_agent_with_lookup(env_lookup)
    }

    fn browser_user_agent_with_lookup<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        resolve_string(
            lookup("WIKIBOT_BROWSER_USER_AGENT"),
            self.check
                .browser_user_agent
                .as_deref()
                .unwrap_or(DEFAULT_BROWSER_USER_AGENT),
        )
    }

    /// Resolve the AUR package listing source: env WIKIBOT_AUR_URL > config > default.
    pub fn aur_url(&self) -> String {
        self.aur_url_with_lookup(env_lookup)
    }

    fn aur_url_with_lookup<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        resolve_string(
            lookup("WIKIBOT_AUR_URL"),
            self.packages
                .aur_url
                .as_deref()
                .unwrap_or(DEFAULT_AUR_PACKAGES_URL),
        )
    }

    pub fn inventories(&self) -> Vec<String> {
        self.packages.inventories.clone()
    }
}

/// Load a BotConfig from a TOML file. Returns defaults if the file is missing.
pub fn load_config(config_path: &Path) -> Result<BotConfig> {
    if !config_path.exists() {
        return Ok(BotConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BotConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn resolve_string(env: Option<String>, default: &str) -> String {
    match env {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

fn resolve_u64(env: Option<String>, default: u64) -> u64 {
    env.and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn resolve_usize(env: Option<String>, default: usize) -> usize {
    env.and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_uses_built_in_values() {
        let config = BotConfig::default();
        assert_eq!(config.user_agent(), DEFAULT_USER_AGENT);
        assert_eq!(config.timeout_ms(), DEFAULT_TIMEOUT_MS);
        assert_eq!(config.jobs(), DEFAULT_JOBS);
        assert_eq!(config.browser_user_agent(), DEFAULT_BROWSER_USER_AGENT);
        assert_eq!(config.aur_url(), DEFAULT_AUR_PACKAGES_URL);
        assert!(config.inventories().is_empty());
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/wikibot.toml")).expect("load config");
        assert_eq!(config, BotConfig::default());
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("wikibot.toml");
        fs::write(
            &config_path,
            r#"
[bot]
user_agent = "test-bot/1.0"

[check]
timeout_ms = 5000
jobs = 8
browser_user_agent = "probe-agent"

[packages]
aur_url = "https://mirror.example.org/packages.gz"
inventories = ["data/core.json", "https://mirror.example.org/extra.json"]
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.user_agent(), "test-bot/1.0");
        assert_eq!(config.timeout_ms(), 5000);
        assert_eq!(config.jobs(), 8);
        assert_eq!(config.browser_user_agent(), "probe-agent");
        assert_eq!(config.aur_url(), "https://mirror.example.org/packages.gz");
        assert_eq!(
            config.inventories(),
            vec![
                "data/core.json".to_string(),
                "https://mirror.example.org/extra.json".to_string()
            ]
        );
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("wikibot.toml");
        fs::write(&config_path, "[check]\njobs = 2\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.jobs(), 2);
        assert_eq!(config.timeout_ms(), DEFAULT_TIMEOUT_MS);
        assert_eq!(config.user_agent(), DEFAULT_USER_AGENT);
    }

    #[test]
    fn env_overrides_win_over_config_and_defaults() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("wikibot.toml");
        fs::write(
            &config_path,
            "[bot]\nuser_agent = \"file-bot/1.0\"\n\n[check]\ntimeout_ms = 5000\njobs = 8\n",
        )
        .expect("write config");
        let config = load_config(&config_path).expect("load config");

        let env = std::collections::HashMap::from([
            ("WIKIBOT_USER_AGENT".to_string(), "env-bot/2.0".to_string()),
            ("WIKIBOT_TIMEOUT_MS".to_string(), "250".to_string()),
            ("WIKIBOT_JOBS".to_string(), "12".to_string()),
            (
                "WIKIBOT_AUR_URL".to_string(),
                "https://env.example.org/packages.gz".to_string(),
            ),
        ]);
        let lookup = |key: &str| env.get(key).cloned();

        assert_eq!(config.user_agent_with_lookup(lookup), "env-bot/2.0");
        assert_eq!(config.timeout_ms_with_lookup(lookup), 250);
        assert_eq!(config.jobs_with_lookup(lookup), 12);
        assert_eq!(
            config.aur_url_with_lookup(lookup),
            "https://env.example.org/packages.gz"
        );
        // Unset keys fall through: config value, then built-in default.
        assert_eq!(config.user_agent_with_lookup(|_| None), "file-bot/1.0");
        assert_eq!(config.timeout_ms_with_lookup(|_| None), 5000);
        assert_eq!(
            config.browser_user_agent_with_lookup(lookup),
            DEFAULT_BROWSER_USER_AGENT
        );
    }

    #[test]
    fn blank_and_malformed_env_values_are_ignored() {
        let config = BotConfig::default();
        assert_eq!(
            config.user_agent_with_lookup(|_| Some("  ".to_string())),
            DEFAULT_USER_AGENT
        );
        assert_eq!(
            config.timeout_ms_with_lookup(|_| Some("soon".to_string())),
            DEFAULT_TIMEOUT_MS
        );
        assert_eq!(
            config.jobs_with_lookup(|_| Some("-3".to_string())),
            DEFAULT_JOBS
        );
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("wikibot.toml");
        fs::write(&config_path, "[check\njobs = 2").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }
}
