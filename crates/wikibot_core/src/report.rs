use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::annotate::RunDate;
use crate::lang::detect_language;

/// Per-run log of issues needing human attention, keyed by page language and
/// title. Serialized sorted, so consecutive runs diff cleanly.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ReportLog {
    entries: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportPaths {
    pub mediawiki: PathBuf,
    pub json: PathBuf,
}

impl ReportLog {
    pub fn add(&mut self, title: &str, line: impl Into<String>) {
        let (_, language) = detect_language(title);
        self.entries
            .entry(language.to_string())
            .or_default()
            .entry(title.to_string())
            .or_default()
            .push(line.into());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_wikitext(&self) -> String {
        let mut output = String::new();
        for (language, pages) in &self.entries {
            output.push_str(&format!("\n== {language} ==\n\n"));
            for (title, lines) in pages {
                output.push_str(&format!("* [[{title}]]\n"));
                for line in lines {
                    output.push_str(&format!("** {line}\n"));
                }
            }
        }
        output
    }

    pub fn save(&self, directory: &Path, prefix: &str, date: &RunDate) -> Result<ReportPaths> {
        fs::create_dir_all(directory)
            .with_context(|| format!("failed to create report directory {}", directory.display()))?;
        let basename = format!(
            "{prefix}-{:04}-{:02}-{:02}.report",
            date.year, date.month, date.day
        );
        let paths = ReportPaths {
            mediawiki: directory.join(format!("{basename}.mediawiki")),
            json: directory.join(format!("{basename}.json")),
        };

        fs::write(&paths.mediawiki, self.to_wikitext())
            .with_context(|| format!("failed to write {}", paths.mediawiki.display()))?;
        let payload =
            serde_json::to_string_pretty(&self.entries).context("failed to serialize report")?;
        fs::write(&paths.json, payload)
            .with_context(|| format!("failed to write {}", paths.json.display()))?;
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::{ReportLog, RunDate};

    #[test]
    fn lines_are_grouped_by_language_and_title() {
        let mut log = ReportLog::default();
        log.add("Zsh", "https://gone.example.org/a (404)");
        log.add("Vim (Español)", "https://gone.example.org/b (SSL error)");
        log.add("Zsh", "https://gone.example.org/c (404)");

        assert_eq!(
            log.to_wikitext(),
            "\n== English ==\n\n\
             * [[Zsh]]\n\
             ** https://gone.example.org/a (404)\n\
             ** https://gone.example.org/c (404)\n\
             \n== Español ==\n\n\
             * [[Vim (Español)]]\n\
             ** https://gone.example.org/b (SSL error)\n"
        );
    }

    #[test]
    fn empty_log_renders_nothing() {
        let log = ReportLog::default();
        assert!(log.is_empty());
        assert_eq!(log.to_wikitext(), "");
    }

    #[test]
    fn save_writes_dated_file_pair() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut log = ReportLog::default();
        log.add("Zsh", "https://gone.example.org/a (404)");

        let date = RunDate {
            year: 2024,
            month: 5,
            day: 6,
        };
        let paths = log
            .save(&dir.path().join("reports"), "check-links", &date)
            .expect("save");
        assert!(
            paths
                .mediawiki
                .ends_with("reports/check-links-2024-05-06.report.mediawiki")
        );
        assert!(paths.json.ends_with("reports/check-links-2024-05-06.report.json"));

        let narrative = std::fs::read_to_string(&paths.mediawiki).expect("read");
        assert!(narrative.contains("== English =="));
        let structured: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.json).expect("read"))
                .expect("json");
        assert_eq!(
            structured["English"]["Zsh"][0],
            "https://gone.example.org/a (404)"
        );
    }
}
