use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::report::ReportLog;
use crate::scan::PageEdit;
use crate::wikitext::{EditOp, Node, Template, Wikicode};

pub const PACKAGE_REPORT_PREFIX: &str = "update-pkgs";
pub const PACKAGE_EDIT_SUMMARY: &str = "update Pkg/AUR templates";
pub const BROKEN_PACKAGE_TEMPLATE: &str = "Broken package link";
pub const DEFAULT_AUR_PACKAGES_URL: &str = "https://aur.archlinux.org/packages.gz";

const PACKAGE_TEMPLATES: [&str; 4] = ["Pkg", "AUR", "Aur", "Grp"];

/// Lookup surface for package classification. `update_page` only needs
/// membership answers, so reports can be tested without any synced data.
pub trait PackageIndex {
    fn find_package(&self, name: &str) -> bool;
    fn find_group(&self, name: &str) -> bool;
    fn find_aur(&self, name: &str) -> bool;
    /// Name of the package whose `replaces` list contains `name`.
    fn find_replacement(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct PackageSyncOptions {
    /// Official repository inventories, each a local path or an HTTP(S) URL
    /// pointing at a JSON array of package records.
    pub inventories: Vec<String>,
    /// Plain-text AUR package listing, one name per line.
    pub aur_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl Default for PackageSyncOptions {
    fn default() -> Self {
        Self {
            inventories: Vec::new(),
            aur_url: DEFAULT_AUR_PACKAGES_URL.to_string(),
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PackageRecord {
    name: String,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    replaces: Vec<String>,
}

/// Package data pulled from repository inventories and the AUR listing,
/// held as sorted name lists for binary-search membership tests.
#[derive(Debug, Default)]
pub struct SyncedPackageIndex {
    packages: Vec<String>,
    groups: Vec<String>,
    aur: Vec<String>,
    replacements: BTreeMap<String, String>,
}

impl SyncedPackageIndex {
    pub fn sync(options: &PackageSyncOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .build()
            .context("failed to build package sync HTTP client")?;

        let mut inventories = Vec::with_capacity(options.inventories.len());
        for source in &options.inventories {
            log::info!("syncing package inventory from {source}");
            inventories.push(fetch_source(&client, &options.user_agent, source)?);
        }
        log::info!("syncing AUR package list from {}", options.aur_url);
        let listing = fetch_source(&client, &options.user_agent, &options.aur_url)?;

        Self::from_payloads(&inventories, &listing)
    }

    fn from_payloads(inventories: &[String], aur_listing: &str) -> Result<Self> {
        let mut index = Self::default();
        for payload in inventories {
            let records: Vec<PackageRecord> =
                serde_json::from_str(payload).context("invalid package inventory JSON")?;
            for record in records {
                for group in &record.groups {
                    index.groups.push(group.clone());
                }
                for replaced in &record.replaces {
                    index
                        .replacements
                        .entry(replaced.clone())
                        .or_insert_with(|| record.name.clone());
                }
                index.packages.push(record.name);
            }
        }
        index.aur = aur_listing
            .lines()
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ToString::to_string)
            .collect();
        index.packages.sort_unstable();
        index.packages.dedup();
        index.groups.sort_unstable();
        index.groups.dedup();
        index.aur.sort_unstable();
        Ok(index)
    }
}

impl PackageIndex for SyncedPackageIndex {
    fn find_package(&self, name: &str) -> bool {
        self.packages
            .binary_search_by(|probe| probe.as_str().cmp(name))
            .is_ok()
    }

    fn find_group(&self, name: &str) -> bool {
        self.groups
            .binary_search_by(|probe| probe.as_str().cmp(name))
            .is_ok()
    }

    fn find_aur(&self, name: &str) -> bool {
        self.aur
            .binary_search_by(|probe| probe.as_str().cmp(name))
            .is_ok()
    }

    fn find_replacement(&self, name: &str) -> Option<String> {
        self.replacements.get(name).cloned()
    }
}

fn fetch_source(client: &Client, user_agent: &str, source: &str) -> Result<String> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let response = client
            .get(source)
            .header("User-Agent", user_agent)
            .send()
            .with_context(|| format!("failed to fetch {source}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("fetch of {source} failed with HTTP {status}");
        }
        response
            .text()
            .with_context(|| format!("failed to read {source}"))
    } else {
        fs::read_to_string(source).with_context(|| format!("failed to read {source}"))
    }
}

/// Reclassifies every package reference on a page against the index and keeps
/// the `{{Broken package link}}` flags in step with the outcome. Returns the
/// updated page text, or None when the page needs no edit.
pub fn update_page<I: PackageIndex>(
    index: &I,
    title: &str,
    text: &str,
    report: &mut ReportLog,
) -> Option<String> {
    let mut code = Wikicode::parse(text);
    let mut ops = Vec::new();

    for template_index in code.template_indices() {
        let Some(template) = code.get(template_index).and_then(Node::as_template) else {
            continue;
        };
        if !PACKAGE_TEMPLATES
            .iter()
            .any(|name| template.name_matches(name))
        {
            continue;
        }

        // Pkg, AUR and Grp all take exactly one parameter.
        let mut hint = (template.params.len() != 1)
            .then(|| "invalid number of template parameters".to_string());
        // Spacing inside the reference is preserved on the wiki; the lookup
        // key is lowercased and trimmed.
        let pkgname = template.get("1").map(str::to_lowercase);
        let mut updated = template.clone();

        if let Some(pkgname) = pkgname.as_deref() {
            let retagged = if index.find_package(pkgname) {
                Some("Pkg")
            } else if index.find_aur(pkgname) {
                Some("AUR")
            } else if index.find_group(pkgname) {
                Some("Grp")
            } else {
                hint = Some(match index.find_replacement(pkgname) {
                    Some(replacement) => format!("replaced by {{{{Pkg|{replacement}}}}}"),
                    None => "package not found".to_string(),
                });
                None
            };
            // Keep the author's capitalization when only the case differs
            // ({{Aur}} and {{pkg}} are left alone).
            if let Some(retagged) = retagged
                && !updated.name.trim().eq_ignore_ascii_case(retagged)
            {
                updated.set_name(retagged);
            }
        }

        let adjacent_flag = code.adjacent_index(template_index).filter(|&flag_index| {
            code.get(flag_index)
                .and_then(Node::as_template)
                .is_some_and(|candidate| candidate.name_matches(BROKEN_PACKAGE_TEMPLATE))
        });

        match hint {
            Some(hint) => {
                log::warn!(
                    "package '{}' on [[{title}]]: {hint}",
                    pkgname.as_deref().unwrap_or_default()
                );
                report.add(title, format!("<nowiki>{}</nowiki> ({hint})", updated.render()));
                let mut flag = Template::new(BROKEN_PACKAGE_TEMPLATE);
                flag.set("1", &hint);
                match adjacent_flag {
                    // Replace the existing flag, its hint may be stale.
                    Some(flag_index) => {
                        if updated != *template {
                            ops.push(EditOp::Replace {
                                index: template_index,
                                nodes: vec![Node::Template(updated)],
                            });
                        }
                        ops.push(EditOp::Replace {
                            index: flag_index,
                            nodes: vec![Node::Template(flag)],
                        });
                    }
                    None => {
                        ops.push(EditOp::Replace {
                            index: template_index,
                            nodes: vec![Node::Template(updated), Node::Template(flag)],
                        });
                    }
                }
            }
            None => {
                if updated != *template {
                    ops.push(EditOp::Replace {
                        index: template_index,
                        nodes: vec![Node::Template(updated)],
                    });
                }
                // The package is available again, drop the stale flag.
                if let Some(flag_index) = adjacent_flag {
                    ops.push(EditOp::Remove { index: flag_index });
                }
            }
        }
    }

    if ops.is_empty() {
        return None;
    }
    code.apply(ops);
    let updated = code.render();
    if updated == text { None } else { Some(updated) }
}

/// Run `update_page` over a batch of already-read pages. Page text is taken
/// from memory, so the report accumulates without any fallible step between
/// pages and the caller can always flush it.
pub fn update_pages<I: PackageIndex>(
    index: &I,
    pages: &[(String, String)],
    report: &mut ReportLog,
) -> Vec<PageEdit> {
    let mut edits = Vec::new();
    for (title, text) in pages {
        log::info!("updating package templates on [[{title}]]");
        if let Some(updated) = update_page(index, title, text, report) {
            edits.push(PageEdit {
                title: title.clone(),
                original: text.clone(),
                updated,
            });
        }
    }
    edits
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{
        PackageIndex, PackageSyncOptions, SyncedPackageIndex, update_page, update_pages,
    };
    use crate::report::ReportLog;

    struct StubIndex {
        packages: Vec<&'static str>,
        groups: Vec<&'static str>,
        aur: Vec<&'static str>,
        replacements: Vec<(&'static str, &'static str)>,
    }

    impl StubIndex {
        fn new() -> Self {
            Self {
                packages: vec!["vim", "linux"],
                groups: vec!["gnome"],
                aur: vec!["yay"],
                replacements: vec![("netcfg", "netctl")],
            }
        }
    }

    impl PackageIndex for StubIndex {
        fn find_package(&self, name: &str) -> bool {
            self.packages.contains(&name)
        }

        fn find_group(&self, name: &str) -> bool {
            self.groups.contains(&name)
        }

        fn find_aur(&self, name: &str) -> bool {
            self.aur.contains(&name)
        }

        fn find_replacement(&self, name: &str) -> Option<String> {
            self.replacements
                .iter()
                .find(|(replaced, _)| *replaced == name)
                .map(|(_, replacement)| (*replacement).to_string())
        }
    }

    #[test]
    fn known_package_needs_no_edit() {
        let mut report = ReportLog::default();
        let updated = update_page(
            &StubIndex::new(),
            "Vim",
            "Install {{Pkg|vim}} first.\n",
            &mut report,
        );
        assert_eq!(updated, None);
        assert!(report.is_empty());
    }

    #[test]
    fn aur_package_is_retagged() {
        let mut report = ReportLog::default();
        let updated = update_page(
            &StubIndex::new(),
            "Helpers",
            "Install {{Pkg|yay}} from the AUR.\n",
            &mut report,
        );
        assert_eq!(
            updated.as_deref(),
            Some("Install {{AUR|yay}} from the AUR.\n")
        );
        assert!(report.is_empty());
    }

    #[test]
    fn group_reference_is_retagged() {
        let mut report = ReportLog::default();
        let updated = update_page(
            &StubIndex::new(),
            "Desktop",
            "{{AUR|gnome}} pulls in the whole desktop.\n",
            &mut report,
        );
        assert_eq!(
            updated.as_deref(),
            Some("{{Grp|gnome}} pulls in the whole desktop.\n")
        );
    }

    #[test]
    fn matching_tag_keeps_author_capitalization() {
        let mut report = ReportLog::default();
        let updated = update_page(
            &StubIndex::new(),
            "Vim",
            "Install {{pkg|vim}} first.\n",
            &mut report,
        );
        assert_eq!(updated, None);
    }

    #[test]
    fn aur_tag_spelling_variant_is_left_alone() {
        let mut report = ReportLog::default();
        let updated = update_page(
            &StubIndex::new(),
            "Helpers",
            "Install {{Aur|yay}} from the AUR.\n",
            &mut report,
        );
        assert_eq!(updated, None);
        assert!(report.is_empty());
    }

    #[test]
    fn missing_package_is_flagged_and_reported() {
        let mut report = ReportLog::default();
        let updated = update_page(
            &StubIndex::new(),
            "Git hosting",
            "Install {{Pkg|gitosis}} now.\n",
            &mut report,
        );
        assert_eq!(
            updated.as_deref(),
            Some("Install {{Pkg|gitosis}}{{Broken package link|package not found}} now.\n")
        );
        assert_eq!(
            report.to_wikitext(),
            "\n== English ==\n\n* [[Git hosting]]\n** <nowiki>{{Pkg|gitosis}}</nowiki> (package not found)\n"
        );
    }

    #[test]
    fn replaced_package_hint_names_the_successor() {
        let mut report = ReportLog::default();
        let updated = update_page(
            &StubIndex::new(),
            "Network configuration",
            "Use {{Pkg|netcfg}} profiles.\n",
            &mut report,
        );
        assert_eq!(
            updated.as_deref(),
            Some(
                "Use {{Pkg|netcfg}}{{Broken package link|replaced by {{Pkg|netctl}}}} profiles.\n"
            )
        );
        assert_eq!(
            report.to_wikitext(),
            "\n== English ==\n\n* [[Network configuration]]\n** <nowiki>{{Pkg|netcfg}}</nowiki> (replaced by {{Pkg|netctl}})\n"
        );
    }

    #[test]
    fn stale_flag_is_dropped_when_package_returns() {
        let mut report = ReportLog::default();
        let updated = update_page(
            &StubIndex::new(),
            "Vim",
            "{{Pkg|vim}}{{Broken package link|package not found}} is back.\n",
            &mut report,
        );
        assert_eq!(updated.as_deref(), Some("{{Pkg|vim}} is back.\n"));
        assert!(report.is_empty());
    }

    #[test]
    fn existing_flag_hint_is_refreshed() {
        let mut report = ReportLog::default();
        let updated = update_page(
            &StubIndex::new(),
            "Network configuration",
            "{{Pkg|netcfg}} {{Broken package link|package not found}}\n",
            &mut report,
        );
        assert_eq!(
            updated.as_deref(),
            Some("{{Pkg|netcfg}} {{Broken package link|replaced by {{Pkg|netctl}}}}\n")
        );
    }

    #[test]
    fn extra_parameters_are_reported_without_retag() {
        let mut report = ReportLog::default();
        let updated = update_page(
            &StubIndex::new(),
            "Vim",
            "{{Pkg|vim|extra}}\n",
            &mut report,
        );
        assert_eq!(
            updated.as_deref(),
            Some("{{Pkg|vim|extra}}{{Broken package link|invalid number of template parameters}}\n")
        );
        assert_eq!(
            report.to_wikitext(),
            "\n== English ==\n\n* [[Vim]]\n** <nowiki>{{Pkg|vim|extra}}</nowiki> (invalid number of template parameters)\n"
        );
    }

    #[test]
    fn unrelated_templates_are_ignored() {
        let mut report = ReportLog::default();
        let updated = update_page(
            &StubIndex::new(),
            "Vim",
            "{{Note|not a package reference}} {{Dead link|2020|01|01}}\n",
            &mut report,
        );
        assert_eq!(updated, None);
        assert!(report.is_empty());
    }

    #[test]
    fn one_page_can_collect_several_findings() {
        let mut report = ReportLog::default();
        let updated = update_page(
            &StubIndex::new(),
            "Installation guide (Čeština)",
            "{{Pkg|yay}} and {{Pkg|gone}} and {{Grp|gnome}}\n",
            &mut report,
        );
        assert_eq!(
            updated.as_deref(),
            Some("{{AUR|yay}} and {{Pkg|gone}}{{Broken package link|package not found}} and {{Grp|gnome}}\n")
        );
        assert_eq!(
            report.to_wikitext(),
            "\n== Čeština ==\n\n* [[Installation guide (Čeština)]]\n** <nowiki>{{Pkg|gone}}</nowiki> (package not found)\n"
        );
    }

    #[test]
    fn batch_keeps_earlier_findings_across_pages() {
        let pages = vec![
            (
                "Git hosting".to_string(),
                "Install {{Pkg|gitosis}} now.\n".to_string(),
            ),
            ("Vim".to_string(), "Install {{Pkg|vim}} first.\n".to_string()),
            (
                "Helpers".to_string(),
                "Install {{Pkg|yay}} from the AUR.\n".to_string(),
            ),
        ];
        let mut report = ReportLog::default();
        let edits = update_pages(&StubIndex::new(), &pages, &mut report);

        let titles = edits.iter().map(|edit| edit.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Git hosting", "Helpers"]);
        assert_eq!(edits[0].original, pages[0].1);
        assert!(
            report
                .to_wikitext()
                .contains("<nowiki>{{Pkg|gitosis}}</nowiki> (package not found)")
        );
    }

    #[test]
    fn payloads_build_a_searchable_index() {
        let inventory = r#"[
            {"name": "netctl", "groups": ["base"], "replaces": ["netcfg"]},
            {"name": "vim", "groups": []}
        ]"#;
        let listing = "# AUR package list\nyay\nparu\n";
        let index =
            SyncedPackageIndex::from_payloads(&[inventory.to_string()], listing).expect("index");

        assert!(index.find_package("vim"));
        assert!(index.find_package("netctl"));
        assert!(!index.find_package("yay"));
        assert!(index.find_group("base"));
        assert!(index.find_aur("paru"));
        assert!(!index.find_aur("# AUR package list"));
        assert_eq!(index.find_replacement("netcfg").as_deref(), Some("netctl"));
        assert_eq!(index.find_replacement("vim"), None);
    }

    #[test]
    fn sync_reads_local_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let inventory_path = dir.path().join("core.json");
        let listing_path = dir.path().join("aur.txt");
        fs::write(&inventory_path, r#"[{"name": "linux"}]"#).expect("write inventory");
        fs::write(&listing_path, "yay\n").expect("write listing");

        let index = SyncedPackageIndex::sync(&PackageSyncOptions {
            inventories: vec![inventory_path.display().to_string()],
            aur_url: listing_path.display().to_string(),
            ..PackageSyncOptions::default()
        })
        .expect("sync");

        assert!(index.find_package("linux"));
        assert!(index.find_aur("yay"));
        assert!(!index.find_group("base"));
    }
}
