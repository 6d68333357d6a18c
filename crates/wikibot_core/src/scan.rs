use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use serde::Serialize;

use crate::annotate::{LinkSite, RunDate, annotate_link};
use crate::lang::detect_language;
use crate::normalize::{CanonicalUrl, normalize, split_overrun};
use crate::report::ReportLog;
use crate::status::{LinkChecker, StatusProbe, Verdict};
use crate::wikitext::{Node, Wikicode};

pub const DEFAULT_JOBS: usize = 4;
pub const LINK_REPORT_PREFIX: &str = "check-links";
pub const LINK_EDIT_SUMMARY: &str = "update status of external links";

/// Cooperative stop signal. Consulted between pages and between checks;
/// nothing from a cancelled page is recorded.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageEdit {
    pub title: String,
    pub original: String,
    pub updated: String,
}

impl PageEdit {
    pub fn unified_diff(&self) -> String {
        let diff = similar::TextDiff::from_lines(self.original.as_str(), self.updated.as_str());
        diff.unified_diff()
            .context_radius(3)
            .header(&format!("a/{}", self.title), &format!("b/{}", self.title))
            .to_string()
    }
}

/// One link check run: owns the checker (verdict cache inside), the report
/// log, and the run date every written marker shares.
pub struct LinkCheckRun<P> {
    checker: LinkChecker<P>,
    report: ReportLog,
    date: RunDate,
    cancel: CancelFlag,
    jobs: usize,
}

impl<P: StatusProbe + Sync> LinkCheckRun<P> {
    pub fn new(probe: P, jobs: usize, cancel: CancelFlag) -> Self {
        Self {
            checker: LinkChecker::new(probe),
            report: ReportLog::default(),
            date: RunDate::today(),
            cancel,
            jobs: jobs.max(1),
        }
    }

    pub fn date(&self) -> &RunDate {
        &self.date
    }

    pub fn report(&self) -> &ReportLog {
        &self.report
    }

    pub fn into_report(self) -> ReportLog {
        self.report
    }

    /// Returns the updated page text, or None when the page needs no edit.
    pub fn check_page(&mut self, title: &str, text: &str) -> Option<String> {
        let mut code = Wikicode::parse(text);
        let language = detect_language(title).1;

        let mut sites = Vec::new();
        for index in code.extlink_indices() {
            let Some(link) = code.get(index).and_then(Node::as_extlink) else {
                continue;
            };
            let (url_part, rest) = split_overrun(&link.url);
            let target = match normalize(url_part) {
                Ok(url) => Some(url),
                Err(reject) => {
                    log::debug!("skipping {url_part} on [[{title}]]: {}", reject.as_str());
                    None
                }
            };
            sites.push(LinkSite {
                index,
                url_part: url_part.to_string(),
                rest,
                target,
            });
        }

        let mut targets = Vec::new();
        for site in &sites {
            if let Some(url) = &site.target
                && !targets.contains(url)
            {
                targets.push(url.clone());
            }
        }
        let verdicts = self.classify(targets);
        if self.cancel.is_cancelled() {
            return None;
        }

        let mut ops = Vec::new();
        for site in &sites {
            let verdict = site
                .target
                .as_ref()
                .and_then(|url| verdicts.get(url))
                .copied();
            let annotation = annotate_link(&code, site, verdict, language, &self.date);
            if let Some(line) = annotation.report_line {
                self.report.add(title, line);
            }
            ops.extend(annotation.ops);
        }
        if ops.is_empty() {
            return None;
        }

        code.apply(ops);
        let updated = code.render();
        if updated == text { None } else { Some(updated) }
    }

    pub fn check_pages(&mut self, pages: &[(String, String)]) -> Vec<PageEdit> {
        let mut edits = Vec::new();
        for (title, text) in pages {
            if self.cancel.is_cancelled() {
                log::warn!("cancelled, stopping before [[{title}]]");
                break;
            }
            log::info!("checking external links on [[{title}]]");
            if let Some(updated) = self.check_page(title, text) {
                edits.push(PageEdit {
                    title: title.clone(),
                    original: text.clone(),
                    updated,
                });
            }
        }
        edits
    }

    // Classification is the only concurrent stage. Workers drain a shared
    // queue of distinct URLs; annotation happens after all of them joined.
    fn classify(&self, targets: Vec<CanonicalUrl>) -> HashMap<CanonicalUrl, Verdict> {
        if self.jobs == 1 || targets.len() <= 1 {
            let mut verdicts = HashMap::new();
            for url in targets {
                if self.cancel.is_cancelled() {
                    break;
                }
                let verdict = self.checker.check(&url);
                verdicts.insert(url, verdict);
            }
            return verdicts;
        }

        let workers = self.jobs.min(targets.len());
        let queue = Mutex::new(targets);
        let verdicts = Mutex::new(HashMap::new());
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        let Some(url) = queue.lock().expect("work queue mutex poisoned").pop()
                        else {
                            break;
                        };
                        let verdict = self.checker.check(&url);
                        verdicts
                            .lock()
                            .expect("verdict map mutex poisoned")
                            .insert(url, verdict);
                    }
                });
            }
        });
        verdicts.into_inner().expect("verdict map mutex poisoned")
    }
}
