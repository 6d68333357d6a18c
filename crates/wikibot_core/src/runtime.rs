use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

pub const PAGES_DIR_NAME: &str = "pages";
pub const REPORTS_DIR_NAME: &str = "reports";
pub const CONFIG_FILE_NAME: &str = "wikibot.toml";
pub const PAGE_FILE_EXTENSION: &str = "wiki";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub pages_dir: PathBuf,
    pub report_dir: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub report_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\npages_dir={}\nreport_dir={} ({})\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.pages_dir),
            normalize_for_display(&self.report_dir),
            self.report_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env)
        .context("failed to resolve project root")?;
    let pages_dir = project_root.join(PAGES_DIR_NAME);

    let (report_dir, report_source) = if let Some(path) = overrides.report_dir.as_deref() {
        (
            absolutize_from_project(path, &project_root),
            ValueSource::Flag,
        )
    } else if let Some(value) = lookup_env("WIKIBOT_REPORT_DIR") {
        (
            absolutize_from_project(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (project_root.join(REPORTS_DIR_NAME), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (
            absolutize_from_project(path, &project_root),
            ValueSource::Flag,
        )
    } else if let Some(value) = lookup_env("WIKIBOT_CONFIG") {
        (
            absolutize_from_project(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (project_root.join(CONFIG_FILE_NAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        project_root,
        pages_dir,
        report_dir,
        config_path,
        root_source,
        report_source,
        config_source,
    })
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> Result<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return Ok((absolutize(path, &context.cwd), ValueSource::Flag));
    }

    if let Some(value) = lookup_env("WIKIBOT_PROJECT_ROOT") {
        return Ok((
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        ));
    }

    let root = detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref());
    Ok((root, ValueSource::Heuristic))
}

// Nearest ancestor (of the working directory, then of the executable)
// that carries a pages/ directory; falls back to the working directory.
fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> PathBuf {
    let mut seen = HashSet::new();
    for candidate in candidate_roots(cwd, executable_dir) {
        let key = normalize_for_display(&candidate);
        if !seen.insert(key) {
            continue;
        }
        if candidate.join(PAGES_DIR_NAME).is_dir() {
            return candidate;
        }
    }
    cwd.to_path_buf()
}

fn candidate_roots(cwd: &Path, executable_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut out = ancestors(cwd);
    if let Some(exe_dir) = executable_dir {
        out.extend(ancestors(exe_dir));
    }
    out
}

fn ancestors(path: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut cursor = Some(path);
    while let Some(current) = cursor {
        out.push(current.to_path_buf());
        cursor = current.parent();
    }
    out
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn absolutize_from_project(path: &Path, project_root: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}

fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[derive(Debug, Clone)]
pub struct PageFile {
    pub title: String,
    pub path: PathBuf,
}

/// Enumerate page files under pages/, sorted by title. A missing pages/
/// directory yields an empty list so diagnostics still work on bare trees.
pub fn scan_pages(paths: &ResolvedPaths) -> Result<Vec<PageFile>> {
    let mut pages = Vec::new();
    if !paths.pages_dir.exists() {
        return Ok(pages);
    }

    for entry in WalkDir::new(&paths.pages_dir).follow_links(false) {
        let entry =
            entry.with_context(|| format!("failed to walk {}", paths.pages_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(PAGE_FILE_EXTENSION) {
            continue;
        }
        let relative = path.strip_prefix(&paths.pages_dir).with_context(|| {
            format!("page file escapes the pages directory: {}", path.display())
        })?;
        pages.push(PageFile {
            title: relative_to_title(relative),
            path: path.to_path_buf(),
        });
    }

    pages.sort_by(|left, right| left.title.cmp(&right.title));
    Ok(pages)
}

/// File path for a page title. Underscores stand in for spaces on disk and
/// subpage slashes become directories, so "Systemd/User (Polski)" maps to
/// pages/Systemd/User_(Polski).wiki.
pub fn page_path(paths: &ResolvedPaths, title: &str) -> PathBuf {
    let mut path = paths.pages_dir.clone();
    let segments = title.split('/').collect::<Vec<_>>();
    for segment in &segments[..segments.len().saturating_sub(1)] {
        path.push(segment.replace(' ', "_"));
    }
    let last = segments.last().copied().unwrap_or_default();
    path.push(format!(
        "{}.{PAGE_FILE_EXTENSION}",
        last.replace(' ', "_")
    ));
    path
}

fn relative_to_title(relative: &Path) -> String {
    let components = relative.components().collect::<Vec<_>>();
    let mut title = String::new();
    for (position, component) in components.iter().enumerate() {
        let segment = component.as_os_str().to_string_lossy();
        let segment = if position + 1 == components.len() {
            segment
                .strip_suffix(&format!(".{PAGE_FILE_EXTENSION}"))
                .unwrap_or(&segment)
                .to_string()
        } else {
            segment.into_owned()
        };
        if position > 0 {
            title.push('/');
        }
        title.push_str(&segment.replace('_', " "));
    }
    title
}
