use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use wikibot_core::annotate::RunDate;
use wikibot_core::config::load_config;
use wikibot_core::packages::{
    PACKAGE_EDIT_SUMMARY, PACKAGE_REPORT_PREFIX, PackageSyncOptions, SyncedPackageIndex,
    update_pages,
};
use wikibot_core::report::ReportLog;
use wikibot_core::runtime::{
    PageFile, PathOverrides, ResolutionContext, ResolvedPaths, page_path, resolve_paths,
    scan_pages,
};
use wikibot_core::scan::{
    CancelFlag, LINK_EDIT_SUMMARY, LINK_REPORT_PREFIX, LinkCheckRun, PageEdit,
};
use wikibot_core::status::{HttpProbe, ProbeOptions};

#[derive(Debug, Parser)]
#[command(
    name = "wikibot",
    version,
    about = "Maintenance bot for a wiki page tree: external link status and package templates"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    report_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    report_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            report_dir: cli.report_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(
        name = "check-links",
        about = "Probe every external link and update Dead link markers"
    )]
    CheckLinks(CheckLinksArgs),
    #[command(
        name = "update-packages",
        about = "Re-tag Pkg/AUR/Grp templates against the package repositories"
    )]
    UpdatePackages(UpdatePackagesArgs),
}

#[derive(Debug, Args)]
struct CheckLinksArgs {
    #[arg(long, help = "Write changed pages back instead of printing diffs")]
    write: bool,
    #[arg(
        long,
        value_name = "TITLE",
        help = "Only this page (repeatable; default is every page)"
    )]
    page: Vec<String>,
    #[arg(long, value_name = "N", help = "Concurrent link checks")]
    jobs: Option<usize>,
    #[arg(long, value_name = "N", help = "Per-request timeout in milliseconds")]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Args)]
struct UpdatePackagesArgs {
    #[arg(long, help = "Write changed pages back instead of printing diffs")]
    write: bool,
    #[arg(
        long,
        value_name = "TITLE",
        help = "Only this page (repeatable; default is every page)"
    )]
    page: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::CheckLinks(args)) => run_check_links(&runtime, args),
        Some(Commands::UpdatePackages(args)) => run_update_packages(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn run_check_links(runtime: &RuntimeOptions, args: CheckLinksArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    if runtime.diagnostics {
        println!("[diagnostics]\n{}", paths.diagnostics());
    }
    let config = load_config(&paths.config_path)?;

    let pages = select_pages(&paths, &args.page)?;
    let contents = read_pages(&pages)?;

    let probe = HttpProbe::new(&ProbeOptions {
        user_agent: config.browser_user_agent(),
        timeout_ms: args.timeout_ms.unwrap_or_else(|| config.timeout_ms()),
    })?;
    let jobs = args.jobs.unwrap_or_else(|| config.jobs());
    let mut run = LinkCheckRun::new(probe, jobs, CancelFlag::default());

    let edits = run.check_pages(&contents);
    let date = *run.date();
    let report = run.into_report();

    // The report reaches disk even when writing a page back fails.
    let outcome = apply_edits(&pages, &edits, args.write, LINK_EDIT_SUMMARY);
    save_report(&report, &paths, LINK_REPORT_PREFIX, &date)?;
    outcome
}

fn run_update_packages(runtime: &RuntimeOptions, args: UpdatePackagesArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    if runtime.diagnostics {
        println!("[diagnostics]\n{}", paths.diagnostics());
    }
    let config = load_config(&paths.config_path)?;

    let inventories = config.inventories();
    if inventories.is_empty() {
        log::warn!("no package inventories configured; every official package will look missing");
    }
    let index = SyncedPackageIndex::sync(&PackageSyncOptions {
        inventories,
        aur_url: config.aur_url(),
        user_agent: config.user_agent(),
        ..PackageSyncOptions::default()
    })?;

    // All pages are read before any template is touched, so nothing fallible
    // sits between the accumulated report lines and the flush below.
    let pages = select_pages(&paths, &args.page)?;
    let contents = read_pages(&pages)?;

    let date = RunDate::today();
    let mut report = ReportLog::default();
    let edits = update_pages(&index, &contents, &mut report);

    let outcome = apply_edits(&pages, &edits, args.write, PACKAGE_EDIT_SUMMARY);
    save_report(&report, &paths, PACKAGE_REPORT_PREFIX, &date)?;
    outcome
}

fn select_pages(paths: &ResolvedPaths, titles: &[String]) -> Result<Vec<PageFile>> {
    if titles.is_empty() {
        let pages = scan_pages(paths)?;
        if pages.is_empty() {
            log::warn!("no page files under {}", paths.pages_dir.display());
        }
        return Ok(pages);
    }

    let mut pages = Vec::new();
    for title in titles {
        let path = page_path(paths, title);
        if !path.is_file() {
            bail!("page [[{title}]] not found at {}", normalize_path(&path));
        }
        pages.push(PageFile {
            title: title.clone(),
            path,
        });
    }
    Ok(pages)
}

fn read_pages(pages: &[PageFile]) -> Result<Vec<(String, String)>> {
    pages
        .iter()
        .map(|page| {
            let text = fs::read_to_string(&page.path)
                .with_context(|| format!("failed to read {}", page.path.display()))?;
            Ok((page.title.clone(), text))
        })
        .collect()
}

fn apply_edits(pages: &[PageFile], edits: &[PageEdit], write: bool, summary: &str) -> Result<()> {
    if edits.is_empty() {
        println!("no pages need editing");
        return Ok(());
    }

    if write {
        for edit in edits {
            let page = pages
                .iter()
                .find(|page| page.title == edit.title)
                .with_context(|| format!("no file for page [[{}]]", edit.title))?;
            fs::write(&page.path, &edit.updated)
                .with_context(|| format!("failed to write {}", page.path.display()))?;
            println!("wrote [[{}]] ({})", edit.title, normalize_path(&page.path));
        }
        println!("edited {} page(s): {summary}", edits.len());
    } else {
        for edit in edits {
            print!("{}", edit.unified_diff());
        }
        println!("{} page(s) would change (dry run): {summary}", edits.len());
    }
    Ok(())
}

fn save_report(
    report: &ReportLog,
    paths: &ResolvedPaths,
    prefix: &str,
    date: &RunDate,
) -> Result<()> {
    let saved = report.save(&paths.report_dir, prefix, date)?;
    println!("report: {}", normalize_path(&saved.mediawiki));
    println!("report: {}", normalize_path(&saved.json));
    Ok(())
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        report_dir: runtime.report_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
