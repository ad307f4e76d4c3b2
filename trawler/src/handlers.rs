use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trawler_core::data::{Database, RunStatus};
use trawler_core::proxy_pool::{ProxyPool, ProxyPoolOptions};
use trawler_core::report::{
    ReportFormat, format_timestamp, gather_report_data, render_report, save_report,
};
use trawler_core::schedule::{ScheduleOptions, run_schedule};
use trawler_core::scrape::{RunSummary, ScrapeOptions, run_scrape};
use trawler_scanner::RetryPolicy;
use url::Url;

// Argument helpers

/// `--db` with `~` expanded.
pub fn db_path_from(args: &ArgMatches) -> PathBuf {
    let raw = args
        .get_one::<String>("db")
        .map(String::as_str)
        .unwrap_or(crate::commands::DEFAULT_DB_PATH);
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

/// Accept a store URL with or without scheme; only http(s) with a host passes.
pub fn parse_store_url(line: &str) -> Option<String> {
    let line = line.trim();
    let parsed = Url::parse(line)
        .ok()
        .filter(|u| u.has_host())
        .or_else(|| Url::parse(&format!("http://{}", line)).ok())?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(parsed.to_string())
}

pub fn scrape_options_from(args: &ArgMatches, db_path: PathBuf, show_progress: bool) -> ScrapeOptions {
    let defaults = ScrapeOptions::new(db_path);
    let retry = RetryPolicy {
        retries: args.get_one::<u32>("retries").copied().unwrap_or(0),
        backoff: args
            .get_one::<u64>("retry-backoff-ms")
            .map(|ms| Duration::from_millis(*ms))
            .unwrap_or(defaults.retry.backoff),
    };

    ScrapeOptions {
        concurrency: args
            .get_one::<usize>("concurrency")
            .copied()
            .unwrap_or(defaults.concurrency),
        max_depth: args.get_one::<usize>("max-depth").copied().unwrap_or(0),
        max_pages: args.get_one::<usize>("max-pages").copied(),
        time_budget: args
            .get_one::<u64>("time-budget")
            .map(|secs| Duration::from_secs(*secs)),
        timeout: args
            .get_one::<u64>("timeout")
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or(defaults.timeout),
        retry,
        store_concurrency: args
            .get_one::<usize>("store-concurrency")
            .copied()
            .unwrap_or(1),
        record_front_page: args.get_flag("record-front-page"),
        show_progress_bars: show_progress,
        ..defaults
    }
}

pub fn proxy_options_from(args: &ArgMatches) -> ProxyPoolOptions {
    let mut options = ProxyPoolOptions::default();
    if let Some(sources) = args.get_many::<Url>("source") {
        options.sources = sources.map(Url::to_string).collect();
    }
    if args.get_flag("no-geo") {
        options.geo_endpoint = None;
    } else if let Some(endpoint) = args.get_one::<Url>("geo-endpoint") {
        options.geo_endpoint = Some(endpoint.as_str().trim_end_matches('/').to_string());
    }
    options
}

fn open_database(db_path: &Path) -> Result<Database> {
    if !Database::exists(db_path) {
        bail!(
            "No database at {}. Run `trawler init` first.",
            db_path.display()
        );
    }
    Database::new(db_path).with_context(|| format!("Failed to open {}", db_path.display()))
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message.to_string());
    pb
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

// init

pub fn handle_init(db_path: &Path, force: bool) -> Result<()> {
    print_divider();
    println!("{}", "  TRAWLER INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    if let Some(config_dir) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create {}", config_dir.display()))?;
        println!(
            "{} Config directory: {}",
            "✓".green().bold(),
            config_dir.display().to_string().bright_white()
        );
    }

    if Database::exists(db_path) {
        if !force {
            println!("{}", "⚠ WARNING".yellow().bold());
            println!(
                "Database already exists at {}; keeping it. Use --force to replace it.",
                db_path.display().to_string().bright_white()
            );
            Database::new(db_path)?;
            return Ok(());
        }
        println!(
            "{} Deleting existing database (force mode)",
            "→".yellow().bold()
        );
        Database::remove(db_path)?;
    }

    println!("{} Creating database...", "→".blue());
    Database::new(db_path)?;
    println!(
        "{} Database initialized: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

// store

pub fn handle_store_add(db_path: &Path, name: &str, url: &str) -> Result<()> {
    let Some(base_url) = parse_store_url(url) else {
        bail!("'{}' is not an http(s) URL", url);
    };
    let db = open_database(db_path)?;
    let id = db
        .add_store(name, &base_url)
        .with_context(|| format!("Failed to add store '{}'", name))?;
    println!(
        "{} Added store {} [{}] {}",
        "✓".green().bold(),
        name.bright_white(),
        id,
        base_url
    );
    Ok(())
}

pub fn handle_store_list(db_path: &Path) -> Result<()> {
    let db = open_database(db_path)?;
    let stores = db.list_stores()?;
    if stores.is_empty() {
        println!("No stores on file. Add one with `trawler store add`.");
        return Ok(());
    }

    for store in stores {
        let state = if store.active {
            "active".green()
        } else {
            "inactive".dimmed()
        };
        println!(
            "  [{:>4}] {:<24} {:<10} {}",
            store.id,
            store.name.bright_white(),
            state,
            store.base_url
        );
    }
    Ok(())
}

pub fn handle_store_set_active(db_path: &Path, store_id: i64, active: bool) -> Result<()> {
    let db = open_database(db_path)?;
    if !db.set_store_active(store_id, active)? {
        bail!("No store with id {}", store_id);
    }
    let verb = if active { "Enabled" } else { "Disabled" };
    println!("{} {} store {}", "✓".green().bold(), verb, store_id);
    Ok(())
}

// proxy

pub async fn handle_proxy_refresh(db_path: &Path, options: ProxyPoolOptions, quiet: bool) -> Result<()> {
    open_database(db_path)?;
    let pool = ProxyPool::new(options)?;

    let pb = (!quiet).then(|| spinner("Harvesting proxy feeds..."));
    let written = pool.refresh(db_path).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let written = written?;
    println!(
        "{} Added or refreshed {} proxies",
        "✓".green().bold(),
        written.to_string().cyan()
    );
    Ok(())
}

pub fn handle_proxy_list(db_path: &Path) -> Result<()> {
    let db = open_database(db_path)?;
    let proxies = db.list_proxies()?;
    if proxies.is_empty() {
        println!("No proxies on file; crawls connect directly.");
        return Ok(());
    }

    for proxy in &proxies {
        let last_used = proxy
            .last_used
            .map(format_timestamp)
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  [{:>5}] {:<22} {:<10} {:<3} {}",
            proxy.id,
            format!("{}:{}", proxy.ip, proxy.port).bright_white(),
            proxy.kind,
            proxy.country.as_deref().unwrap_or("--"),
            last_used.dimmed()
        );
    }
    println!("\n{} proxies", proxies.len().to_string().cyan());
    Ok(())
}

pub fn handle_proxy_add(
    db_path: &Path,
    ip: IpAddr,
    port: u16,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<()> {
    let db = open_database(db_path)?;
    let id = db.add_proxy(&ip.to_string(), port, username, password)?;
    println!("{} Proxy {}:{} on file as [{}]", "✓".green().bold(), ip, port, id);
    Ok(())
}

// run / schedule

pub fn print_run_summary(summary: &RunSummary) {
    println!();
    print_divider();
    println!("{} {}", "  SCRAPE RUN".bright_white().bold(), summary.run_id);
    print_divider();

    for store in &summary.stores {
        match &store.error {
            Some(error) => println!(
                "  {} {:<24} {}",
                "✗".red().bold(),
                store.name.bright_white(),
                error.red()
            ),
            None => {
                let mut line = format!(
                    "{} links, {} visited, {} failed",
                    store.links, store.visited, store.failed
                );
                if store.truncated {
                    line.push_str(" (stopped at ceiling)");
                }
                println!("  {} {:<24} {}", "✓".green().bold(), store.name.bright_white(), line);
            }
        }
    }

    println!();
    println!(
        "Total links: {}   Failed stores: {}",
        summary.total_links().to_string().cyan(),
        summary.failed_stores().to_string().cyan()
    );
    println!(
        "See `trawler report {}` for the log trail.",
        summary.run_id
    );
}

pub async fn handle_run(options: ScrapeOptions) -> Result<()> {
    open_database(&options.db_path)?;
    let summary = run_scrape(&options).await?;
    print_run_summary(&summary);
    Ok(())
}

pub async fn handle_schedule(options: ScheduleOptions) -> Result<()> {
    open_database(&options.scrape.db_path)?;
    println!(
        "{} Scraping every {} min, refreshing proxies every {} min. Ctrl-C to stop.",
        "→".blue(),
        options.scrape_every.as_secs() / 60,
        options.proxy_refresh_every.as_secs() / 60
    );
    run_schedule(options).await?;
    Ok(())
}

// runs / report

pub fn handle_runs(db_path: &Path, limit: usize) -> Result<()> {
    let db = open_database(db_path)?;
    let runs = db.list_runs(limit)?;
    if runs.is_empty() {
        println!("No scrape runs yet.");
        return Ok(());
    }

    for run in runs {
        let status = match run.status {
            RunStatus::Running => "running".yellow(),
            RunStatus::Finished => "finished".green(),
        };
        let links: i64 = db
            .link_counts_by_store(&run.id)?
            .iter()
            .map(|(_, count)| count)
            .sum();
        println!(
            "  {}  {}  {:<8}  {} links",
            run.id.bright_white(),
            format_timestamp(run.started_at),
            status,
            links
        );
    }
    Ok(())
}

pub fn handle_report(
    db_path: &Path,
    run_id: &str,
    format: ReportFormat,
    output: Option<&Path>,
    log_limit: usize,
) -> Result<()> {
    let db = open_database(db_path)?;
    let data = gather_report_data(&db, run_id, log_limit)?;
    let content = render_report(&data, format)?;

    match output {
        Some(path) => {
            save_report(&content, path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", content),
    }
    Ok(())
}
