use clap::ArgMatches;
use colored::Colorize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use trawler::commands::command_argument_builder;
use trawler::handlers::*;
use trawler_core::report::ReportFormat;
use trawler_core::schedule::ScheduleOptions;

fn init_tracing(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let chosen_command = command_argument_builder().get_matches();
    let quiet = chosen_command.get_flag("quiet");
    init_tracing(quiet);

    if let Err(e) = dispatch(&chosen_command, quiet).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

async fn dispatch(matches: &ArgMatches, quiet: bool) -> anyhow::Result<()> {
    let db_path = db_path_from(matches);
    debug!("Using database at {}", db_path.display());

    match matches.subcommand() {
        Some(("init", args)) => handle_init(&db_path, args.get_flag("force")),
        Some(("store", primary_command)) => match primary_command.subcommand() {
            Some(("add", args)) => handle_store_add(
                &db_path,
                required::<String>(args, "name"),
                required::<String>(args, "url"),
            ),
            Some(("list", _)) => handle_store_list(&db_path),
            Some(("enable", args)) => {
                handle_store_set_active(&db_path, *required::<i64>(args, "id"), true)
            }
            Some(("disable", args)) => {
                handle_store_set_active(&db_path, *required::<i64>(args, "id"), false)
            }
            _ => unreachable!("clap should ensure we don't get here"),
        },
        Some(("proxy", primary_command)) => match primary_command.subcommand() {
            Some(("refresh", args)) => {
                handle_proxy_refresh(&db_path, proxy_options_from(args), quiet).await
            }
            Some(("list", _)) => handle_proxy_list(&db_path),
            Some(("add", args)) => handle_proxy_add(
                &db_path,
                *required::<IpAddr>(args, "ip"),
                *required::<u16>(args, "port"),
                args.get_one::<String>("username").map(String::as_str),
                args.get_one::<String>("password").map(String::as_str),
            ),
            _ => unreachable!("clap should ensure we don't get here"),
        },
        Some(("run", args)) => handle_run(scrape_options_from(args, db_path, !quiet)).await,
        Some(("schedule", args)) => {
            let minutes = |name: &str| Duration::from_secs(60 * *required::<u64>(args, name));
            let options = ScheduleOptions {
                scrape_every: minutes("every"),
                proxy_refresh_every: minutes("proxy-every"),
                scrape: scrape_options_from(args, db_path, false),
                proxies: proxy_options_from(args),
            };
            handle_schedule(options).await
        }
        Some(("runs", args)) => handle_runs(&db_path, *required::<usize>(args, "limit")),
        Some(("report", args)) => {
            let format = ReportFormat::parse(required::<String>(args, "format"))
                .unwrap_or(ReportFormat::Text);
            handle_report(
                &db_path,
                required::<String>(args, "RUN_ID"),
                format,
                args.get_one::<PathBuf>("output").map(PathBuf::as_path),
                *required::<usize>(args, "logs"),
            )
        }
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

/// Arguments that are required or carry a default.
fn required<'a, T: Clone + Send + Sync + 'static>(args: &'a ArgMatches, name: &str) -> &'a T {
    args.get_one::<T>(name)
        .unwrap_or_else(|| unreachable!("clap enforces --{}", name))
}
