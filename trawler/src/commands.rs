use clap::{Arg, arg, command, value_parser};
use std::path::PathBuf;
use url::Url;

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

pub const DEFAULT_DB_PATH: &str = "~/.config/trawler/trawler.db";

/// Knobs shared by `run` and `schedule`.
fn crawl_tuning_args() -> Vec<Arg> {
    vec![
        arg!(-c --"concurrency" <NUM_WORKERS>)
            .required(false)
            .help("Workers and concurrent fetches per store crawl")
            .env("TRAWLER_CONCURRENCY")
            .value_parser(value_parser!(usize))
            .default_value("10"),
        arg!(-d --"max-depth" <DEPTH>)
            .required(false)
            .help("Link depth limit from each store's base URL (0 = unlimited)")
            .env("TRAWLER_MAX_DEPTH")
            .value_parser(value_parser!(usize))
            .default_value("0"),
        arg!(--"max-pages" <COUNT>)
            .required(false)
            .help("Stop a store crawl after this many pages")
            .env("TRAWLER_MAX_PAGES")
            .value_parser(value_parser!(usize)),
        arg!(--"time-budget" <SECONDS>)
            .required(false)
            .help("Stop a store crawl after this many seconds")
            .env("TRAWLER_TIME_BUDGET")
            .value_parser(value_parser!(u64)),
        arg!(--"timeout" <SECONDS>)
            .required(false)
            .help("Per-request timeout in seconds")
            .env("TRAWLER_TIMEOUT")
            .value_parser(value_parser!(u64))
            .default_value("15"),
        arg!(--"retries" <COUNT>)
            .required(false)
            .help("Retries for timeouts, connection errors, 429 and 5xx responses")
            .env("TRAWLER_RETRIES")
            .value_parser(value_parser!(u32))
            .default_value("0"),
        arg!(--"retry-backoff-ms" <MILLIS>)
            .required(false)
            .help("Backoff before retry n is n times this value")
            .env("TRAWLER_RETRY_BACKOFF_MS")
            .value_parser(value_parser!(u64))
            .default_value("500"),
        arg!(--"store-concurrency" <COUNT>)
            .required(false)
            .help("How many stores are crawled at once")
            .env("TRAWLER_STORE_CONCURRENCY")
            .value_parser(value_parser!(usize))
            .default_value("1"),
        arg!(--"record-front-page")
            .required(false)
            .help("Also record each store's base URL as a link")
            .env("TRAWLER_RECORD_FRONT_PAGE")
            .action(clap::ArgAction::SetTrue),
    ]
}

fn proxy_source_args() -> Vec<Arg> {
    vec![
        arg!(-s --"source" <URL>)
            .required(false)
            .help("Proxy list feed (repeatable; defaults to the built-in feeds)")
            .env("TRAWLER_PROXY_SOURCES")
            .value_delimiter(',')
            .action(clap::ArgAction::Append)
            .value_parser(value_parser!(Url)),
        arg!(--"geo-endpoint" <URL>)
            .required(false)
            .help("Country lookup service queried as <URL>/<ip>/country/")
            .env("TRAWLER_GEO_ENDPOINT")
            .value_parser(value_parser!(Url))
            .conflicts_with("no-geo"),
        arg!(--"no-geo")
            .required(false)
            .help("Skip country lookups")
            .action(clap::ArgAction::SetTrue),
    ]
}

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("trawler")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("trawler")
        .styles(CLAP_STYLING)
        .about("Discovers and records every page reachable within a store's domain")
        .arg(arg!(-q --"quiet" "Suppress non-essential output").required(false))
        .arg(
            arg!(--"db" <PATH>)
                .required(false)
                .global(true)
                .help("Location of the trawler database")
                .env("TRAWLER_DB")
                .default_value(DEFAULT_DB_PATH),
        )
        .subcommand_required(true)
        .subcommand(
            command!("init")
                .about("Initializes the trawler database on your filesystem")
                .arg(
                    arg!(-f --"force")
                        .help("Replace any existing database at the configured location")
                        .required(false),
                ),
        )
        .subcommand(
            command!("store")
                .about("Manage the stores that scrape runs crawl")
                .subcommand_required(true)
                .subcommand(
                    command!("add")
                        .about("Register a store")
                        .arg(
                            arg!(-n --"name" <NAME>)
                                .required(true)
                                .help("Unique name of the store"),
                        )
                        .arg(
                            arg!(-u --"url" <URL>)
                                .required(true)
                                .help("Base URL the crawl starts from"),
                        ),
                )
                .subcommand(command!("list").about("List all stores"))
                .subcommand(
                    command!("enable").about("Include a store in scrape runs").arg(
                        arg!(--"id" <ID>)
                            .required(true)
                            .value_parser(value_parser!(i64)),
                    ),
                )
                .subcommand(
                    command!("disable")
                        .about("Exclude a store from scrape runs")
                        .arg(
                            arg!(--"id" <ID>)
                                .required(true)
                                .value_parser(value_parser!(i64)),
                        ),
                ),
        )
        .subcommand(
            command!("proxy")
                .about("Manage the proxy pool")
                .subcommand_required(true)
                .subcommand(
                    command!("refresh")
                        .about("Harvest proxy feeds, geotag and store the candidates")
                        .args(proxy_source_args()),
                )
                .subcommand(command!("list").about("List proxies on file"))
                .subcommand(
                    command!("add")
                        .about("Add a proxy by hand, optionally with credentials")
                        .arg(
                            arg!(--"ip" <IP>)
                                .required(true)
                                .value_parser(value_parser!(std::net::IpAddr)),
                        )
                        .arg(
                            arg!(--"port" <PORT>)
                                .required(true)
                                .value_parser(value_parser!(u16).range(1..)),
                        )
                        .arg(arg!(--"username" <USERNAME>).required(false))
                        .arg(
                            arg!(--"password" <PASSWORD>)
                                .required(false)
                                .requires("username"),
                        ),
                ),
        )
        .subcommand(
            command!("run")
                .about("Crawl every active store once and record what was found")
                .args(crawl_tuning_args()),
        )
        .subcommand(
            command!("schedule")
                .about("Run scrapes and proxy refreshes on a fixed cycle until Ctrl-C")
                .arg(
                    arg!(--"every" <MINUTES>)
                        .required(false)
                        .help("Minutes between scrape runs")
                        .value_parser(value_parser!(u64).range(1..))
                        .default_value("60"),
                )
                .arg(
                    arg!(--"proxy-every" <MINUTES>)
                        .required(false)
                        .help("Minutes between proxy refreshes")
                        .value_parser(value_parser!(u64).range(1..))
                        .default_value("60"),
                )
                .args(crawl_tuning_args())
                .args(proxy_source_args()),
        )
        .subcommand(
            command!("runs")
                .about("List recent scrape runs")
                .arg(
                    arg!(-l --"limit" <N>)
                        .required(false)
                        .value_parser(value_parser!(usize))
                        .default_value("10"),
                ),
        )
        .subcommand(
            command!("report")
                .about("Summarize a scrape run")
                .arg(arg!(<RUN_ID>).help("Id of the scrape run"))
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--"logs" <N>)
                        .required(false)
                        .help("How many recent log entries to include")
                        .value_parser(value_parser!(usize))
                        .default_value("20"),
                ),
        )
}
