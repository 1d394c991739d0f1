use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use clap::{Args, Parser, Subcommand, ValueEnum};
use proxy_directory::proxy::selector::DEFAULT_TOP_PORTS;
use proxy_directory::{
    CheckOutcome, Config, FreshnessPolicy, LinkRecord, Proxy, ProxyFilter, ProxyParser, ProxyType,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Proxy directory: freshness tracking, selection and list reconciliation
#[derive(Parser)]
#[command(name = "proxy-directory")]
#[command(about = "Proxy directory: freshness tracking, selection and list reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file path or sqlite: URL
    #[arg(
        short,
        long,
        global = true,
        env = "PROXY_DIRECTORY_DATABASE",
        default_value = "proxies.db"
    )]
    database: String,

    /// Log failed directory operations
    #[arg(long, global = true, env = "PROXY_DIRECTORY_LOG_ERRORS")]
    log_errors: bool,

    /// Re-verification backoff per consecutive failure, in hours
    #[arg(long, global = true, env = "PROXY_DIRECTORY_BASE_INTERVAL_HOURS", default_value_t = 72)]
    base_interval_hours: i64,

    /// Rows read per page while reconciling lists
    #[arg(long, global = true, env = "PROXY_DIRECTORY_CHUNK_SIZE", default_value_t = 100_000)]
    chunk_size: u64,
}

#[derive(Args)]
struct FilterArgs {
    /// Only working proxies
    #[arg(short, long)]
    working: bool,
    /// Only anonymous proxies
    #[arg(short, long)]
    anonymous: bool,
    /// Only this scheme (http, https, socks4, socks5)
    #[arg(short = 't', long)]
    scheme: Option<String>,
    /// Only proxies due for re-verification
    #[arg(long)]
    stale: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum CheckResult {
    Working,
    Failed,
}

#[derive(Subcommand)]
enum Commands {
    /// Show directory counters
    Stats,
    /// List matching proxy hostnames
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Pick random matching proxies
    Sample {
        /// Number of proxies to pick
        #[arg(short, long, default_value = "10")]
        count: usize,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Most common ports among working proxies
    Ports {
        #[arg(short, long, default_value_t = DEFAULT_TOP_PORTS)]
        limit: usize,
    },
    /// Most recently updated proxies
    Recent {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Distinct hosts among working proxies
    Hosts,
    /// Print proxies from a list that the directory does not know
    Unknown {
        /// File containing proxies
        input: PathBuf,
        /// Scheme for entries without one
        #[arg(short = 't', long, default_value = "http")]
        proxy_type: String,
        /// Write unknown hostnames to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Add the unknown proxies of a list to the directory
    Import {
        /// File containing proxies
        input: PathBuf,
        /// Scheme for entries without one
        #[arg(short = 't', long, default_value = "http")]
        proxy_type: String,
    },
    /// Record a verification result for a proxy
    Check {
        /// Proxy hostname (scheme://host:port)
        hostname: String,
        result: CheckResult,
        /// The proxy hid the client address
        #[arg(short, long)]
        anonymous: bool,
        /// Measured round trip in milliseconds
        #[arg(short, long, default_value = "0")]
        latency_ms: u64,
    },
    /// Crawl frontier commands
    Links {
        #[command(subcommand)]
        command: LinkCommands,
    },
}

#[derive(Subcommand)]
enum LinkCommands {
    /// List every tracked host
    List,
    /// List hosts flagged for repeated crawling
    Iterable,
    /// List iterable hosts due for another crawl
    Stale,
    /// Track a host or update its iterate flag
    Add {
        hostname: String,
        /// Do not crawl this host again
        #[arg(long)]
        no_iterate: bool,
    },
    /// Count one more crawl of a host
    Crawled { hostname: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let freshness = FreshnessPolicy::new().with_base_interval(
        ChronoDuration::try_hours(cli.base_interval_hours)
            .context("base interval out of range")?,
    );
    let config = Config::new()
        .with_database_url(cli.database.clone())
        .with_log_errors(cli.log_errors)
        .with_freshness(freshness)
        .with_chunk_size(cli.chunk_size);

    let store = config
        .open_store()
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    let directory = config.directory(store.clone());
    let selector = directory.selector();

    match cli.command {
        Commands::Stats => {
            let stats = selector.stats().await?;
            println!("Total:     {}", stats.total);
            println!("Working:   {}", stats.working);
            println!("Anonymous: {}", stats.anonymous);
            println!("Stale:     {}", stats.stale);
            for (scheme, counts) in &stats.by_scheme {
                println!("  {:<7} {} total, {} working", scheme, counts.total, counts.working);
            }
        }
        Commands::List { filter } => {
            let filter = build_filter(&filter, &config)?;
            print_lines(&selector.list_all(&filter).await?);
        }
        Commands::Sample { count, filter } => {
            let filter = build_filter(&filter, &config)?;
            print_lines(&selector.sample_random(&filter, count).await?);
        }
        Commands::Ports { limit } => {
            for entry in selector.top_ports(limit).await? {
                println!("{}\t{}", entry.port, entry.frequency);
            }
        }
        Commands::Recent { limit } => {
            print_lines(&selector.recent(limit).await?);
        }
        Commands::Hosts => {
            print_lines(&selector.unique_hosts().await?);
        }
        Commands::Unknown {
            input,
            proxy_type,
            output,
        } => {
            let ptype: ProxyType = proxy_type.parse()?;
            let proxies = ProxyParser::parse_file(&input, ptype)?;
            info!("Parsed {} proxies from {:?}", proxies.len(), input);

            let mut unknown: Vec<String> = directory
                .reconciler()
                .find_unknown(proxies.iter().map(Proxy::hostname))
                .await?
                .into_iter()
                .collect();
            unknown.sort();

            if let Some(output_path) = output {
                ProxyParser::save_hostnames(&unknown, &output_path)?;
                info!("Saved {} unknown proxies to {:?}", unknown.len(), output_path);
            } else {
                print_lines(&unknown);
            }
        }
        Commands::Import { input, proxy_type } => {
            let ptype: ProxyType = proxy_type.parse()?;
            let proxies = ProxyParser::parse_file(&input, ptype)?;
            info!("Parsed {} proxies from {:?}", proxies.len(), input);

            let report = directory.import(proxies).await?;
            println!(
                "Candidates: {}, unknown: {}, inserted: {}, conflicts: {}",
                report.candidates,
                report.unknown,
                report.inserted.len(),
                report.conflicts.len()
            );
        }
        Commands::Check {
            hostname,
            result,
            anonymous,
            latency_ms,
        } => {
            let proxy = Proxy::from_hostname(&hostname)?;
            let latency = Duration::from_millis(latency_ms);
            let outcome = match result {
                CheckResult::Working => CheckOutcome::working(anonymous, latency),
                CheckResult::Failed => CheckOutcome::failed(latency),
            };

            let record = directory.record_check(&proxy, outcome).await?;
            println!(
                "{}: working={} anonymous={} failures={}",
                record.hostname, record.is_working, record.is_anonymous, record.check_fail_count
            );
        }
        Commands::Links { command } => {
            let frontier = config.frontier(store);
            match command {
                LinkCommands::List => print_lines(&frontier.list_all().await?),
                LinkCommands::Iterable => print_lines(&frontier.list_iterable().await?),
                LinkCommands::Stale => print_lines(&frontier.list_stale_links().await?),
                LinkCommands::Add {
                    hostname,
                    no_iterate,
                } => {
                    let mut link = match frontier.get(&hostname).await {
                        Ok(link) => link,
                        Err(proxy_directory::DirectoryError::NotFound(_)) => {
                            LinkRecord::new(hostname.clone(), true, chrono::Utc::now())
                        }
                        Err(err) => return Err(err.into()),
                    };
                    link.should_iterate = !no_iterate;
                    let link = frontier.upsert(link).await?;
                    println!(
                        "{}: iterate={} crawls={}",
                        link.hostname, link.should_iterate, link.crawl_count
                    );
                }
                LinkCommands::Crawled { hostname } => {
                    let link = frontier.record_crawl(&hostname).await?;
                    println!("{}: crawls={}", link.hostname, link.crawl_count);
                }
            }
        }
    }

    Ok(())
}

fn build_filter(args: &FilterArgs, config: &Config) -> Result<ProxyFilter> {
    let mut filter = ProxyFilter::new();
    if args.working {
        filter = filter.working(true);
    }
    if args.anonymous {
        filter = filter.anonymous(true);
    }
    if let Some(scheme) = &args.scheme {
        filter = filter.scheme(scheme.parse()?);
    }
    if args.stale {
        filter = filter.stale_as_of(config.freshness, chrono::Utc::now());
    }
    Ok(filter)
}

/// Results go to stdout one per line; status goes to the log on stderr.
fn print_lines(lines: &[String]) {
    if lines.is_empty() {
        info!("Nothing found.");
    }
    // A closed stdout (e.g. `| head`) ends output quietly.
    let _ = write_lines(&mut std::io::stdout().lock(), lines);
}

fn write_lines<W: Write>(out: &mut W, lines: &[String]) -> std::io::Result<()> {
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    out.flush()
}
