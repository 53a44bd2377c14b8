use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ogc_discovery::{Discovery, ServiceEndpoint, ServiceFamily, Settings, VersionNegotiator};
use rayon::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Per-attempt timeout in seconds (overrides the config file)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Skip TLS certificate validation
    #[arg(long, global = true)]
    insecure: bool,

    /// Parallel discovery threads (default: number of CPU cores)
    #[arg(short, long, global = true)]
    threads: Option<usize>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the layers of one or more services
    Discover {
        #[arg(value_name = "URL", required = true)]
        urls: Vec<String>,

        #[arg(short, long, value_enum, default_value_t = ServiceArg::Auto)]
        service: ServiceArg,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Print the protocol version a service accepts
    Versions {
        #[arg(value_name = "URL")]
        url: String,

        #[arg(short, long, value_enum)]
        service: FamilyArg,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ServiceArg {
    Auto,
    Wfs,
    Wms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FamilyArg {
    Wfs,
    Wms,
}

impl From<FamilyArg> for ServiceFamily {
    fn from(arg: FamilyArg) -> Self {
        match arg {
            FamilyArg::Wfs => ServiceFamily::Wfs,
            FamilyArg::Wms => ServiceFamily::Wms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays machine-readable.
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let start_time = std::time::Instant::now();

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build thread pool")?;
    }

    let settings = load_settings(&args)?;

    match &args.command {
        Command::Discover {
            urls,
            service,
            format,
        } => discover_all(&settings, urls, *service, *format)?,
        Command::Versions { url, service } => print_version(&settings, url, (*service).into())?,
        Command::Config => {
            let yaml = settings.to_yaml().context("Failed to serialize configuration")?;
            print!("{}", yaml);
        }
    }

    info!("Total processing time: {:?}", start_time.elapsed());
    Ok(())
}

fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => Settings::default(),
    };

    if let Some(timeout) = args.timeout {
        settings.negotiation.attempt_timeout_secs = timeout;
    }
    if args.insecure {
        settings.negotiation.accept_invalid_certs = true;
    }
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

fn discover_one(
    negotiator: &VersionNegotiator,
    url: &str,
    service: ServiceArg,
) -> Result<Discovery, ogc_discovery::DiscoveryError> {
    match service {
        ServiceArg::Auto => negotiator.discover(url),
        ServiceArg::Wfs => negotiator.negotiate_url(url, ServiceFamily::Wfs),
        ServiceArg::Wms => negotiator.negotiate_url(url, ServiceFamily::Wms),
    }
}

fn discover_all(
    settings: &Settings,
    urls: &[String],
    service: ServiceArg,
    format: OutputFormat,
) -> Result<()> {
    let negotiator = VersionNegotiator::from_config(settings.negotiation.clone())
        .context("Failed to create HTTP client")?;

    info!("Discovering {} services", urls.len());

    // Endpoints are independent; negotiate them in parallel.
    let results: Vec<_> = urls
        .par_iter()
        .map(|url| discover_one(&negotiator, url, service))
        .collect();

    let mut errors = Vec::new();
    let mut report = serde_json::Map::new();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for (url, result) in urls.iter().zip(results) {
        match result {
            Ok(discovery) => {
                info!(
                    "{}: {} {} with {} layers",
                    url,
                    discovery.family,
                    discovery.version,
                    discovery.layers.len()
                );
                match format {
                    OutputFormat::Json => {
                        report.insert(
                            url.clone(),
                            serde_json::json!({
                                "service_type": discovery.family,
                                "version": discovery.version,
                                "layers": discovery.layers,
                            }),
                        );
                    }
                    OutputFormat::Text => write_text(&mut out, url, &discovery)?,
                }
            }
            Err(e) => {
                errors.push(format!("{}: {} ({})", url, e.user_message(), e));
                if format == OutputFormat::Json {
                    report.insert(
                        url.clone(),
                        serde_json::json!({ "error": e.user_message(), "detail": e.to_string() }),
                    );
                }
            }
        }
    }

    if format == OutputFormat::Json {
        serde_json::to_writer_pretty(&mut out, &report).context("Failed to write JSON")?;
        writeln!(out)?;
    }

    if !errors.is_empty() {
        error!("Failed to discover {} services:", errors.len());
        for err in &errors {
            error!("  {}", err);
        }
        anyhow::bail!("{} services failed", errors.len());
    }

    Ok(())
}

fn write_text(out: &mut impl Write, url: &str, discovery: &Discovery) -> Result<()> {
    writeln!(out, "{} ({} {})", url, discovery.family, discovery.version)?;
    for (namespace, layers) in discovery.layers.namespaces() {
        writeln!(out, "  {}", namespace)?;
        for layer in layers.iter() {
            if layer.title == layer.local_name {
                writeln!(out, "    {}", layer.local_name)?;
            } else {
                writeln!(out, "    {} - {}", layer.local_name, layer.title)?;
            }
        }
    }
    Ok(())
}

fn print_version(settings: &Settings, url: &str, family: ServiceFamily) -> Result<()> {
    let negotiator = VersionNegotiator::from_config(settings.negotiation.clone())
        .context("Failed to create HTTP client")?;
    let endpoint = ServiceEndpoint::parse(url, family)?;
    let negotiated = negotiator
        .negotiate_version(&endpoint)
        .with_context(|| format!("Version negotiation failed for {}", url))?;
    println!("{}", negotiated.version);
    Ok(())
}
