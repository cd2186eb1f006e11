//! Steel command-line utilities.
//!
//! Usage examples:
//!   $ STEEL_API_KEY=... cargo run --bin steel -- scrape https://example.com
//!   $ STEEL_API_KEY=... cargo run --bin steel -- extract https://example.com \
//!       --schema '{"type":"object","properties":{"title":{"type":"string"}}}'
//!   $ STEEL_API_KEY=... cargo run --bin steel -- screenshot https://example.com --out page.png
//!   $ STEEL_API_KEY=... cargo run --bin steel -- load https://a.example https://b.example --concurrent

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use serde_json::Value as JsonValue;
use steel_rs::logging::{LogCallback, SteelLogRecord};
use steel_rs::{
    ExtractOptions, ScrapeRequest, SteelClient, SteelConfigOverrides, SteelDocumentLoader,
    Verbosity,
};

#[derive(Parser)]
#[command(name = "steel", author, version, about = "Steel.dev command-line utilities")]
struct Cli {
    /// Increase log verbosity (pass twice for DEBUG).
    #[arg(long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Route requests through Steel's proxy network.
    #[arg(long, global = true)]
    use_proxy: bool,

    /// Ask Steel to solve CAPTCHAs.
    #[arg(long, global = true)]
    solve_captcha: bool,

    /// Total attempts per remote call.
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape a page and print its content.
    Scrape(ScrapeArgs),
    /// Extract structured data from a page.
    Extract(ExtractArgs),
    /// Capture a screenshot of a page.
    Screenshot(ScreenshotArgs),
    /// Load several pages as documents.
    Load(LoadArgs),
}

#[derive(Args)]
struct ScrapeArgs {
    url: String,

    /// Output format: markdown, html, text or pdf.
    #[arg(long)]
    format: Option<String>,

    /// CSS selector to wait for before capturing.
    #[arg(long)]
    wait_for: Option<String>,

    /// Extra delay after load, in milliseconds.
    #[arg(long, allow_negative_numbers = true)]
    delay_ms: Option<i64>,

    /// Write the content to a file instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct ExtractArgs {
    url: String,

    /// JSON schema describing the data to extract.
    #[arg(long)]
    schema: String,

    #[arg(long)]
    instructions: Option<String>,
}

#[derive(Args)]
struct ScreenshotArgs {
    url: String,

    /// Destination file.
    #[arg(long)]
    out: PathBuf,

    #[arg(long)]
    full_page: bool,
}

#[derive(Args)]
struct LoadArgs {
    #[arg(required = true)]
    urls: Vec<String>,

    /// Issue requests concurrently.
    #[arg(long)]
    concurrent: bool,

    #[arg(long)]
    format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env_logger();

    let cli = Cli::parse();
    let client = build_client(&cli)?;

    let outcome = match cli.command {
        Command::Scrape(args) => run_scrape(&client, args).await,
        Command::Extract(args) => run_extract(&client, args).await,
        Command::Screenshot(args) => run_screenshot(&client, args).await,
        Command::Load(args) => run_load(&client, args).await,
    };

    if client.close_session().await {
        info!("Closed Steel session");
    }
    outcome
}

fn build_client(cli: &Cli) -> Result<SteelClient> {
    let mut overrides = SteelConfigOverrides {
        verbose: Some(verbosity_from_count(cli.verbose)),
        logger: Some(make_logger_callback()),
        ..Default::default()
    };
    if cli.use_proxy {
        overrides = overrides.use_proxy(true);
    }
    if cli.solve_captcha {
        overrides = overrides.solve_captcha(true);
    }
    if let Some(retries) = cli.max_retries {
        overrides = overrides.max_retries(retries);
    }

    SteelClient::configure(overrides).context("failed to construct Steel client")
}

async fn run_scrape(client: &SteelClient, args: ScrapeArgs) -> Result<()> {
    let mut request = ScrapeRequest::new(&args.url);
    if let Some(format) = args.format {
        request = request.format(format);
    }
    if let Some(selector) = args.wait_for {
        request = request.wait_for(selector);
    }
    if let Some(delay) = args.delay_ms {
        request = request.delay_ms(delay);
    }

    let result = client
        .scrape(request)
        .await
        .with_context(|| format!("failed to scrape {}", args.url))?;
    info!(
        "Scraped {} ({} bytes, status {}, {} attempt(s))",
        result.metadata.resolved_url,
        result.content.len(),
        result.status,
        result.metadata.attempts
    );

    match args.out {
        Some(path) => {
            result
                .content
                .write_to(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{}", result.content),
    }
    Ok(())
}

async fn run_extract(client: &SteelClient, args: ExtractArgs) -> Result<()> {
    let schema: JsonValue =
        serde_json::from_str(&args.schema).context("--schema must be valid JSON")?;
    let mut options = ExtractOptions::with_schema(schema);
    if let Some(instructions) = args.instructions {
        options = options.instructions(instructions);
    }

    let result = client
        .extract(args.url.as_str(), options)
        .await
        .with_context(|| format!("failed to extract from {}", args.url))?;
    println!("{}", serde_json::to_string_pretty(&result.data)?);
    Ok(())
}

async fn run_screenshot(client: &SteelClient, args: ScreenshotArgs) -> Result<()> {
    let request = ScrapeRequest {
        full_page: args.full_page,
        ..ScrapeRequest::new(&args.url)
    };
    let result = client
        .screenshot(request)
        .await
        .with_context(|| format!("failed to capture {}", args.url))?;

    if let Some(hosted) = result.screenshot_url.as_deref() {
        info!("Screenshot hosted at {hosted}");
        println!("{hosted}");
        return Ok(());
    }
    result
        .content
        .write_to(&args.out)
        .with_context(|| format!("failed to write {}", args.out.display()))?;
    info!("Wrote {} bytes to {}", result.content.len(), args.out.display());
    Ok(())
}

async fn run_load(client: &SteelClient, args: LoadArgs) -> Result<()> {
    let mut template = ScrapeRequest::default();
    template.format = args.format;
    let loader = SteelDocumentLoader::new(client.clone(), args.urls).template(template);

    let documents = if args.concurrent {
        loader.load_concurrent().await
    } else {
        loader.load().await
    }
    .context("no documents could be loaded")?;

    if documents.len() < loader.urls().len() {
        warn!(
            "Loaded {} of {} documents",
            documents.len(),
            loader.urls().len()
        );
    }
    let rendered = serde_json::to_string_pretty(&documents)
        .map_err(|err| anyhow!("failed to render documents: {err}"))?;
    println!("{rendered}");
    Ok(())
}

fn make_logger_callback() -> LogCallback {
    Arc::new(|record: &SteelLogRecord| {
        let level = record.level.as_log_level();
        match &record.category {
            Some(category) => log::log!(level, "[{category}] {}", record.message),
            None => log::log!(level, "{}", record.message),
        }
    })
}

fn verbosity_from_count(count: u8) -> Verbosity {
    match count {
        0 => Verbosity::Medium,
        _ => Verbosity::Detailed,
    }
}

fn init_env_logger() {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}
