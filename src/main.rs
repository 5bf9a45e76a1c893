use clap::{Parser, Subcommand, builder::styling};
use cloud_inventory::cli;
use cloud_inventory::model::{JobRequest, JobStatus};
use eyre::{Result, eyre};
use owo_colors::OwoColorize;

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// Cloud Inventory: pull resources from every configured cloud and hand them to your scanners
#[derive(Parser)]
#[command(name = "cinv", version, styles = STYLES)]
struct Cli {
    /// The configuration file
    #[arg(short, long, global = true, default_value = "cinv.yml")]
    config: String,

    /// The dotenv file to source credentials from
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a one-off extraction job
    Run {
        /// Providers to extract from
        #[arg(short, long, value_delimiter = ',', required = true)]
        providers: Vec<String>,

        /// Services to extract (all when omitted)
        #[arg(short, long, value_delimiter = ',')]
        services: Vec<String>,

        /// Regions to extract (provider default when omitted)
        #[arg(short, long, value_delimiter = ',')]
        regions: Vec<String>,

        /// Filters as key=value, repeatable
        #[arg(short, long)]
        filter: Vec<String>,

        /// Artifacts per batch (defaults to the configured batch size)
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Discard artifacts instead of delivering them
        #[arg(long)]
        dry_run: bool,

        /// Print the final job as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run configured schedules until interrupted
    Serve,

    /// List configured providers and check their credentials
    Providers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(e) = dotenvy::from_filename(&cli.env)
        && !e.not_found()
    {
        return Err(e.into());
    }

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    let config = cli::load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            providers,
            services,
            regions,
            filter,
            batch_size,
            dry_run,
            json,
        } => {
            let batch_size = batch_size.unwrap_or(config.orchestrator.default_batch_size);
            let mut request = JobRequest::new(providers, batch_size)
                .with_services(services)
                .with_regions(regions);
            for (key, value) in cli::parse_filters(&filter)? {
                request = request.with_filter(key, value);
            }

            log::info!(
                "Running {} job for {}",
                match dry_run {
                    true => "dry-run",
                    false => "live",
                }
                .cyan(),
                request
                    .providers
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
                    .bright_black()
            );

            let inventory = cli::bootstrap(config, dry_run).await?;
            let job = cli::run_job(&inventory, request).await?;
            match json {
                true => println!("{}", serde_json::to_string_pretty(&job)?),
                false => cli::print_summary(&job),
            }

            if job.status != JobStatus::Completed {
                return Err(eyre!("Job {} finished {}", job.id, job.status));
            }
        }
        Commands::Serve => {
            log::info!("Starting scheduler from {}", cli.config.bright_black());
            let inventory = cli::bootstrap(config, false).await?;
            cli::serve(&inventory, &cli.config).await?;
        }
        Commands::Providers => {
            let inventory = cli::bootstrap(config, true).await?;
            cli::print_providers(&inventory).await;
        }
    }

    Ok(())
}
