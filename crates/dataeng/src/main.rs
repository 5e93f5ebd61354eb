use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use dataeng_core::config::StoreConfig;
use dataeng_core::metadata::{MetadataStore, SourceRef, WindowUpdate};
use dataeng_core::naming::{self, PartitionPrefix, UNSET};
use dataeng_core::success;
use serde_json::{Map, Value};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Naming and ingestion bookkeeping for data pipelines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the ingestion bucket name of an organisation's business group
    IngestionBucket(IngestionBucketArgs),
    /// Print the modeling bucket name of a repository
    ModelingBucket(ModelingBucketArgs),
    /// Print the DAGs, Dataflow and test bucket names of a project
    ProjectBuckets(ProjectArgs),
    /// Print the partition prefix for a source, format and point in time
    PartitionPrefix(PartitionPrefixArgs),
    /// Print a fresh, unique staging dataset id
    StagingDataset(SourceArgs),
    /// Print the conventional _SUCCESS marker location
    SuccessLocation(SourceArgs),
    /// Read or update the metadata document of a data source
    #[command(subcommand)]
    Metadata(MetadataCommand),
    /// Write the _SUCCESS marker
    MarkSuccess(MarkSuccessArgs),
}

#[derive(Subcommand, Debug)]
enum MetadataCommand {
    /// Print the metadata document as JSON
    Get(SourceArgs),
    /// Record the last successful prefix of a (format, market) window
    Update(UpdateArgs),
    /// Remove yesterday's checkpoint from a (format, market) window
    ClearYesterday(WindowArgs),
}

#[derive(Args, Debug)]
struct ProjectArgs {
    project_id: String,
}

#[derive(Args, Debug)]
struct IngestionBucketArgs {
    project_id: String,
    org_name: String,
    group_name: String,
}

#[derive(Args, Debug)]
struct ModelingBucketArgs {
    project_id: String,
    org_name: String,
    group_name: String,
    repo_name: String,
}

#[derive(Args, Debug)]
struct SourceArgs {
    data_source: String,
    data_source_type: String,
}

impl SourceArgs {
    fn source_ref(&self) -> SourceRef<'_> {
        SourceRef::new(&self.data_source, &self.data_source_type)
    }
}

#[derive(Args, Debug)]
struct PartitionPrefixArgs {
    #[command(flatten)]
    source: SourceArgs,
    format: String,
    #[arg(long, default_value = UNSET)]
    location: String,
    #[arg(long, default_value = UNSET)]
    year: String,
    #[arg(long, default_value = UNSET)]
    month: String,
    #[arg(long, default_value = UNSET)]
    day: String,
    #[arg(long, default_value = UNSET)]
    hour: String,
    #[arg(long, default_value = UNSET)]
    minute: String,
    #[arg(long, default_value = UNSET)]
    second: String,
}

#[derive(Args, Debug)]
struct WindowArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long)]
    market: String,
    #[arg(long)]
    format: String,
}

#[derive(Args, Debug)]
struct UpdateArgs {
    #[command(flatten)]
    window: WindowArgs,
    /// Last processed prefix
    #[arg(long)]
    prefix: String,
    /// Record yesterday's checkpoint instead of today's
    #[arg(long)]
    yesterday: bool,
    /// JSON object stored as the window's custom values
    #[arg(long)]
    custom_values: Option<String>,
}

#[derive(Args, Debug)]
struct MarkSuccessArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Marker key; defaults to {data_source}/{data_source_type}/_SUCCESS
    #[arg(long)]
    location: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::IngestionBucket(args) => {
            println!(
                "{}",
                naming::ingestion_bucket_name(&args.project_id, &args.org_name, &args.group_name)
            );
            Ok(())
        }
        Command::ModelingBucket(args) => {
            println!(
                "{}",
                naming::modeling_bucket_name(
                    &args.project_id,
                    &args.org_name,
                    &args.group_name,
                    &args.repo_name
                )
            );
            Ok(())
        }
        Command::ProjectBuckets(args) => {
            let dags = naming::dags_bucket_name(&args.project_id);
            println!("dags_bucket: {dags}");
            println!("dags_location: {}", naming::dags_location(&dags));
            println!("dataflow_bucket: {}", naming::dataflow_bucket_name(&args.project_id));
            println!("test_bucket: {}", naming::test_bucket_name(&args.project_id));
            Ok(())
        }
        Command::PartitionPrefix(args) => {
            let prefix = PartitionPrefix::new(
                args.source.data_source,
                args.source.data_source_type,
                args.format,
            )
            .location(args.location)
            .year(args.year)
            .month(args.month)
            .day(args.day)
            .hour(args.hour)
            .minute(args.minute)
            .second(args.second);
            println!("{prefix}");
            Ok(())
        }
        Command::StagingDataset(args) => {
            println!(
                "{}",
                naming::staging_dataset_id(&args.data_source, &args.data_source_type)
            );
            Ok(())
        }
        Command::SuccessLocation(args) => {
            println!(
                "{}",
                naming::success_file_location(&args.data_source, &args.data_source_type)
            );
            Ok(())
        }
        Command::Metadata(command) => handle_metadata(command).await,
        Command::MarkSuccess(args) => handle_mark_success(args).await,
    };

    if let Err(err) = &result {
        error!("{err:#}");
    }
    result
}

async fn open_metadata_store() -> Result<MetadataStore> {
    dotenvy::dotenv().ok();
    let config = StoreConfig::from_env().context("failed to read object store configuration")?;
    ensure_persistent(&config)?;
    config
        .metadata_store()
        .await
        .context("failed to configure object store")
}

async fn handle_metadata(command: MetadataCommand) -> Result<()> {
    let store = open_metadata_store().await?;

    match command {
        MetadataCommand::Get(args) => {
            match store.get(args.source_ref()).await? {
                Some(document) => {
                    println!("{}", String::from_utf8(document.to_pretty_json()?)?);
                }
                None => println!("No metadata found for {}", args.source_ref().key()),
            }
            Ok(())
        }
        MetadataCommand::Update(args) => {
            let custom_values = args
                .custom_values
                .as_deref()
                .map(parse_custom_values)
                .transpose()?;
            let source = args.window.source.source_ref();
            let window = WindowUpdate {
                market: &args.window.market,
                format: &args.window.format,
                prefix: &args.prefix,
                is_yesterday: args.yesterday,
            };

            store
                .update_with_custom_values(source, window, custom_values)
                .await?;
            info!(key = %source.key(), "metadata updated");
            Ok(())
        }
        MetadataCommand::ClearYesterday(args) => {
            let source = args.source.source_ref();
            store
                .clear_yesterday(source, &args.market, &args.format)
                .await?;
            info!(key = %source.key(), "yesterday's metadata cleared");
            Ok(())
        }
    }
}

async fn handle_mark_success(args: MarkSuccessArgs) -> Result<()> {
    let store = open_metadata_store().await?;
    let location = args.location.unwrap_or_else(|| {
        naming::success_file_location(&args.source.data_source, &args.source.data_source_type)
    });

    let content = success::mark_success(store.bucket_store().as_ref(), &location)
        .await
        .with_context(|| format!("failed to write success marker '{location}'"))?;
    info!(location = %location, content = %content, "success marker written");
    Ok(())
}

/// Every invocation is its own process, so a process-local store would start empty each time.
fn ensure_persistent(config: &StoreConfig) -> Result<()> {
    if !config.kind.is_persistent() {
        bail!("the {:?} object store does not persist between runs; set DATAENG_OBJECT_STORE_KIND=s3", config.kind);
    }
    Ok(())
}

fn parse_custom_values(raw: &str) -> Result<Map<String, Value>> {
    serde_json::from_str(raw).context("--custom-values must be a JSON object")
}
