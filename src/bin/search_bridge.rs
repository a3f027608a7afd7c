use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use search_bridge::app::{Gateway, GatewayOptions};
use search_bridge::catalog::CatalogHttpClient;
use search_bridge::config::ConfigLoader;
use search_bridge::domain::Filter;
use search_bridge::error::BridgeError;
use search_bridge::filter_mapper::FilterMapper;
use search_bridge::ontology::OntologyService;
use search_bridge::output::JsonOutput;
use search_bridge::scoring::ScoringHttpClient;

type HttpGateway = Gateway<CatalogHttpClient, ScoringHttpClient, OntologyService>;

#[derive(Parser)]
#[command(name = "search-bridge")]
#[command(about = "Standardized scientific-data search served from a catalog backend")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to search-bridge.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Query datasets")]
    Datasets(DatasetArgs),
    #[command(about = "Query documents")]
    Documents(EntityArgs),
    #[command(about = "Query instruments")]
    Instruments(EntityArgs),
    #[command(about = "Query samples")]
    Samples(SampleArgs),
    #[command(about = "Show gateway status")]
    Status,
}

#[derive(Args)]
struct DatasetArgs {
    #[command(subcommand)]
    command: DatasetCommand,
}

#[derive(Subcommand)]
enum DatasetCommand {
    Find(FindArgs),
    Get(GetArgs),
    Count(CountArgs),
    #[command(about = "List the files of a dataset")]
    Files(GetArgs),
    #[command(about = "Count the files of a dataset")]
    CountFiles(CountFilesArgs),
}

#[derive(Args)]
struct EntityArgs {
    #[command(subcommand)]
    command: EntityCommand,
}

#[derive(Subcommand)]
enum EntityCommand {
    Find(FindArgs),
    Get(GetArgs),
    Count(CountArgs),
}

#[derive(Args)]
struct SampleArgs {
    #[command(subcommand)]
    command: SampleCommand,
}

#[derive(Subcommand)]
enum SampleCommand {
    Find(FindArgs),
}

#[derive(Args)]
struct FindArgs {
    /// JSON-encoded filter.
    #[arg(long)]
    filter: Option<String>,

    /// Free-text relevance query.
    #[arg(long)]
    query: Option<String>,
}

#[derive(Args)]
struct GetArgs {
    #[arg(long)]
    id: String,

    #[arg(long)]
    filter: Option<String>,
}

#[derive(Args)]
struct CountArgs {
    /// JSON-encoded where clause.
    #[arg(long = "where")]
    where_clause: Option<String>,
}

#[derive(Args)]
struct CountFilesArgs {
    #[arg(long)]
    id: String,

    #[arg(long = "where")]
    where_clause: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<BridgeError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BridgeError) -> u8 {
    match error {
        BridgeError::CatalogHttp(_)
        | BridgeError::CatalogStatus { .. }
        | BridgeError::ScoringHttp(_)
        | BridgeError::ScoringStatus { .. }
        | BridgeError::OntologyHttp(_)
        | BridgeError::OntologyStatus { .. }
        | BridgeError::MalformedPayload(_) => 3,
        BridgeError::ConfigRead(_) | BridgeError::ConfigParse(_) => 2,
        other if other.is_client_error() => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let gateway = build_gateway(cli.config.as_deref())?;

    match cli.command {
        Commands::Datasets(args) => run_datasets(&gateway, args.command),
        Commands::Documents(args) => run_documents(&gateway, args.command),
        Commands::Instruments(args) => run_instruments(&gateway, args.command),
        Commands::Samples(args) => match args.command {
            SampleCommand::Find(find) => print(&gateway.find_samples(&parse_filter(find.filter.as_deref())?)?),
        },
        Commands::Status => print(&gateway.status()),
    }
}

fn build_gateway(config: Option<&str>) -> Result<HttpGateway, BridgeError> {
    let config = ConfigLoader::resolve(config)?;
    let catalog = CatalogHttpClient::new(&config.catalog_url)?;
    let scoring = ScoringHttpClient::new(&config.scoring_url, config.pass_ids_to_scoring)?;
    let ontology = OntologyService::from_url(config.ontology_url.as_deref())?;
    let mapper = FilterMapper::new(config.technique_strategy()?);
    Ok(Gateway::new(
        catalog,
        scoring,
        ontology,
        mapper,
        GatewayOptions::from(&config),
    ))
}

fn run_datasets(gateway: &HttpGateway, command: DatasetCommand) -> miette::Result<()> {
    match command {
        DatasetCommand::Find(args) => {
            let filter = parse_filter(args.filter.as_deref())?;
            print(&gateway.find_datasets(&filter, args.query.as_deref())?)
        }
        DatasetCommand::Get(args) => {
            let filter = parse_filter(args.filter.as_deref())?;
            print(&gateway.find_dataset(&args.id, &filter)?)
        }
        DatasetCommand::Count(args) => {
            print(&gateway.count_datasets(parse_where(args.where_clause.as_deref())?)?)
        }
        DatasetCommand::Files(args) => {
            let filter = parse_filter(args.filter.as_deref())?;
            print(&gateway.find_files(&args.id, &filter)?)
        }
        DatasetCommand::CountFiles(args) => {
            print(&gateway.count_files(&args.id, parse_where(args.where_clause.as_deref())?)?)
        }
    }
}

fn run_documents(gateway: &HttpGateway, command: EntityCommand) -> miette::Result<()> {
    match command {
        EntityCommand::Find(args) => {
            let filter = parse_filter(args.filter.as_deref())?;
            print(&gateway.find_documents(&filter, args.query.as_deref())?)
        }
        EntityCommand::Get(args) => {
            let filter = parse_filter(args.filter.as_deref())?;
            print(&gateway.find_document(&args.id, &filter)?)
        }
        EntityCommand::Count(args) => {
            print(&gateway.count_documents(parse_where(args.where_clause.as_deref())?)?)
        }
    }
}

fn run_instruments(gateway: &HttpGateway, command: EntityCommand) -> miette::Result<()> {
    match command {
        EntityCommand::Find(args) => {
            let filter = parse_filter(args.filter.as_deref())?;
            print(&gateway.find_instruments(&filter)?)
        }
        EntityCommand::Get(args) => {
            let filter = parse_filter(args.filter.as_deref())?;
            print(&gateway.find_instrument(&args.id, &filter)?)
        }
        EntityCommand::Count(args) => {
            print(&gateway.count_instruments(parse_where(args.where_clause.as_deref())?)?)
        }
    }
}

fn parse_filter(raw: Option<&str>) -> Result<Filter, BridgeError> {
    raw.unwrap_or_default().parse()
}

fn parse_where(raw: Option<&str>) -> Result<Option<Value>, BridgeError> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|err| BridgeError::InvalidFilterJson(err.to_string())),
        None => Ok(None),
    }
}

fn print<T: Serialize>(value: &T) -> miette::Result<()> {
    JsonOutput::print(value).into_diagnostic()
}
