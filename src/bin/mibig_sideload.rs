use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mibig_sideload::app::{App, GenerateRequest, GenerateResult, PrefetchResult, RunLog};
use mibig_sideload::config::ConfigLoader;
use mibig_sideload::error::MibigError;
use mibig_sideload::output::{JsonOutput, OutputMode, StderrProgress};
use mibig_sideload::providers::doi::DoiHttpClient;
use mibig_sideload::pubmed::EutilsPubmedClient;
use mibig_sideload::store::Store;
use mibig_sideload::taxonomy::EntrezTaxonomyClient;

#[derive(Parser)]
#[command(name = "mibig-sideload")]
#[command(about = "Sideload MIBiG annotations and render static entry pages")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fill reference caches from a directory of MIBiG JSON files")]
    Prefetch(PrefetchArgs),
    #[command(about = "Generate the output directory for one MIBiG entry")]
    Generate(GenerateArgs),
}

#[derive(Args)]
struct PrefetchArgs {
    #[command(subcommand)]
    source: PrefetchSource,
}

#[derive(Subcommand)]
enum PrefetchSource {
    #[command(about = "Resolve DOIs")]
    Doi(PrefetchTarget),
    #[command(about = "Resolve PubMed ids")]
    Pubmed(PrefetchTarget),
}

#[derive(Args)]
struct PrefetchTarget {
    input_dir: Utf8PathBuf,
    cache: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct GenerateArgs {
    annotation: Utf8PathBuf,

    #[arg(
        long,
        help = "Directory of record snapshots named <locus accession>.json"
    )]
    records: Utf8PathBuf,

    #[arg(long)]
    output: Utf8PathBuf,

    #[arg(long)]
    cache_dir: Option<Utf8PathBuf>,

    #[arg(long)]
    log_file: Option<Utf8PathBuf>,

    #[arg(long)]
    no_zip: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<MibigError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MibigError) -> u8 {
    match error {
        MibigError::ReuseInvalidated(_)
        | MibigError::MissingGeneReference { .. }
        | MibigError::GeneOutsideCluster(_)
        | MibigError::UnrecognizedTaxon { .. }
        | MibigError::AnnotationParse { .. }
        | MibigError::InvalidDoi(_)
        | MibigError::InvalidPmid(_)
        | MibigError::InvalidPublication(_)
        | MibigError::ConfigRead(_)
        | MibigError::ConfigParse(_) => 2,
        MibigError::CrossrefHttp(_)
        | MibigError::CrossrefStatus { .. }
        | MibigError::PubmedHttp(_)
        | MibigError::PubmedStatus { .. }
        | MibigError::TaxonomyHttp(_)
        | MibigError::DoiResolution(_)
        | MibigError::LookupMiss { .. } => 3,
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
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Prefetch(args) => {
            let store = Store::new(
                Utf8PathBuf::from("."),
                config.cache_dir.clone(),
                Utf8PathBuf::from("."),
            );
            let doi_cache = store.reference_cache_path(&config.doi_cache);
            let pubmed_cache = store.reference_cache_path(&config.pubmed_cache);
            let email = config.ncbi_email.clone();
            let app = App::new(
                store,
                config,
                RunLog::default(),
                DoiHttpClient::new()?,
                EutilsPubmedClient::new()?,
                EntrezTaxonomyClient::new(email)?,
            );
            let result = match args.source {
                PrefetchSource::Doi(target) => {
                    let cache = target.cache.unwrap_or(doi_cache);
                    match output_mode {
                        OutputMode::NonInteractive => {
                            app.prefetch_dois(&target.input_dir, &cache, &JsonOutput)?
                        }
                        OutputMode::Interactive => {
                            app.prefetch_dois(&target.input_dir, &cache, &StderrProgress)?
                        }
                    }
                }
                PrefetchSource::Pubmed(target) => {
                    let cache = target.cache.unwrap_or(pubmed_cache);
                    match output_mode {
                        OutputMode::NonInteractive => {
                            app.prefetch_pubmed(&target.input_dir, &cache, &JsonOutput)?
                        }
                        OutputMode::Interactive => {
                            app.prefetch_pubmed(&target.input_dir, &cache, &StderrProgress)?
                        }
                    }
                }
            };
            report_prefetch(&result, output_mode)
        }
        Commands::Generate(args) => {
            let mut config = config;
            if let Some(cache_dir) = args.cache_dir {
                config.cache_dir = cache_dir;
            }
            if args.no_zip {
                config.zip = false;
            }
            let store = Store::new(args.output, config.cache_dir.clone(), args.records);
            let email = config.ncbi_email.clone();
            let app = App::new(
                store,
                config,
                RunLog::new(args.log_file),
                DoiHttpClient::new()?,
                EutilsPubmedClient::new()?,
                EntrezTaxonomyClient::new(email)?,
            );
            let request = GenerateRequest {
                annotation_path: args.annotation,
            };
            let result = match output_mode {
                OutputMode::NonInteractive => app.generate(&request, &JsonOutput)?,
                OutputMode::Interactive => app.generate(&request, &StderrProgress)?,
            };
            report_generate(&result, output_mode)
        }
    }
}

fn report_prefetch(result: &PrefetchResult, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_prefetch(result).into_diagnostic()?,
        OutputMode::Interactive => {
            println!(
                "{} cache {}: {} identifiers from {} files, {} fetched",
                result.kind, result.cache_path, result.identifiers, result.files, result.fetched
            );
        }
    }
    Ok(())
}

fn report_generate(result: &GenerateResult, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_generate(result).into_diagnostic()?,
        OutputMode::Interactive => {
            println!("{} {} -> {}", result.accession, result.action, result.index_path);
            for alteration in &result.alterations {
                println!("   {alteration}");
            }
            if let Some(zip) = &result.zip_path {
                println!("   archive: {zip}");
            }
        }
    }
    Ok(())
}
