use anyhow::{Context, Result};
use cfsi::config::{Config, QUEUE_TIMEOUT};
use cfsi::core::cloud_mask::{CloudDetector, CloudDetectorParams, MODEL_BAND_INDICES};
use cfsi::core::dataset_doc::build_dataset_doc;
use cfsi::core::indexer::{index_prefix, FailurePolicy};
use cfsi::core::pipeline::{GdalBandSource, MaskPipeline};
use cfsi::core::products::{product_for_bucket, L1C_BUCKET, S2_L1C};
use cfsi::core::OnnxCloudClassifier;
use cfsi::io::{FileIndex, ObjectStore, S3Store, TileMetadataParser};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sentinel-2 tile indexing and cloud masking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index every tile metadata document under a bucket prefix
    Index(IndexArgs),
    /// Generate cloud and cloud-shadow masks for indexed tiles
    Masks(MaskArgs),
    /// Print the catalog document for a single metadata object
    ShowDoc(ShowDocArgs),
}

#[derive(Args, Debug)]
struct IndexArgs {
    #[arg(long, default_value = L1C_BUCKET)]
    bucket: String,
    #[arg(long, default_value = "tiles/35/P/PM/2020/10/")]
    prefix: String,
    /// Log and skip tiles that cannot be fetched or parsed
    #[arg(long)]
    keep_going: bool,
}

#[derive(Args, Debug)]
struct MaskArgs {
    #[arg(long, default_value = S2_L1C.name)]
    product: String,
    /// Stop after this many tiles
    #[arg(long)]
    limit: Option<usize>,
    /// Skip tiles over the cloud-cover ceiling instead of stopping
    #[arg(long)]
    skip_cloudy: bool,
    #[arg(long, default_value_t = 0.0)]
    nodata: f64,
}

#[derive(Args, Debug)]
struct ShowDocArgs {
    #[arg(long, default_value = L1C_BUCKET)]
    bucket: String,
    #[arg(long)]
    key: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    config
        .apply_gdal_options()
        .context("failed to configure GDAL S3 access")?;

    match cli.command {
        Command::Index(args) => handle_index(&config, args),
        Command::Masks(args) => handle_masks(&config, args),
        Command::ShowDoc(args) => handle_show_doc(&config, args),
    }
}

fn handle_index(config: &Config, args: IndexArgs) -> Result<()> {
    let store = S3Store::connect(&args.bucket, &config.aws)
        .with_context(|| format!("failed to connect to s3://{}", args.bucket))?;
    let mut index = FileIndex::open(&config.index_dir)
        .with_context(|| format!("failed to open index at {}", config.index_dir.display()))?;

    let policy = if args.keep_going {
        FailurePolicy::Continue
    } else {
        FailurePolicy::Abort
    };

    let report = index_prefix(&store, &mut index, &args.prefix, policy, QUEUE_TIMEOUT)
        .with_context(|| format!("indexing s3://{}/{} failed", args.bucket, args.prefix))?;

    println!(
        "Indexed {} tiles: {} added, {} updated, {} skipped, {} failed",
        report.processed(),
        report.added,
        report.updated,
        report.skipped,
        report.failed
    );
    Ok(())
}

fn handle_masks(config: &Config, args: MaskArgs) -> Result<()> {
    let index = FileIndex::open(&config.index_dir)
        .with_context(|| format!("failed to open index at {}", config.index_dir.display()))?;

    let model_path = config.cloud_model()?;
    let classifier = OnnxCloudClassifier::load(model_path, MODEL_BAND_INDICES.len())
        .context("failed to load cloud classifier")?;
    let detector = CloudDetector::new(classifier, CloudDetectorParams::default());

    let pipeline = MaskPipeline::new(detector, GdalBandSource, config.output_dir.clone())
        .with_nodata(args.nodata);

    let report = pipeline
        .run(&index, &args.product, args.limit, args.skip_cloudy)
        .context("mask generation failed")?;

    for path in &report.written {
        println!("{}", path.display());
    }
    if report.skipped_cloudy > 0 {
        println!("Skipped {} tiles over the cloud-cover ceiling", report.skipped_cloudy);
    }
    Ok(())
}

fn handle_show_doc(config: &Config, args: ShowDocArgs) -> Result<()> {
    let store = S3Store::connect(&args.bucket, &config.aws)
        .with_context(|| format!("failed to connect to s3://{}", args.bucket))?;
    let content = store
        .get_string(&args.key)
        .with_context(|| format!("failed to fetch s3://{}/{}", args.bucket, args.key))?;

    let metadata = TileMetadataParser::parse(&content).context("failed to parse tile metadata")?;
    let doc = build_dataset_doc(&args.bucket, &args.key, &metadata, product_for_bucket(&args.bucket))?;

    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}
