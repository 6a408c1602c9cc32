//! cogsummary CLI
//!
//! Prints the land-cover class histogram of a GeoJSON AOI as JSON on stdout.

use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use cogsummary::logging::init_logging;
use cogsummary::source::{
    CatalogError, LocalScanOptions, LocalTileCatalog, StacCatalog, StacConfig, StaticCatalog,
    TileCatalog, TileLocation,
};
use cogsummary::{summarize, Aoi, GeometryError, PipelineError, SummaryOptions};
use tracing::info;

#[derive(Parser)]
#[command(name = "cogsummary")]
#[command(about = "Count land-cover classes inside an area of interest", long_about = None)]
struct Args {
    /// GeoJSON file with the AOI (the first feature is used)
    geojson: PathBuf,

    /// Land-cover year to query
    #[arg(long, default_value_t = 2019)]
    year: i32,

    /// STAC API root
    #[arg(long)]
    stac_url: Option<String>,

    /// STAC collection id
    #[arg(long)]
    collection: Option<String>,

    /// STAC item asset holding the raster
    #[arg(long)]
    asset: Option<String>,

    /// Tile path or URL to use instead of a catalog search (repeatable, merge order)
    #[arg(long = "tile", value_name = "REF", conflicts_with = "tile_dir")]
    tiles: Vec<String>,

    /// Directory of GeoTIFF tiles to use instead of a catalog search
    #[arg(long, value_name = "DIR")]
    tile_dir: Option<PathBuf>,

    /// Write clipped tiles under this directory while merging
    #[arg(long, value_name = "DIR")]
    spill_dir: Option<PathBuf>,

    /// Tiles clipped concurrently (defaults to the number of CPUs)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// More logging on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// CLI errors, each mapped to exit status 1.
#[derive(Debug)]
enum CliError {
    LoggingInit(String),
    Aoi(GeometryError),
    Catalog(CatalogError),
    Runtime(std::io::Error),
    Pipeline(PipelineError),
    Output(serde_json::Error),
}

impl CliError {
    fn exit(&self) -> ! {
        eprintln!("Error: {self}");
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {msg}"),
            CliError::Aoi(_) => write!(f, "Failed to load AOI"),
            CliError::Catalog(_) => write!(f, "Tile search failed"),
            CliError::Runtime(_) => write!(f, "Failed to start async runtime"),
            CliError::Pipeline(_) => write!(f, "Summary failed"),
            CliError::Output(_) => write!(f, "Failed to format histogram"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(_) => None,
            CliError::Aoi(e) => Some(e),
            CliError::Catalog(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::Pipeline(e) => Some(e),
            CliError::Output(e) => Some(e),
        }
    }
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        e.exit();
    }
}

fn run(args: Args) -> Result<(), CliError> {
    init_logging(args.verbose).map_err(|e| CliError::LoggingInit(e.to_string()))?;

    let aoi = Aoi::from_geojson_file(&args.geojson).map_err(CliError::Aoi)?;
    info!(path = %args.geojson.display(), crs = %aoi.crs(), "Loaded AOI");

    // Blocking catalogs run before the runtime starts
    let catalog = build_catalog(&args)?;
    let tiles = catalog.find_tiles(&aoi).map_err(CliError::Catalog)?;
    info!(tiles = tiles.len(), "Found tiles");

    let mut options = SummaryOptions::default();
    if let Some(n) = args.concurrency {
        options = options.with_max_concurrent_tiles(n);
    }
    if let Some(dir) = args.spill_dir {
        options = options.with_spill_dir(dir);
    }

    let runtime = tokio::runtime::Runtime::new().map_err(CliError::Runtime)?;
    let result = runtime.block_on(summarize(&aoi, &tiles, &options));
    // clips still on the blocking pool after a failure are abandoned, not awaited
    runtime.shutdown_background();
    let report = result.map_err(CliError::Pipeline)?;
    info!(
        crs = %report.target_crs,
        merged = report.tiles_merged,
        skipped = report.tiles_skipped,
        width = report.width,
        height = report.height,
        "Summary complete"
    );

    println!("{}", report.to_json().map_err(CliError::Output)?);
    Ok(())
}

fn build_catalog(args: &Args) -> Result<Box<dyn TileCatalog>, CliError> {
    if !args.tiles.is_empty() {
        let tiles = args.tiles.iter().map(|t| TileLocation::parse(t)).collect();
        return Ok(Box::new(StaticCatalog::new(tiles)));
    }

    if let Some(dir) = &args.tile_dir {
        return Ok(Box::new(LocalTileCatalog::new(dir, LocalScanOptions::default())));
    }

    let mut config = StacConfig::default().with_year(args.year);
    if let Some(url) = &args.stac_url {
        config = config.with_url(url);
    }
    if let Some(collection) = &args.collection {
        config = config.with_collection(collection);
    }
    if let Some(asset) = &args.asset {
        config = config.with_asset(asset);
    }
    let catalog = StacCatalog::new(config).map_err(CliError::Catalog)?;
    Ok(Box::new(catalog))
}
