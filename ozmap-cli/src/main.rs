use anyhow::Result;
use clap::{Parser, Subcommand};
use ozmap::DecoderKind;
use std::path::PathBuf;

mod commands;

use commands::LibraryArgs;

/// OziExplorer raster map CLI tool
#[derive(Parser)]
#[command(name = "ozmap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory scanned recursively for .map files
    #[arg(short, long, env = "OZMAP_MAPS_DIR", global = true)]
    maps_dir: Option<PathBuf>,

    /// Tile cache size as a multiple of the tiles one viewport needs
    #[arg(
        short,
        long,
        env = "OZMAP_CACHE_FACTOR",
        default_value = "3",
        global = true
    )]
    cache_factor: f64,

    /// Tile decoder: portable or streaming
    #[arg(long, env = "OZMAP_DECODER", default_value = "portable", global = true)]
    decoder: DecoderKind,

    /// JSON file persisting the parsed map library
    #[arg(long, env = "OZMAP_INDEX_FILE", global = true)]
    index_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display information about a .map file or an .ozf2/.ozfx3 image
    Info {
        /// Path to a .map file or an image container
        path: PathBuf,
    },

    /// List every map in the library
    List,

    /// Find the maps covering a coordinate
    Query {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Convert between lat/lon and map pixels
    Locate {
        /// Path to the .map file
        #[arg(long)]
        map: PathBuf,

        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true, requires = "lon", conflicts_with_all = ["x", "y"])]
        lat: Option<f64>,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lon: Option<f64>,

        /// Pixel column at the given zoom
        #[arg(short, long, allow_hyphen_values = true, requires = "y")]
        x: Option<f64>,

        /// Pixel row at the given zoom
        #[arg(short, long, allow_hyphen_values = true, requires = "x")]
        y: Option<f64>,

        /// Zoom factor
        #[arg(short, long, default_value = "1")]
        zoom: f64,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Render a viewport centred on a coordinate to a PNG file
    Render {
        /// Path to the .map file
        #[arg(long)]
        map: PathBuf,

        /// Latitude of the viewport centre
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude of the viewport centre
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Zoom factor
        #[arg(short, long, default_value = "1")]
        zoom: f64,

        /// Viewport width in pixels
        #[arg(long, default_value = "800")]
        width: u32,

        /// Viewport height in pixels
        #[arg(long, default_value = "480")]
        height: u32,

        /// Output PNG file
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let library = LibraryArgs {
        maps_dir: cli.maps_dir,
        cache_factor: cli.cache_factor,
        decoder: cli.decoder,
        index_file: cli.index_file,
    };

    match cli.command {
        Commands::Info { path } => commands::info::run(path),
        Commands::List => commands::list::run(&library),
        Commands::Query { lat, lon, json } => commands::query::run(&library, lat, lon, json),
        Commands::Locate {
            map,
            lat,
            lon,
            x,
            y,
            zoom,
            json,
        } => {
            let target = match (lat.zip(lon), x.zip(y)) {
                (Some((lat, lon)), _) => commands::locate::Target::Geo { lat, lon },
                (None, Some((x, y))) => commands::locate::Target::Pixel { x, y },
                (None, None) => anyhow::bail!("Either --lat/--lon or --x/--y is required"),
            };
            commands::locate::run(&library, map, target, zoom, json)
        }
        Commands::Render {
            map,
            lat,
            lon,
            zoom,
            width,
            height,
            output,
        } => commands::render::run(&library, map, lat, lon, zoom, width, height, output),
    }
}
