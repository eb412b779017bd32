//! emberray command-line interface.
//!
//! Small operator tools around the texture library:
//! - `probe`: print the metadata the texture manager derives for a file
//! - `merge`: fold partial renders into one sample-weighted output

mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};

use emberray::device::DeviceInfo;
use emberray::io::CodecImageIo;
use emberray::merge::ImageMerger;
use emberray::texture::{AddImageParams, ImageIdentity, ImageManager};
use error::CliError;

#[derive(Parser)]
#[command(name = "emberray")]
#[command(version = emberray::VERSION)]
#[command(about = "Texture tools for the emberray renderer", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the metadata the texture manager derives for an image file.
    Probe {
        /// Image file to inspect.
        path: PathBuf,
    },

    /// Merge partial renders of one scene into a single output.
    Merge {
        /// Input files; pass once per file.
        #[arg(short, long = "input", required = true)]
        input: Vec<PathBuf>,

        /// Merged output file, written atomically.
        #[arg(short, long)]
        output: PathBuf,

        /// Let later files overwrite copy-class channels (Depth, object
        /// indexes) instead of keeping the first file's values.
        #[arg(long)]
        last_writer_wins: bool,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(error) = run(cli.command) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Probe { path } => probe(&path),
        Commands::Merge {
            input,
            output,
            last_writer_wins,
        } => merge(input, output, last_writer_wins),
    }
}

fn probe(path: &Path) -> Result<(), CliError> {
    let mut manager = ImageManager::new(&DeviceInfo::cpu());
    let (_, metadata) =
        manager.add_image(ImageIdentity::file(path), AddImageParams::default())?;

    println!("{}", path.display());
    println!(
        "  resolution:      {} x {} x {}",
        metadata.width,
        metadata.height,
        metadata.depth.max(1)
    );
    println!("  channels:        {}", metadata.channels);
    println!("  pixel kind:      {}", metadata.kind.type_name());
    println!("  colorspace:      {}", metadata.colorspace.as_str());
    println!("  sRGB compressed: {}", metadata.compress_as_srgb);
    Ok(())
}

fn merge(input: Vec<PathBuf>, output: PathBuf, last_writer_wins: bool) -> Result<(), CliError> {
    let mut merger = ImageMerger::new(Arc::new(CodecImageIo));
    merger.input = input;
    merger.output = output;
    merger.params.copy_first_writer_wins = !last_writer_wins;
    merger.run()?;

    println!("wrote {}", merger.output.display());
    Ok(())
}
