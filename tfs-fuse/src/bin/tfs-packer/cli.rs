use clap::Parser;
use std::path::PathBuf;

/// Pack a host directory into a TFS flash image
#[derive(Parser)]
pub struct Cli {
    /// Source directory whose files go into the image
    #[arg(long, short)]
    pub source: PathBuf,

    /// Output image path
    #[arg(long, short = 'O')]
    pub image: PathBuf,

    /// Number of flash blocks in the image
    #[arg(long, short, default_value_t = 764)]
    pub blocks: usize,
}
