use std::path::PathBuf;

/// Command line interface for `recon` executable
#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "recon", about = "Reconstruct a volume from tomographic projections")]
pub (super) struct Cli {
    /// TOML reconstruction configuration
    pub config: PathBuf,

    /// Maximum number of rayon threads used inside the modules
    #[clap(short = 'j', long, default_value = "4")]
    pub threads: usize,

    /// Further configurations to reconstruct after the first one, reusing the
    /// preprocessed projections whenever only back-projection settings differ
    #[clap(long)]
    pub rerun: Vec<PathBuf>,

    /// Override the number of slices reconstructed per block
    #[clap(short = 'b', long)]
    pub slice_block: Option<usize>,

    /// Keep the volume in memory only: do not write slices
    #[clap(long)]
    pub no_serialize: bool,
}
