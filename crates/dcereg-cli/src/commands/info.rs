use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use dcereg_core::io::image_io::{list_frames, load_image};
use dcereg_core::params::ParameterSet;

use super::{fit_config_to_frames, load_config};

#[derive(Args)]
pub struct InfoArgs {
    /// Directory of frames, in viewer slice order
    pub dir: PathBuf,

    /// Registration config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let frames = list_frames(&args.dir)
        .with_context(|| format!("No frames found in {}", args.dir.display()))?;
    let first = load_image(&frames[0])
        .with_context(|| format!("Failed to read {}", frames[0].display()))?;
    let (h, w) = first.dim();

    let mut config = load_config(args.config.as_ref())?;
    fit_config_to_frames(&mut config, frames.len(), &args.dir)?;
    let params = ParameterSet::build(&config, [w, h, config.general.slices_per_image])
        .context("Invalid registration parameters")?;

    println!("Directory:   {}", args.dir.display());
    println!("Frames:      {}", frames.len());
    println!("Dimensions:  {}x{}", w, h);
    crate::summary::print_parameter_summary(&params);

    Ok(())
}
