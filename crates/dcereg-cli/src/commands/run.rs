use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use anyhow::{Context, Result};
use clap::Args;
use dcereg_core::image::{ImageGeometry, ImageSeries};
use dcereg_core::io::image_io::{list_frames, load_image, save_image};
use dcereg_core::manager::RegistrationManager;
use dcereg_core::params::ParameterSet;
use dcereg_core::progress::{ChannelProgressReporter, ProgressEvent};
use indicatif::{ProgressBar, ProgressStyle};

use super::{fit_config_to_frames, load_config};

#[derive(Args)]
pub struct RunArgs {
    /// Directory of frames, in viewer slice order
    pub dir: PathBuf,

    /// Registration config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Fixed image number (1-based), overriding the config
    #[arg(long)]
    pub fixed: Option<usize>,

    /// Output directory for registered frames
    #[arg(short, long, default_value = "registered")]
    pub output: PathBuf,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let paths = list_frames(&args.dir)
        .with_context(|| format!("No frames found in {}", args.dir.display()))?;
    let slices = paths
        .iter()
        .map(|p| load_image(p).with_context(|| format!("Failed to read {}", p.display())))
        .collect::<Result<Vec<_>>>()?;
    let (h, w) = slices[0].dim();

    let mut config = load_config(args.config.as_ref())?;
    fit_config_to_frames(&mut config, slices.len(), &args.dir)?;
    if let Some(fixed) = args.fixed {
        config.general.fixed_image_number = fixed;
    }
    let params = ParameterSet::build(&config, [w, h, config.general.slices_per_image])
        .context("Invalid registration parameters")?;
    crate::summary::print_parameter_summary(&params);

    let series = ImageSeries::from_slices(
        slices,
        params.slices_per_image,
        params.flipped_data,
        ImageGeometry::default(),
    )?;
    let moving_count = params.num_images.saturating_sub(1) as u64;

    let (tx, rx) = mpsc::channel();
    let reporter = Arc::new(ChannelProgressReporter::new(tx));
    let handle = RegistrationManager::start(params.clone(), series, reporter)?;

    let pb = ProgressBar::new(moving_count);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:44} [{bar:40}] {pos}/{len}")?
            .progress_chars("=> "),
    );

    for event in rx {
        match event {
            ProgressEvent::ImageStarted { index, .. } => {
                pb.set_message(format!("Image {}", params.index_to_slice_number(index)));
            }
            ProgressEvent::Progress(p) => {
                pb.set_message(format!(
                    "Image {} {} L{}/{} it {} ({:.4})",
                    params.index_to_slice_number(p.current_image_index),
                    p.stage,
                    p.level + 1,
                    p.num_levels,
                    p.iteration,
                    p.metric_value
                ));
            }
            ProgressEvent::ImageFinished { .. } => pb.inc(1),
        }
    }

    let report = handle.wait()?;
    pb.finish_with_message("Done");

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let out_slices = report.series.clone().into_slices();
    for (path, slice) in paths.iter().zip(out_slices.iter()) {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frame".into());
        let out = args.output.join(format!("{name}.tiff"));
        save_image(slice, &out).with_context(|| format!("Failed to write {}", out.display()))?;
    }

    crate::summary::print_report_summary(&params, &report);
    println!("\nOutput saved to {}", args.output.display());
    Ok(())
}
