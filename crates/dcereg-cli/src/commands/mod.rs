pub mod config;
pub mod info;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dcereg_core::params::RegistrationConfig;

/// Load a TOML config, or the defaults when no path is given.
pub fn load_config(path: Option<&PathBuf>) -> Result<RegistrationConfig> {
    let Some(path) = path else {
        return Ok(RegistrationConfig::default());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&contents).context("Invalid registration config")
}

/// Fit the series shape of `config` to the frames found in `dir`.
pub fn fit_config_to_frames(
    config: &mut RegistrationConfig,
    frame_count: usize,
    dir: &Path,
) -> Result<()> {
    let per_image = config.general.slices_per_image.max(1);
    if frame_count % per_image != 0 {
        anyhow::bail!(
            "{} frames in {} cannot be split into images of {} slices",
            frame_count,
            dir.display(),
            per_image
        );
    }
    config.general.num_images = frame_count / per_image;
    Ok(())
}
