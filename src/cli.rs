use crate::config::Config;
use crate::convert::{ConvertJob, Resampling};
use crate::sizes::IconSize;
use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use std::path::PathBuf;
use tracing::instrument;

/// Convert a PNG image into a multi-resolution Windows icon.
///
/// Without arguments `icons/icon.png` is converted to `icons/icon.ico` with
/// 256, 128, 64, 48, 32 and 16 pixel entries.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Source PNG image
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Icon file to write
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Entry size, repeat for several entries (replaces the default list)
    #[arg(short, long = "size", value_name = "N|NxN")]
    pub sizes: Vec<IconSize>,

    /// Resampling filter
    #[arg(short, long, value_enum)]
    pub filter: Option<Resampling>,

    /// TOML file with `input`, `output`, `sizes` and `filter` keys
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Args {
    #[instrument(skip(self), fields(config = ?self.config))]
    pub fn resolve(self) -> Result<ConvertJob> {
        let config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        let job = config
            .overridden_by(self)
            .into_job()
            .wrap_err("Invalid icon sizes")?;

        Ok(job)
    }
}
