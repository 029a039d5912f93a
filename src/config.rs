use crate::cli::Args;
use crate::convert::{ConvertError, ConvertJob, Resampling};
use crate::sizes::{IconSize, IconSizes};
use color_eyre::eyre::WrapErr;
use color_eyre::{Result, Section, SectionExt};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

pub const DEFAULT_INPUT: &str = "icons/icon.png";
pub const DEFAULT_OUTPUT: &str = "icons/icon.ico";

/// Conversion settings read from a TOML file. Anything left out falls back to
/// the built-in defaults.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub sizes: Option<Vec<IconSize>>,
    pub filter: Option<Resampling>,
}

impl Config {
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err("Error reading config file")
            .with_section(|| format!("{path:?}").header("Config file"))?;
        let config = Self::parse(&contents)
            .with_section(|| format!("{path:?}").header("Config file"))?;

        debug!(?config, "Loaded config");

        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).wrap_err("Error parsing config")
    }

    /// Command line flags win over the file.
    pub fn overridden_by(self, args: Args) -> Self {
        Self {
            input: args.input.or(self.input),
            output: args.output.or(self.output),
            sizes: if args.sizes.is_empty() {
                self.sizes
            } else {
                Some(args.sizes)
            },
            filter: args.filter.or(self.filter),
        }
    }

    pub fn into_job(self) -> Result<ConvertJob, ConvertError> {
        let sizes = match self.sizes {
            Some(sizes) => IconSizes::new(sizes)?,
            None => IconSizes::default(),
        };

        Ok(ConvertJob {
            input: self.input.unwrap_or_else(|| DEFAULT_INPUT.into()),
            output: self.output.unwrap_or_else(|| DEFAULT_OUTPUT.into()),
            sizes,
            filter: self.filter.unwrap_or_default(),
        })
    }
}
