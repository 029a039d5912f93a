use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::{Section, SectionExt};
use std::any::Any;
use std::env::temp_dir;
use std::fs::File;
use std::io;
use std::process::ExitCode;
use tracing::{info, info_span, instrument};
use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::Args;
use crate::convert::{ConvertReport, convert};
use color_eyre::Result;

mod cli;
mod config;
mod convert;
mod sizes;

fn main() -> ExitCode {
    let args = Args::parse();

    let _logger_guard = setup();

    let _span = info_span!("main").entered();

    match main_impl(args) {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn setup() -> impl Any {
    let colors = ansi_colors();

    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout only carries the confirmation line
    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(io::stderr());
    let stderr_logger = fmt::layer()
        .with_target(false)
        .with_ansi(colors)
        .with_writer(stderr_writer);

    let (file_logger, file_guard) = match create_log_file() {
        Err(e) => {
            eprintln!("Can't open log file: {e:?}");
            (None, None)
        }
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);

            let file_logger = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);

            (Some(file_logger), Some(guard))
        }
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(file_logger)
        .with(stderr_logger)
        .with(ErrorLayer::default())
        .init();

    if let Err(e) = color_eyre::config::HookBuilder::new()
        .theme(if colors {
            color_eyre::config::Theme::dark()
        } else {
            color_eyre::config::Theme::new()
        })
        .install()
    {
        eprintln!("Error installing color_eyre hook: {e:?}");
    }

    (stderr_guard, file_guard)
}

#[cfg(windows)]
fn ansi_colors() -> bool {
    ansi_term::enable_ansi_support().is_ok()
}

#[cfg(not(windows))]
fn ansi_colors() -> bool {
    use std::io::IsTerminal;
    io::stderr().is_terminal()
}

fn create_log_file() -> io::Result<File> {
    let path = temp_dir().join("png2ico.log");
    File::create(path)
}

#[instrument(skip(args))]
fn main_impl(args: Args) -> Result<ConvertReport> {
    let job = args.resolve()?;

    info!(
        input = ?job.input,
        output = ?job.output,
        sizes = %job.sizes,
        filter = ?job.filter,
        "Converting icon"
    );

    let report = convert(&job)
        .wrap_err("Error converting icon")
        .with_section(|| format!("{:?}", job.input).header("Input"))
        .with_section(|| format!("{:?}", job.output).header("Output"))?;

    info!(bytes = report.bytes, sizes = %report.sizes, "Conversion finished");

    Ok(report)
}
