use crate::sizes::{IconSize, IconSizes, SizeError};
use image::codecs::ico::{IcoEncoder, IcoFrame};
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageError, ImageFormat};
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::fs::Permissions;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Input image {path:?} does not exist")]
    InputNotFound { path: PathBuf },
    #[error("Input image {path:?} could not be read")]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Input image {path:?} is not a decodable PNG")]
    Decode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
    #[error("Output icon {path:?} could not be written")]
    OutputUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Unsupported icon size")]
    InvalidSize(#[from] SizeError),
    #[error("Failed to encode the {size} icon entry")]
    EncodeFrame {
        size: IconSize,
        #[source]
        source: ImageError,
    },
    #[error("Failed to encode the icon container")]
    EncodeIcon {
        #[source]
        source: ImageError,
    },
}

/// Resampling filter used to produce each icon entry.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Resampling {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    #[default]
    Lanczos3,
}

impl From<Resampling> for FilterType {
    fn from(value: Resampling) -> Self {
        match value {
            Resampling::Nearest => FilterType::Nearest,
            Resampling::Triangle => FilterType::Triangle,
            Resampling::CatmullRom => FilterType::CatmullRom,
            Resampling::Gaussian => FilterType::Gaussian,
            Resampling::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConvertJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub sizes: IconSizes,
    pub filter: Resampling,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConvertReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub sizes: IconSizes,
    pub bytes: u64,
}

impl Display for ConvertReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Converted {} to {} with multiple sizes",
            display_name(&self.input),
            display_name(&self.output)
        )
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}

/// Decode the source, resample it to every requested size and write the icon.
///
/// The output file is only replaced once the whole icon has been encoded, so a
/// failure at any step leaves whatever was at `job.output` before untouched.
#[instrument(skip(job), fields(input = ?job.input, output = ?job.output))]
pub fn convert(job: &ConvertJob) -> Result<ConvertReport, ConvertError> {
    let image = load_source(&job.input)?;
    let frames = render_frames(&image, &job.sizes, job.filter)?;
    let bytes = write_icon(&job.output, &frames)?;

    info!(bytes, sizes = %job.sizes, "Icon written");

    Ok(ConvertReport {
        input: job.input.clone(),
        output: job.output.clone(),
        sizes: job.sizes.clone(),
        bytes,
    })
}

#[instrument]
pub fn load_source(path: &Path) -> Result<DynamicImage, ConvertError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ConvertError::InputNotFound {
                path: path.to_owned(),
            });
        }
        Err(source) => {
            return Err(ConvertError::InputUnreadable {
                path: path.to_owned(),
                source,
            });
        }
    };

    let image = image::load_from_memory_with_format(&data, ImageFormat::Png).map_err(|source| {
        ConvertError::Decode {
            path: path.to_owned(),
            source,
        }
    })?;

    debug!(
        width = image.width(),
        height = image.height(),
        color = ?image.color(),
        "Decoded source image"
    );

    Ok(image)
}

/// Resample `image` to each size, stretching when the source is not square.
#[instrument(skip(image, sizes), fields(sizes = %sizes))]
pub fn render_frames(
    image: &DynamicImage,
    sizes: &IconSizes,
    filter: Resampling,
) -> Result<Vec<IcoFrame<'static>>, ConvertError> {
    let mut frames = Vec::with_capacity(sizes.len());

    for size in sizes.iter() {
        let edge = size.edge();
        let resized = image.resize_exact(edge, edge, filter.into()).into_rgba8();

        let frame = IcoFrame::as_png(resized.as_raw(), edge, edge, ExtendedColorType::Rgba8)
            .map_err(|source| ConvertError::EncodeFrame { size, source })?;

        debug!(%size, "Rendered icon entry");
        frames.push(frame);
    }

    Ok(frames)
}

/// Encode `frames` into a temporary file beside `path`, then move it into place.
#[instrument(skip(frames), fields(frames = frames.len()))]
pub fn write_icon(path: &Path, frames: &[IcoFrame<'_>]) -> Result<u64, ConvertError> {
    let unwritable = |source: io::Error| ConvertError::OutputUnwritable {
        path: path.to_owned(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // The rename below would bypass a read-only target.
    if let Ok(metadata) = std::fs::metadata(path) {
        if metadata.is_file() && metadata.permissions().readonly() {
            return Err(unwritable(io::Error::new(
                ErrorKind::PermissionDenied,
                "output file is read-only",
            )));
        }
    }

    let mut builder = tempfile::Builder::new();
    builder.prefix(".png2ico-").suffix(".tmp");
    if let Some(permissions) = output_permissions(path) {
        builder.permissions(permissions);
    }
    let mut temp = builder.tempfile_in(dir).map_err(unwritable)?;

    {
        let mut writer = BufWriter::new(&mut temp);
        IcoEncoder::new(&mut writer)
            .encode_images(frames)
            .map_err(|err| match err {
                ImageError::IoError(source) => unwritable(source),
                source => ConvertError::EncodeIcon { source },
            })?;
        writer.flush().map_err(unwritable)?;
    }

    temp.as_file().sync_all().map_err(unwritable)?;
    let bytes = temp.as_file().metadata().map_err(unwritable)?.len();

    debug!(temp = ?temp.path(), bytes, "Moving icon into place");
    temp.persist(path).map_err(|err| unwritable(err.error))?;

    Ok(bytes)
}

/// Keep the permissions of a file being replaced, otherwise use the usual
/// world-readable mode instead of the private one temp files are created with.
fn output_permissions(path: &Path) -> Option<Permissions> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => Some(metadata.permissions()),
        _ => default_permissions(),
    }
}

#[cfg(unix)]
fn default_permissions() -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions() -> Option<Permissions> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::fs::File;
    use tempfile::TempDir;

    fn write_png(dir: &Path, width: u32, height: u32) -> PathBuf {
        let path = dir.join("icon.png");
        let image = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 7) as u8, (y * 5) as u8, 128, if x == y { 0 } else { 255 }])
        });
        image.save(&path).unwrap();
        path
    }

    fn job_in(dir: &Path, input: PathBuf) -> ConvertJob {
        ConvertJob {
            input,
            output: dir.join("icon.ico"),
            sizes: IconSizes::default(),
            filter: Resampling::default(),
        }
    }

    fn entry_sizes(path: &Path) -> Vec<(u32, u32)> {
        let icon = ico::IconDir::read(File::open(path).unwrap()).unwrap();
        let mut sizes: Vec<_> = icon
            .entries()
            .iter()
            .map(|entry| (entry.width(), entry.height()))
            .collect();
        sizes.sort_unstable();
        sizes
    }

    const EXPECTED: [(u32, u32); 6] = [
        (16, 16),
        (32, 32),
        (48, 48),
        (64, 64),
        (128, 128),
        (256, 256),
    ];

    #[test]
    fn writes_one_entry_per_default_size() {
        let dir = TempDir::new().unwrap();
        let job = job_in(dir.path(), write_png(dir.path(), 300, 300));

        let report = convert(&job).unwrap();

        assert_eq!(entry_sizes(&job.output), EXPECTED);
        assert_eq!(report.bytes, std::fs::metadata(&job.output).unwrap().len());
        assert_eq!(
            report.to_string(),
            "Converted icon.png to icon.ico with multiple sizes"
        );
    }

    #[test]
    fn entries_decode_to_requested_dimensions() {
        let dir = TempDir::new().unwrap();
        let job = job_in(dir.path(), write_png(dir.path(), 64, 40));

        convert(&job).unwrap();

        let icon = ico::IconDir::read(File::open(&job.output).unwrap()).unwrap();
        for entry in icon.entries() {
            let image = entry.decode().unwrap();
            assert_eq!(image.width(), entry.width());
            assert_eq!(image.height(), entry.height());
        }
        assert_eq!(entry_sizes(&job.output), EXPECTED);
    }

    #[test]
    fn upscales_small_sources() {
        let dir = TempDir::new().unwrap();
        let job = job_in(dir.path(), write_png(dir.path(), 10, 10));

        convert(&job).unwrap();

        assert!(entry_sizes(&job.output).contains(&(256, 256)));
        assert_eq!(entry_sizes(&job.output), EXPECTED);
    }

    #[test]
    fn rerun_produces_same_entries() {
        let dir = TempDir::new().unwrap();
        let job = job_in(dir.path(), write_png(dir.path(), 128, 128));

        convert(&job).unwrap();
        let first = entry_sizes(&job.output);
        convert(&job).unwrap();
        let second = entry_sizes(&job.output);

        assert_eq!(first, second);
    }

    #[test]
    fn custom_sizes_and_filter() {
        let dir = TempDir::new().unwrap();
        let mut job = job_in(dir.path(), write_png(dir.path(), 32, 32));
        job.sizes = IconSizes::new(vec![IconSize::new(24).unwrap(), IconSize::new(1).unwrap()])
            .unwrap();
        job.filter = Resampling::Nearest;

        convert(&job).unwrap();

        assert_eq!(entry_sizes(&job.output), [(1, 1), (24, 24)]);
    }

    #[test]
    fn missing_input_is_reported_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let job = job_in(dir.path(), dir.path().join("missing.png"));

        let err = convert(&job).unwrap_err();

        assert!(matches!(err, ConvertError::InputNotFound { .. }), "{err:?}");
        assert!(!job.output.exists());
    }

    #[test]
    fn directory_input_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let job = job_in(dir.path(), dir.path().to_owned());

        let err = convert(&job).unwrap_err();

        assert!(
            matches!(err, ConvertError::InputUnreadable { .. }),
            "{err:?}"
        );
    }

    #[test]
    fn corrupt_input_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("icon.png");
        std::fs::write(&input, b"definitely not a png").unwrap();
        let job = job_in(dir.path(), input);

        let err = convert(&job).unwrap_err();

        assert!(matches!(err, ConvertError::Decode { .. }), "{err:?}");
        assert!(!job.output.exists());
    }

    #[test]
    fn failed_run_keeps_previous_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("icon.png");
        std::fs::write(&input, [0x89, b'P', b'N', b'G', 0, 0]).unwrap();
        let job = job_in(dir.path(), input);
        std::fs::write(&job.output, b"previous icon").unwrap();

        assert!(convert(&job).is_err());

        assert_eq!(std::fs::read(&job.output).unwrap(), b"previous icon");
    }

    #[test]
    fn read_only_output_is_not_replaced() {
        let dir = TempDir::new().unwrap();
        let job = job_in(dir.path(), write_png(dir.path(), 16, 16));
        std::fs::write(&job.output, b"old").unwrap();
        let mut permissions = std::fs::metadata(&job.output).unwrap().permissions();
        permissions.set_readonly(true);
        std::fs::set_permissions(&job.output, permissions).unwrap();

        let err = convert(&job).unwrap_err();

        match &err {
            ConvertError::OutputUnwritable { source, .. } => {
                assert_eq!(source.kind(), ErrorKind::PermissionDenied)
            }
            _ => panic!("unexpected error: {err:?}"),
        }
        assert_eq!(std::fs::read(&job.output).unwrap(), b"old");
        assert!(std::fs::metadata(&job.output).unwrap().permissions().readonly());
    }

    #[test]
    fn output_under_a_file_is_unwritable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let mut job = job_in(dir.path(), write_png(dir.path(), 16, 16));
        job.output = blocker.join("icon.ico");

        let err = convert(&job).unwrap_err();

        assert!(
            matches!(err, ConvertError::OutputUnwritable { .. }),
            "{err:?}"
        );
    }

    #[test]
    fn failed_replace_leaves_target_and_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let mut job = job_in(dir.path(), write_png(dir.path(), 16, 16));
        job.output = dir.path().join("occupied");
        std::fs::create_dir(&job.output).unwrap();
        std::fs::write(job.output.join("keep.txt"), b"keep").unwrap();

        let err = convert(&job).unwrap_err();

        assert!(
            matches!(err, ConvertError::OutputUnwritable { .. }),
            "{err:?}"
        );
        assert_eq!(std::fs::read(job.output.join("keep.txt")).unwrap(), b"keep");

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        names.sort();
        assert_eq!(names, ["icon.png", "occupied"]);
    }

    #[test]
    fn success_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let job = job_in(dir.path(), write_png(dir.path(), 16, 16));

        convert(&job).unwrap();

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        names.sort();
        assert_eq!(names, ["icon.ico", "icon.png"]);
    }
}
