use serde::{Deserialize, Deserializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Largest edge length an ICO directory entry can describe.
pub const MAX_ICON_EDGE: u32 = 256;

/// Sizes written when nothing else is requested. 24x24 is not part of the list.
pub const DEFAULT_ICON_EDGES: [u32; 6] = [256, 128, 64, 48, 32, 16];

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum SizeError {
    #[error("Icon size must be positive")]
    Zero,
    #[error("Icon size {0} exceeds the ICO maximum of {max}", max = MAX_ICON_EDGE)]
    TooLarge(u32),
    #[error("Icon size {width}x{height} is not square")]
    NotSquare { width: u32, height: u32 },
    #[error("Invalid icon size {0:?}, expected N or NxN")]
    Malformed(String),
    #[error("Icon size list is empty")]
    Empty,
    #[error("Icon size {0} is requested more than once")]
    Duplicate(IconSize),
}

/// Edge length of one square icon entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct IconSize(u32);

impl IconSize {
    pub fn new(edge: u32) -> Result<Self, SizeError> {
        match edge {
            0 => Err(SizeError::Zero),
            edge if edge > MAX_ICON_EDGE => Err(SizeError::TooLarge(edge)),
            edge => Ok(Self(edge)),
        }
    }

    pub fn from_pair(width: u32, height: u32) -> Result<Self, SizeError> {
        if width != height {
            return Err(SizeError::NotSquare { width, height });
        }
        Self::new(width)
    }

    pub fn edge(self) -> u32 {
        self.0
    }
}

impl Display for IconSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{0}x{0}", self.0)
    }
}

impl FromStr for IconSize {
    type Err = SizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| SizeError::Malformed(s.to_owned()))
        };

        match s.split_once(['x', 'X']) {
            Some((width, height)) => Self::from_pair(parse(width)?, parse(height)?),
            None => Self::new(parse(s)?),
        }
    }
}

/// Either `48` or `"48x48"` in a config file.
impl<'de> Deserialize<'de> for IconSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum IconSizeS {
            Edge(u32),
            Text(String),
        }

        let size = match IconSizeS::deserialize(deserializer)? {
            IconSizeS::Edge(edge) => IconSize::new(edge),
            IconSizeS::Text(text) => text.parse(),
        };
        size.map_err(serde::de::Error::custom)
    }
}

/// Ordered, non-empty list of distinct icon sizes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IconSizes(Vec<IconSize>);

impl IconSizes {
    pub fn new(sizes: Vec<IconSize>) -> Result<Self, SizeError> {
        if sizes.is_empty() {
            return Err(SizeError::Empty);
        }

        for (i, size) in sizes.iter().enumerate() {
            if sizes[..i].contains(size) {
                return Err(SizeError::Duplicate(*size));
            }
        }

        Ok(Self(sizes))
    }

    pub fn iter(&self) -> impl Iterator<Item = IconSize> + '_ {
        self.0.iter().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

impl Default for IconSizes {
    fn default() -> Self {
        Self(DEFAULT_ICON_EDGES.into_iter().map(IconSize).collect())
    }
}

impl Display for IconSizes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, size) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{size}")?;
        }
        Ok(())
    }
}
