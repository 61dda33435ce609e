//! Dotted override paths.
//!
//! Grammar:
//!
//! ```text
//! path   := "properties" "." category "." attribute
//!         | "models" "." group ("." segment)+
//! ```
//!
//! Under a table node a numeric segment selects the row with that index.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Top-level tree section a path addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathRoot {
    Properties,
    Models,
}

impl PathRoot {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Properties => "properties",
            Self::Models => "models",
        }
    }
}

/// Parsed override path; segments exclude the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverridePath {
    root: PathRoot,
    segments: Vec<String>,
}

/// Error for malformed override paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    Empty,
    UnknownRoot(String),
    EmptySegment { path: String },
    TooShort { path: String, min_segments: usize },
    TooLong { path: String, max_segments: usize },
}

impl Display for PathError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "override path must not be empty"),
            Self::UnknownRoot(root) => write!(
                f,
                "override path must start with `properties` or `models`, got `{root}`"
            ),
            Self::EmptySegment { path } => {
                write!(f, "override path `{path}` contains an empty segment")
            }
            Self::TooShort { path, min_segments } => write!(
                f,
                "override path `{path}` needs at least {min_segments} segments"
            ),
            Self::TooLong { path, max_segments } => write!(
                f,
                "override path `{path}` allows at most {max_segments} segments"
            ),
        }
    }
}

impl Error for PathError {}

impl OverridePath {
    /// Parses a dotted path; whitespace around segments is dropped.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }

        let mut parts = trimmed.split('.').map(str::trim);
        let root = match parts.next() {
            Some("properties") => PathRoot::Properties,
            Some("models") => PathRoot::Models,
            Some(other) => return Err(PathError::UnknownRoot(other.to_string())),
            None => return Err(PathError::Empty),
        };
        let segments: Vec<String> = parts.map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(PathError::EmptySegment {
                path: trimmed.to_string(),
            });
        }

        // Counts include the root segment.
        let count = segments.len() + 1;
        let (min_segments, max_segments) = match root {
            PathRoot::Properties => (3, Some(3)),
            PathRoot::Models => (3, None),
        };
        if count < min_segments {
            return Err(PathError::TooShort {
                path: trimmed.to_string(),
                min_segments,
            });
        }
        if let Some(max_segments) = max_segments.filter(|max| count > *max) {
            return Err(PathError::TooLong {
                path: trimmed.to_string(),
                max_segments,
            });
        }

        Ok(Self { root, segments })
    }

    pub fn root(&self) -> PathRoot {
        self.root
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl Display for OverridePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.root.as_str())?;
        for segment in &self.segments {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for OverridePath {
    type Err = PathError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{OverridePath, PathError, PathRoot};

    #[test]
    fn parses_property_and_model_paths() {
        let path = OverridePath::parse("properties.Thermal.Density").unwrap();
        assert_eq!(path.root(), PathRoot::Properties);
        assert_eq!(path.segments(), ["Thermal", "Density"]);

        let path: OverridePath = "models.EOSModel.2.reacted.A".parse().unwrap();
        assert_eq!(path.root(), PathRoot::Models);
        assert_eq!(path.segments().len(), 4);
    }

    #[test]
    fn canonical_form_drops_surrounding_whitespace() {
        let path = OverridePath::parse(" models . ElasticModel . Nu ").unwrap();
        assert_eq!(path.to_string(), "models.ElasticModel.Nu");
    }

    #[test]
    fn rejects_malformed_paths() {
        assert_eq!(OverridePath::parse("  "), Err(PathError::Empty));
        assert!(matches!(
            OverridePath::parse("metadata.name.x"),
            Err(PathError::UnknownRoot(_))
        ));
        assert!(matches!(
            OverridePath::parse("properties..Density"),
            Err(PathError::EmptySegment { .. })
        ));
        assert!(matches!(
            OverridePath::parse("models.ElasticModel"),
            Err(PathError::TooShort { .. })
        ));
        assert!(matches!(
            OverridePath::parse("properties.Thermal.Density.extra"),
            Err(PathError::TooLong { .. })
        ));
    }
}
