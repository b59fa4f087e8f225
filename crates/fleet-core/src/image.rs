//! Container image reference resolution.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Architecture;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    /// Pulled from a registry: `123456789012.dkr.ecr.ap-southeast-1.amazonaws.com/repo:tag`
    /// or a hub-style name such as `tedytirta/demo-docker-ecs`.
    Registry { repository: String, tag: String },
    /// Built locally from a directory: `asset:../app#linux/arm64`.
    LocalAsset {
        directory: String,
        platform: Option<Architecture>,
    },
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("empty image reference")]
    Empty,
    #[error("invalid image reference: {0}")]
    Invalid(String),
    #[error("unknown asset platform: {0}")]
    UnknownPlatform(String),
}

impl ImageRef {
    pub fn parse(image: &str) -> Result<Self, ImageError> {
        let image = image.trim();
        if image.is_empty() {
            return Err(ImageError::Empty);
        }

        if let Some(rest) = image.strip_prefix("asset:") {
            let (directory, platform) = match rest.split_once('#') {
                Some((dir, p)) => {
                    let arch = Architecture::from_platform(p)
                        .ok_or_else(|| ImageError::UnknownPlatform(p.to_string()))?;
                    (dir, Some(arch))
                }
                None => (rest, None),
            };
            if directory.is_empty() {
                return Err(ImageError::Invalid(image.to_string()));
            }
            return Ok(ImageRef::LocalAsset {
                directory: directory.to_string(),
                platform,
            });
        }

        if image.contains(char::is_whitespace) {
            return Err(ImageError::Invalid(image.to_string()));
        }

        // A ':' after the last '/' separates the tag; one before it is a registry port.
        let last_slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match image[last_slash..].rsplit_once(':') {
            Some((name, tag)) if !tag.is_empty() => {
                (format!("{}{}", &image[..last_slash], name), tag.to_string())
            }
            Some(_) => return Err(ImageError::Invalid(image.to_string())),
            None => (image.to_string(), "latest".to_string()),
        };

        Ok(ImageRef::Registry { repository, tag })
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ImageRef::LocalAsset { .. })
    }

    /// The string handed to the task definition.
    pub fn reference(&self) -> String {
        match self {
            ImageRef::Registry { repository, tag } => format!("{repository}:{tag}"),
            ImageRef::LocalAsset {
                directory,
                platform: Some(arch),
            } => format!("asset:{directory}#{}", arch.platform()),
            ImageRef::LocalAsset {
                directory,
                platform: None,
            } => format!("asset:{directory}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hub_style_defaults_tag() {
        let img = ImageRef::parse("tedytirta/demo-docker-ecs").unwrap();
        assert_eq!(
            img,
            ImageRef::Registry {
                repository: "tedytirta/demo-docker-ecs".to_string(),
                tag: "latest".to_string(),
            }
        );
    }

    #[test]
    fn parse_private_registry_with_tag() {
        let img =
            ImageRef::parse("452922823873.dkr.ecr.ap-southeast-1.amazonaws.com/web:v2").unwrap();
        assert_eq!(
            img.reference(),
            "452922823873.dkr.ecr.ap-southeast-1.amazonaws.com/web:v2"
        );
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let img = ImageRef::parse("localhost:5000/web").unwrap();
        assert_eq!(img.reference(), "localhost:5000/web:latest");
    }

    #[test]
    fn parse_local_asset_with_platform() {
        let img = ImageRef::parse("asset:../app#linux/arm64").unwrap();
        assert_eq!(
            img,
            ImageRef::LocalAsset {
                directory: "../app".to_string(),
                platform: Some(Architecture::Arm64),
            }
        );
        assert!(img.is_local());
        assert_eq!(img.reference(), "asset:../app#linux/arm64");
        assert_eq!(ImageRef::parse(&img.reference()).unwrap(), img);
    }

    #[test]
    fn local_asset_reference_keeps_platform_distinct() {
        let any = ImageRef::parse("asset:../app").unwrap();
        let x86 = ImageRef::parse("asset:../app#linux/amd64").unwrap();
        assert_eq!(any.reference(), "asset:../app");
        assert_eq!(x86.reference(), "asset:../app#linux/amd64");
        assert_ne!(any.reference(), x86.reference());
    }

    #[test]
    fn rejects_bad_references() {
        assert!(matches!(ImageRef::parse("  "), Err(ImageError::Empty)));
        assert!(matches!(ImageRef::parse("asset:"), Err(ImageError::Invalid(_))));
        assert!(matches!(
            ImageRef::parse("asset:app#linux/mips"),
            Err(ImageError::UnknownPlatform(_))
        ));
        assert!(matches!(ImageRef::parse("web:"), Err(ImageError::Invalid(_))));
    }
}
