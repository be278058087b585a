//! Image references and the availability guard.

use std::fmt;
use std::str::FromStr;

use crate::docker::ContainerBackend;
use crate::error::{Error, Result};

/// Tag used when an image reference omits it.
pub const DEFAULT_TAG: &str = "latest";

/// An image `name:tag` reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Split `name[:tag]` on the first colon.
    ///
    /// Everything after the first colon is the tag, so `x:1.2.3:::` has the
    /// tag `1.2.3:::`. The empty string yields an empty name.
    pub fn normalize(spec: &str) -> (String, String) {
        match spec.split_once(':') {
            Some((name, tag)) => (name.to_string(), tag.to_string()),
            None => (spec.to_string(), DEFAULT_TAG.to_string()),
        }
    }

    /// Parse a reference given on the command line.
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, tag) = Self::normalize(spec);
        if name.is_empty() {
            return Err(Error::invalid_argument(
                "image",
                format!("'{}' has no image name", spec),
            ));
        }
        if tag.is_empty() {
            return Err(Error::invalid_argument(
                "image",
                format!("'{}' has an empty tag", spec),
            ));
        }
        Ok(Self { name, tag })
    }

    /// `name:tag`.
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl FromStr for ImageRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Make sure `image` is available locally.
///
/// Without `auto_pull` a missing image fails immediately. With it, one pull is
/// attempted and the image checked once more; a pull error only shows up as
/// the image still being missing.
pub async fn ensure_image<B>(backend: &B, image: &ImageRef, auto_pull: bool) -> Result<()>
where
    B: ContainerBackend + ?Sized,
{
    if backend.image_exists(image).await? {
        tracing::debug!(image = %image, "Image available locally");
        return Ok(());
    }

    if !auto_pull {
        return Err(Error::MissingImage {
            image: image.name.clone(),
            tag: image.tag.clone(),
            pulled: false,
        });
    }

    tracing::info!(image = %image, "Pulling image");
    if let Err(e) = backend.pull_image(image).await {
        tracing::warn!(image = %image, error = %e, "Pull failed");
    }

    if backend.image_exists(image).await? {
        Ok(())
    } else {
        Err(Error::MissingImage {
            image: image.name.clone(),
            tag: image.tag.clone(),
            pulled: true,
        })
    }
}
