//! Embedding store built from a directory of enrollment images.
//!
//! Layout: one subdirectory per student named `<id>_<name>`, each holding
//! `.jpg`/`.jpeg`/`.png` samples. Every readable sample with a locatable face
//! contributes one embedding; the identity keeps their mean.

use crate::detector::FaceLocator;
use crate::recognizer::FaceEncoder;
use crate::types::{Embedding, Identity, ReferenceIdentity};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Identifier used for folders without an `<id>_` prefix.
pub const UNKNOWN_ID: &str = "UNKNOWN";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery directory {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Split `<id>_<name>` on the first underscore.
pub fn parse_identity(folder_name: &str) -> Identity {
    match folder_name.split_once('_') {
        Some((id, name)) => Identity::new(id, name),
        None => Identity::new(UNKNOWN_ID, folder_name),
    }
}

/// The enrolled reference identities, in directory order.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    references: Vec<ReferenceIdentity>,
}

impl Gallery {
    pub fn new(references: Vec<ReferenceIdentity>) -> Self {
        Self { references }
    }

    /// Build the gallery from `dir`, embedding every usable sample.
    pub fn load<L, E>(dir: &Path, locator: &mut L, encoder: &mut E) -> Result<Self, GalleryError>
    where
        L: FaceLocator + ?Sized,
        E: FaceEncoder + ?Sized,
    {
        let mut references = Vec::new();

        for folder in sorted_entries(dir)? {
            if !folder.is_dir() {
                continue;
            }
            let Some(folder_name) = folder.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let identity = parse_identity(folder_name);

            let images = match sorted_entries(&folder) {
                Ok(images) => images,
                Err(e) => {
                    tracing::warn!(
                        folder = folder_name,
                        error = %e,
                        "unreadable identity folder skipped"
                    );
                    continue;
                }
            };

            let mut samples: Vec<Embedding> = Vec::new();
            for image_path in images {
                if !has_allowed_extension(&image_path) {
                    continue;
                }
                let Some(embedding) = embed_image(&image_path, locator, encoder) else {
                    continue;
                };
                if let Some(first) = samples.first() {
                    if first.dim() != embedding.dim() {
                        tracing::warn!(
                            path = %image_path.display(),
                            "embedding dimension mismatch, sample dropped"
                        );
                        continue;
                    }
                }
                samples.push(embedding);
            }

            match Embedding::mean(&samples) {
                Some(embedding) => {
                    tracing::info!(
                        id = %identity.id,
                        name = %identity.name,
                        samples = samples.len(),
                        "identity enrolled"
                    );
                    references.push(ReferenceIdentity {
                        identity,
                        embedding,
                        samples: samples.len(),
                    });
                }
                None => {
                    tracing::warn!(folder = folder_name, "no usable samples, identity skipped");
                }
            }
        }

        tracing::info!(dir = %dir.display(), identities = references.len(), "gallery loaded");
        Ok(Self { references })
    }

    pub fn references(&self) -> &[ReferenceIdentity] {
        &self.references
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, GalleryError> {
    let io_err = |source| GalleryError::Io {
        path: dir.display().to_string(),
        source,
    };
    let mut entries = std::fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    entries.sort();
    Ok(entries)
}

fn has_allowed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ALLOWED_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
}

/// Embed the best face of one enrollment image; `None` if the image cannot
/// be decoded, has no face, or fails to encode.
fn embed_image<L, E>(path: &Path, locator: &mut L, encoder: &mut E) -> Option<Embedding>
where
    L: FaceLocator + ?Sized,
    E: FaceEncoder + ?Sized,
{
    let luma = match image::open(path) {
        Ok(img) => img.to_luma8(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "unreadable sample skipped");
            return None;
        }
    };
    let (width, height) = luma.dimensions();
    let pixels = luma.as_raw();

    let faces = match locator.locate(pixels, width, height) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "face location failed");
            return None;
        }
    };
    let Some(face) = faces.first() else {
        tracing::debug!(path = %path.display(), "no face in sample");
        return None;
    };

    encoder
        .encode(pixels, width, height, face)
        .map_err(|e| tracing::debug!(path = %path.display(), error = %e, "sample encoding failed"))
        .ok()
}
