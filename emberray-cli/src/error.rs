//! Centralized CLI error handling.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Probe(#[from] emberray::texture::AddImageError),

    #[error(transparent)]
    Merge(#[from] emberray::merge::MergeError),
}
