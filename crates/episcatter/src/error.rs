//! Error type of the facade.

use thiserror::Error;

/// Errors surfaced by the scene, export and headless helpers.
#[derive(Error, Debug)]
pub enum Error {
    /// A pass or surface failed.
    #[error(transparent)]
    Render(#[from] episcatter_render::RenderError),

    /// The configuration could not be loaded or is out of range.
    #[error(transparent)]
    Config(#[from] episcatter_core::ScatterError),

    /// Image encoding failed.
    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    /// The file extension does not name a supported image format.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Pixel data does not match the image size.
    #[error("invalid image data")]
    InvalidImageData,
}

/// A specialized Result type for episcatter operations.
pub type Result<T> = std::result::Result<T, Error>;
