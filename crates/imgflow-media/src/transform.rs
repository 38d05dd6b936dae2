//! Transform dispatch.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageOutputFormat};
use imgflow_models::{ResizeParams, Rotation, TargetFormat, Transformation};
use tracing::debug;

use crate::error::{MediaError, MediaResult};

const JPEG_QUALITY: u8 = 90;

/// Output of a transformation.
#[derive(Debug, Clone)]
pub struct TransformedImage {
    /// Encoded bytes
    pub bytes: Vec<u8>,
    /// Encoding of `bytes`
    pub format: TargetFormat,
    pub width: u32,
    pub height: u32,
}

impl TransformedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

/// Applies a validated transformation to encoded image bytes.
///
/// Implementations must be pure: no I/O beyond memory, safe to share
/// across workers without synchronization.
pub trait Transformer: Send + Sync {
    fn transform(
        &self,
        input: &[u8],
        transformation: &Transformation,
    ) -> MediaResult<TransformedImage>;
}

/// [`Transformer`] backed by the `image` crate.
#[derive(Debug, Clone, Default)]
pub struct ImageTransformer;

impl ImageTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Transformer for ImageTransformer {
    fn transform(
        &self,
        input: &[u8],
        transformation: &Transformation,
    ) -> MediaResult<TransformedImage> {
        let source_format = detect_format(input)?;
        let image = image::load_from_memory_with_format(input, image_format(source_format))
            .map_err(|e| MediaError::decode(e.to_string()))?;

        debug!(
            "Applying {} to {}x{} {:?} image",
            transformation.kind(),
            image.width(),
            image.height(),
            source_format
        );

        // Everything except CONVERT re-encodes in the source format.
        let (output, format) = match transformation {
            Transformation::Resize(params) => (resize_to_fill(&image, params), source_format),
            Transformation::ForceResize(params) => (
                image.resize_exact(params.width, params.height, FilterType::Lanczos3),
                source_format,
            ),
            Transformation::Rotate(rotation) => (rotate(image, *rotation), source_format),
            Transformation::Convert(target) => (image, *target),
        };

        let bytes = encode(&output, format)?;
        Ok(TransformedImage {
            bytes,
            format,
            width: output.width(),
            height: output.height(),
        })
    }
}

fn resize_to_fill(image: &DynamicImage, params: &ResizeParams) -> DynamicImage {
    image.resize_to_fill(params.width, params.height, FilterType::Lanczos3)
}

fn rotate(image: DynamicImage, rotation: Rotation) -> DynamicImage {
    match rotation {
        Rotation::Deg0 => image,
        Rotation::Deg90 => image.rotate90(),
        Rotation::Deg180 => image.rotate180(),
        Rotation::Deg270 => image.rotate270(),
    }
}

fn detect_format(input: &[u8]) -> MediaResult<TargetFormat> {
    match image::guess_format(input) {
        Ok(ImageFormat::Png) => Ok(TargetFormat::Png),
        Ok(ImageFormat::Jpeg) => Ok(TargetFormat::Jpeg),
        Ok(ImageFormat::Gif) => Ok(TargetFormat::Gif),
        Ok(ImageFormat::Bmp) => Ok(TargetFormat::Bmp),
        Ok(ImageFormat::Tiff) => Ok(TargetFormat::Tiff),
        Ok(other) => Err(MediaError::UnsupportedFormat(format!("{:?}", other))),
        Err(e) => Err(MediaError::decode(e.to_string())),
    }
}

fn image_format(format: TargetFormat) -> ImageFormat {
    match format {
        TargetFormat::Png => ImageFormat::Png,
        TargetFormat::Jpeg => ImageFormat::Jpeg,
        TargetFormat::Gif => ImageFormat::Gif,
        TargetFormat::Bmp => ImageFormat::Bmp,
        TargetFormat::Tiff => ImageFormat::Tiff,
    }
}

fn encode(image: &DynamicImage, format: TargetFormat) -> MediaResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());

    let result = match format {
        // JPEG has no alpha channel.
        TargetFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut cursor, ImageOutputFormat::Jpeg(JPEG_QUALITY)),
        TargetFormat::Png => image.write_to(&mut cursor, ImageOutputFormat::Png),
        TargetFormat::Gif => image.write_to(&mut cursor, ImageOutputFormat::Gif),
        TargetFormat::Bmp => image.write_to(&mut cursor, ImageOutputFormat::Bmp),
        TargetFormat::Tiff => image.write_to(&mut cursor, ImageOutputFormat::Tiff),
    };

    result.map_err(|e| MediaError::encode(format.extension(), e.to_string()))?;
    Ok(cursor.into_inner())
}
