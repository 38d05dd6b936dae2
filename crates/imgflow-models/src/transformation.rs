//! Transformation descriptors.
//!
//! Jobs carry the transformation type as text and its parameters as an
//! opaque JSON string. [`Transformation::parse`] turns both into a typed
//! descriptor, rejecting anything the transform backend cannot honour
//! before the backend is ever invoked.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Transformation kinds accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformationType {
    Resize,
    Rotate,
    Convert,
    ForceResize,
}

impl TransformationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformationType::Resize => "RESIZE",
            TransformationType::Rotate => "ROTATE",
            TransformationType::Convert => "CONVERT",
            TransformationType::ForceResize => "FORCE_RESIZE",
        }
    }
}

impl FromStr for TransformationType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESIZE" => Ok(TransformationType::Resize),
            "ROTATE" => Ok(TransformationType::Rotate),
            "CONVERT" => Ok(TransformationType::Convert),
            "FORCE_RESIZE" => Ok(TransformationType::ForceResize),
            other => Err(ModelError::UnknownTransformation(other.to_string())),
        }
    }
}

impl std::fmt::Display for TransformationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Largest accepted output side for RESIZE and FORCE_RESIZE.
pub const MAX_OUTPUT_DIMENSION: u32 = 10_000;

/// Target box for RESIZE and FORCE_RESIZE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeParams {
    pub width: u32,
    pub height: u32,
}

/// Clockwise rotation in right angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

impl TryFrom<i64> for Rotation {
    type Error = ModelError;

    fn try_from(degree: i64) -> Result<Self, Self::Error> {
        match degree {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(ModelError::UnsupportedRotation(other)),
        }
    }
}

/// Output formats supported by CONVERT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Tiff,
}

impl TargetFormat {
    /// Lower-case file extension used when rewriting destination keys.
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Png => "png",
            TargetFormat::Jpeg => "jpeg",
            TargetFormat::Gif => "gif",
            TargetFormat::Bmp => "bmp",
            TargetFormat::Tiff => "tiff",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            TargetFormat::Png => "image/png",
            TargetFormat::Jpeg => "image/jpeg",
            TargetFormat::Gif => "image/gif",
            TargetFormat::Bmp => "image/bmp",
            TargetFormat::Tiff => "image/tiff",
        }
    }
}

impl FromStr for TargetFormat {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PNG" => Ok(TargetFormat::Png),
            "JPEG" => Ok(TargetFormat::Jpeg),
            "GIF" => Ok(TargetFormat::Gif),
            "BMP" => Ok(TargetFormat::Bmp),
            "TIFF" => Ok(TargetFormat::Tiff),
            "PDF" => Err(ModelError::UnsupportedFormat(
                "PDF conversion is not supported".to_string(),
            )),
            other => Err(ModelError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A fully validated transformation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformation {
    /// Scale and center-crop to fill the box exactly.
    Resize(ResizeParams),
    /// Stretch to the box, ignoring aspect ratio.
    ForceResize(ResizeParams),
    Rotate(Rotation),
    Convert(TargetFormat),
}

#[derive(Deserialize)]
struct RawResize {
    height: i64,
    width: i64,
}

#[derive(Deserialize)]
struct RawRotate {
    degree: i64,
}

#[derive(Deserialize)]
struct RawConvert {
    format: String,
}

impl Transformation {
    /// Resolve a wire transformation type and its JSON parameter blob.
    pub fn parse(kind: &str, parameters: &str) -> ModelResult<Self> {
        let kind: TransformationType = kind.parse()?;

        match kind {
            TransformationType::Resize => Ok(Transformation::Resize(parse_resize(kind, parameters)?)),
            TransformationType::ForceResize => {
                Ok(Transformation::ForceResize(parse_resize(kind, parameters)?))
            }
            TransformationType::Rotate => {
                let raw: RawRotate = parse_params(kind, parameters)?;
                Ok(Transformation::Rotate(Rotation::try_from(raw.degree)?))
            }
            TransformationType::Convert => {
                let raw: RawConvert = parse_params(kind, parameters)?;
                Ok(Transformation::Convert(raw.format.parse()?))
            }
        }
    }

    pub fn kind(&self) -> TransformationType {
        match self {
            Transformation::Resize(_) => TransformationType::Resize,
            Transformation::ForceResize(_) => TransformationType::ForceResize,
            Transformation::Rotate(_) => TransformationType::Rotate,
            Transformation::Convert(_) => TransformationType::Convert,
        }
    }

    /// Target format when this is a format conversion.
    pub fn target_format(&self) -> Option<TargetFormat> {
        match self {
            Transformation::Convert(format) => Some(*format),
            _ => None,
        }
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(
    kind: TransformationType,
    parameters: &str,
) -> ModelResult<T> {
    serde_json::from_str(parameters)
        .map_err(|e| ModelError::invalid_parameters(kind.as_str(), e.to_string()))
}

fn parse_resize(kind: TransformationType, parameters: &str) -> ModelResult<ResizeParams> {
    let raw: RawResize = parse_params(kind, parameters)?;

    let dimension = |name: &str, value: i64| -> ModelResult<u32> {
        if value <= 0 {
            return Err(ModelError::invalid_parameters(
                kind.as_str(),
                format!("{} must be positive, got {}", name, value),
            ));
        }
        match u32::try_from(value) {
            Ok(side) if side <= MAX_OUTPUT_DIMENSION => Ok(side),
            _ => Err(ModelError::invalid_parameters(
                kind.as_str(),
                format!(
                    "{} {} exceeds the {} pixel limit",
                    name, value, MAX_OUTPUT_DIMENSION
                ),
            )),
        }
    };

    Ok(ResizeParams {
        width: dimension("width", raw.width)?,
        height: dimension("height", raw.height)?,
    })
}
