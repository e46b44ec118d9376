use serde::{Deserialize, Serialize};

/// Bounding region for a detected face in the submitted image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Face encoding vector produced by the external embedding tool
/// (128-dimensional for dlib-style encoders).
///
/// Serializes as a bare array so the cache file is a plain mapping of
/// reg no to vector lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance to another encoding. Non-negative, zero for
    /// identical vectors.
    pub fn distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One detected face in a submitted image: its encoding plus, when the
/// encoder reports one, the region it was found in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub encoding: Encoding,
    #[serde(default)]
    pub region: Option<FaceRegion>,
}
