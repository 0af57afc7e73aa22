//! Result artifacts: what the service hands back for each result reference,
//! and the typed plaintext produced after decryption.

use serde::{Deserialize, Serialize};

use super::job::{Quantity, ResultReference};

/// Declared content type of a result payload.
///
/// Tags the service sends that the client does not know are kept verbatim in
/// `Unknown` so they can be reported instead of guessed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContentType {
    /// Row-major table of floats
    FloatMatrix,
    /// Table of strings (encrypted form is encoded numerically)
    StringMatrix,
    /// Per-variable statistics records
    Statistics,
    /// Key-switched ciphertext envelope
    Encrypted,
    /// Model prediction output
    Prediction,
    Unknown(String),
}

impl ContentType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::FloatMatrix => "floatMatrix",
            Self::StringMatrix => "stringMatrix",
            Self::Statistics => "statistics",
            Self::Encrypted => "encrypted",
            Self::Prediction => "prediction",
            Self::Unknown(tag) => tag,
        }
    }
}

impl From<String> for ContentType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "floatMatrix" => Self::FloatMatrix,
            "stringMatrix" => Self::StringMatrix,
            "statistics" => Self::Statistics,
            "encrypted" => Self::Encrypted,
            "prediction" => Self::Prediction,
            _ => Self::Unknown(tag),
        }
    }
}

impl From<ContentType> for String {
    fn from(ct: ContentType) -> Self {
        ct.as_str().to_string()
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-variable DP noise parameters attached to a protected result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseMetadata {
    pub variable: String,

    /// Scale of the noise distribution
    pub scale: f64,

    /// Sensitivity the noise was calibrated for
    pub sensitivity: f64,
}

/// Descriptor of one result artifact, as returned by the service.
///
/// `switching_params` carries the base64 scheme parameters needed to build a
/// decryption context. When absent, the payload is already plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    pub reference: ResultReference,
    pub content_type: ContentType,

    #[serde(default)]
    pub switching_params: Option<String>,

    /// Declared column labels
    #[serde(default)]
    pub columns: Vec<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub contextual_info: Option<serde_json::Value>,

    #[serde(default)]
    pub noise: Option<Vec<NoiseMetadata>>,

    /// Post-processing routine the result requires, if any
    #[serde(default)]
    pub required_post_processing: Option<String>,
}

impl ArtifactDescriptor {
    /// A plaintext descriptor with no metadata.
    pub fn new(reference: ResultReference, content_type: ContentType) -> Self {
        Self {
            reference,
            content_type,
            switching_params: None,
            columns: Vec::new(),
            title: None,
            contextual_info: None,
            noise: None,
            required_post_processing: None,
        }
    }

    #[must_use]
    pub fn encrypted_with(mut self, switching_params: impl Into<String>) -> Self {
        self.switching_params = Some(switching_params.into());
        self
    }

    #[must_use]
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    #[must_use]
    pub fn with_noise(mut self, noise: Vec<NoiseMetadata>) -> Self {
        self.noise = Some(noise);
        self
    }

    #[must_use]
    pub fn with_post_processing(mut self, name: impl Into<String>) -> Self {
        self.required_post_processing = Some(name.into());
        self
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.switching_params.is_some()
    }

    /// Unencrypted metadata to carry over onto the decrypted result.
    #[must_use]
    pub fn metadata(&self) -> ResultMetadata {
        ResultMetadata {
            title: self.title.clone(),
            contextual_info: self.contextual_info.clone(),
            noise: self.noise.clone(),
        }
    }
}

/// Ciphertext returned by a release (key switch) request.
#[derive(Clone, PartialEq)]
pub struct ReleasedArtifact {
    pub content_type: ContentType,
    pub ciphertext: Vec<u8>,
}

impl ReleasedArtifact {
    pub fn new(content_type: ContentType, ciphertext: Vec<u8>) -> Self {
        Self {
            content_type,
            ciphertext,
        }
    }
}

impl std::fmt::Debug for ReleasedArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleasedArtifact")
            .field("content_type", &self.content_type)
            .field("size_bytes", &self.ciphertext.len())
            .finish()
    }
}

/// Display and DP metadata that travels alongside a result unencrypted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub title: Option<String>,
    pub contextual_info: Option<serde_json::Value>,
    pub noise: Option<Vec<NoiseMetadata>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub metadata: ResultMetadata,
}

/// Point estimates for one statistic over one variable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticRecord {
    #[serde(default)]
    pub name: String,
    pub variable: String,
    #[serde(default)]
    pub mean: Option<f64>,
    #[serde(default)]
    pub variance: Option<f64>,
    #[serde(default)]
    pub std_dev: Option<f64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub count: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSummary {
    pub records: Vec<StatisticRecord>,

    /// Raw DP-noised aggregates the records were derived from
    pub raw_values: Option<Vec<f64>>,

    pub metadata: ResultMetadata,
}

/// Typed plaintext of a released result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum DecryptedArtifact {
    NumericMatrix(NumericTable),
    StringMatrix(StringTable),
    Statistics(StatisticsSummary),
}

impl DecryptedArtifact {
    #[must_use]
    pub fn metadata(&self) -> &ResultMetadata {
        match self {
            Self::NumericMatrix(t) => &t.metadata,
            Self::StringMatrix(t) => &t.metadata,
            Self::Statistics(s) => &s.metadata,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NumericMatrix(_) => "numeric matrix",
            Self::StringMatrix(_) => "string matrix",
            Self::Statistics(_) => "statistics",
        }
    }
}

/// Bounds on one requested quantity of one statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub name: String,
    pub variable: String,
    pub quantity: Quantity,
    pub min: f64,
    pub max: f64,
}
