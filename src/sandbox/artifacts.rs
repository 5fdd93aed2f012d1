//! Visual artifacts harvested from user code.
//!
//! The child encodes every pending figure as a `data:<media>;base64,<payload>`
//! string under the `artifacts` key of its result. This module turns those
//! strings back into typed values on the host side.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SandboxError};

/// Key under which the wrapper merges artifacts into the result.
pub const ARTIFACTS_KEY: &str = "artifacts";

/// Key holding the original return value when it had to be wrapped.
pub const DATA_KEY: &str = "data";

/// One encoded binary side-output, such as a PNG figure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Media type, e.g. `image/png`.
    pub media_type: String,
    /// Base64 payload without the data-URI prefix.
    pub data: String,
}

impl Artifact {
    /// Parse a `data:<media>;base64,<payload>` URI.
    pub fn from_data_uri(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let media_type = header.strip_suffix(";base64")?;
        if media_type.is_empty() {
            return None;
        }
        Some(Self {
            media_type: media_type.to_string(),
            data: payload.to_string(),
        })
    }

    /// Rebuild the data URI.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }

    /// Decode the payload into raw bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| SandboxError::Decode(format!("artifact payload: {}", e)))
    }

    /// Whether the artifact is an image.
    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

/// Collect typed artifacts from a decoded result value.
///
/// Entries that are not data URIs are skipped here but stay in the value.
pub fn collect_artifacts(value: &Value) -> Vec<Artifact> {
    value
        .get(ARTIFACTS_KEY)
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .filter_map(Artifact::from_data_uri)
                .collect()
        })
        .unwrap_or_default()
}
