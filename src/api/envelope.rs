//! Response envelope shared by every backend endpoint

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use super::{ApiError, RawResponse};

/// `{ response, message, statusCode, success }`. Every field is optional
/// because some endpoints omit the bookkeeping fields.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub response: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "statusCode")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub success: Option<bool>,
    /// The reply as received, handed back with a failure
    #[serde(skip)]
    raw: Option<Value>,
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Parse a reply and check it for failure before the payload is matched
    /// against `T`, so a failed envelope carrying an unexpected payload still
    /// surfaces as the backend's error.
    pub fn parse(raw: &RawResponse) -> Result<Self, ApiError> {
        let body: Value = raw.json()?;
        let mut outline: Envelope<Value> = serde_json::from_value(body.clone())
            .map_err(|e| ApiError::InvalidResponse(format!("{} (HTTP {})", e, raw.status)))?;
        outline.raw = Some(body);
        let outline = outline.into_result()?;

        let response = outline
            .response
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ApiError::InvalidResponse(format!("{} (HTTP {})", e, raw.status)))?;
        Ok(Envelope {
            response,
            message: outline.message,
            status_code: outline.status_code,
            success: outline.success,
            raw: outline.raw,
        })
    }
}

impl<T> Envelope<T> {
    /// True unless the envelope itself reports failure.
    pub fn is_success(&self) -> bool {
        if self.success == Some(false) {
            return false;
        }
        match self.status_code {
            Some(code) => (200..300).contains(&code),
            None => true,
        }
    }

    /// Treat `success: false` or a non-2xx `statusCode` as failure even when
    /// the HTTP layer returned 200. The failure carries the reply body.
    pub fn into_result(self) -> Result<Self, ApiError> {
        if self.is_success() {
            return Ok(self);
        }
        let status = self.status_code.unwrap_or(200);
        let message = self
            .message
            .unwrap_or_else(|| "Request was not successful".to_string());
        Err(ApiError::Backend {
            status,
            message,
            body: self.raw,
        })
    }

    /// Payload of a successful envelope, or the failure it reports.
    pub fn into_response(self) -> Result<T, ApiError> {
        self.into_result()?
            .response
            .ok_or_else(|| ApiError::InvalidResponse("envelope has no response".to_string()))
    }

    pub fn message_or(&self, fallback: &str) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}
