//! HTTP Archive (HAR) recordings.
//!
//! Only the subset of the HAR 1.2 format needed to replay requests is
//! modelled; unknown fields are ignored.

use std::path::Path;

use http::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HarError, ItemError};

/// A parsed recording.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Har {
    pub log: HarLog,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarLog {
    #[serde(default)]
    pub entries: Vec<HarEntry>,
}

/// One request/response exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarEntry {
    pub request: HarRequest,
    #[serde(default)]
    pub response: Option<HarResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<NameValue>,
    #[serde(default)]
    pub cookies: Vec<NameValue>,
    #[serde(default)]
    pub post_data: Option<PostData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarResponse {
    #[serde(default)]
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameValue {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostData {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl Har {
    /// Read a recording from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HarError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| HarError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Parse a recording held in memory.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str) -> Result<Self, HarError> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn entries(&self) -> &[HarEntry] {
        &self.log.entries
    }

    /// Convert every entry, yielding a per-entry result.
    pub fn requests(&self) -> impl Iterator<Item = Result<CapturedRequest, ItemError>> + '_ {
        self.log
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| CapturedRequest::from_entry(i, entry))
    }
}

/// A replayable request extracted from a recording.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedRequest {
    /// Position in the recording
    pub index: usize,
    pub method: Method,
    /// Absolute URL as recorded
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    /// Request payload; only kept for methods other than GET
    pub body: Option<String>,
    /// Status the recorded response carried, if any
    pub status: Option<u16>,
}

impl CapturedRequest {
    /// Extract the request from one recorded entry.
    pub fn from_entry(index: usize, entry: &HarEntry) -> Result<Self, ItemError> {
        let req = &entry.request;
        let method = Method::from_bytes(req.method.to_ascii_uppercase().as_bytes()).map_err(
            |_| ItemError::InvalidMethod {
                index,
                method: req.method.clone(),
            },
        )?;
        let url = Url::parse(&req.url).map_err(|e| ItemError::InvalidUrl {
            index,
            url: req.url.clone(),
            details: e.to_string(),
        })?;
        let body = if method == Method::GET {
            None
        } else {
            req.post_data.as_ref().and_then(|p| p.text.clone())
        };

        Ok(Self {
            index,
            method,
            url,
            headers: pairs(&req.headers),
            cookies: pairs(&req.cookies),
            body,
            status: entry.response.as_ref().map(|r| r.status).filter(|s| *s != 0),
        })
    }

    /// URL path of the recorded request.
    pub fn path(&self) -> &str {
        self.url.path()
    }
}

fn pairs(items: &[NameValue]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|nv| (nv.name.clone(), nv.value.clone()))
        .collect()
}
