//! Command handlers invoked from `main`.

pub mod config;
pub mod purge;
pub mod regenerate;
pub mod route;
pub mod run;
pub mod stats;
pub mod status;

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::types::{AnalysisRequest, ForgeError, Result};

/// Request fields as given on the command line
#[derive(Debug, Clone, Default)]
pub struct RequestArgs {
    pub company: String,
    pub industry: String,
    pub challenge: String,
    /// JSON file with the extracted-data object
    pub data: Option<PathBuf>,
}

impl RequestArgs {
    pub fn into_request(self) -> Result<AnalysisRequest> {
        let extracted_data = match &self.data {
            Some(path) => read_json(path)?,
            None => Value::Object(Default::default()),
        };
        let request =
            AnalysisRequest::new(self.company, self.industry, self.challenge, extracted_data);
        request.validate()?;
        Ok(request)
    }
}

pub(crate) fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        ForgeError::InvalidInput(format!("{} is not valid JSON: {}", path.display(), e))
    })
}
