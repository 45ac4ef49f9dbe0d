//! Analysis request and stage identity.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ForgeError, Result};

/// Maximum accepted challenge length in characters
const MAX_CHALLENGE_CHARS: usize = 20_000;

/// A request for one strategy analysis. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Entity identifier
    pub company: String,
    /// Category the entity operates in
    pub industry: String,
    /// Free-text problem statement
    pub challenge: String,
    /// Opaque extracted-data payload (JSON object)
    #[serde(default = "empty_object")]
    pub extracted_data: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl AnalysisRequest {
    pub fn new(
        company: impl Into<String>,
        industry: impl Into<String>,
        challenge: impl Into<String>,
        extracted_data: Value,
    ) -> Self {
        let extracted_data = if extracted_data.is_null() {
            empty_object()
        } else {
            extracted_data
        };
        Self {
            company: company.into(),
            industry: industry.into(),
            challenge: challenge.into(),
            extracted_data,
        }
    }

    /// Reject requests that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.company.trim().is_empty() {
            return Err(ForgeError::InvalidInput(
                "company must not be empty".to_string(),
            ));
        }
        if self.industry.trim().is_empty() {
            return Err(ForgeError::InvalidInput(
                "industry must not be empty".to_string(),
            ));
        }
        if self.challenge.chars().count() > MAX_CHALLENGE_CHARS {
            return Err(ForgeError::InvalidInput(format!(
                "challenge exceeds {} characters",
                MAX_CHALLENGE_CHARS
            )));
        }
        if !self.extracted_data.is_object() {
            return Err(ForgeError::InvalidInput(
                "extracted_data must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }

    /// Identity parameters every stage call carries.
    pub fn identity(&self) -> StageIdentity {
        StageIdentity {
            company: self.company.trim().to_string(),
            industry: self.industry.trim().to_string(),
        }
    }
}

/// Required identity of the analysed entity.
///
/// Passed to stage functions as its own argument, never merged into the
/// open map of stage-specific inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageIdentity {
    pub company: String,
    pub industry: String,
}

impl std::fmt::Display for StageIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.company, self.industry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_accepts_well_formed_request() {
        let req = AnalysisRequest::new("Acme", "Tech", "scale ops", json!({"revenue": 10}));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_identity() {
        let req = AnalysisRequest::new("  ", "Tech", "scale ops", json!({}));
        assert!(matches!(req.validate(), Err(ForgeError::InvalidInput(_))));

        let req = AnalysisRequest::new("Acme", "", "scale ops", json!({}));
        assert!(matches!(req.validate(), Err(ForgeError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_non_object_payload() {
        let req = AnalysisRequest::new("Acme", "Tech", "scale ops", json!([1, 2, 3]));
        assert!(matches!(req.validate(), Err(ForgeError::InvalidInput(_))));
    }

    #[test]
    fn test_null_payload_becomes_empty_object() {
        let req = AnalysisRequest::new("Acme", "Tech", "scale ops", Value::Null);
        assert_eq!(req.extracted_data, json!({}));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_identity_is_trimmed() {
        let req = AnalysisRequest::new(" Acme ", "Tech\n", "", json!({}));
        let id = req.identity();
        assert_eq!(id.company, "Acme");
        assert_eq!(id.industry, "Tech");
        assert_eq!(id.to_string(), "Acme/Tech");
    }

    #[test]
    fn test_deserialize_without_payload() {
        let req: AnalysisRequest =
            serde_json::from_str(r#"{"company":"Acme","industry":"Tech","challenge":"x"}"#)
                .unwrap();
        assert_eq!(req.extracted_data, json!({}));
    }
}
