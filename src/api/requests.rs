use serde::{Deserialize, Serialize};

/// Request to create an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOperationRequest {
    pub reference: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CreateOperationRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.reference.trim().is_empty() {
            errors.push(ValidationError { field: "reference".to_string(), message: "reference cannot be empty".to_string() });
        }
        if self.reference.len() > 128 {
            errors.push(ValidationError { field: "reference".to_string(), message: "reference must be at most 128 characters".to_string() });
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}
