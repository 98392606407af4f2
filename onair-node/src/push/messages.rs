use serde::{Deserialize, Serialize};

/// Push payload: the sender's identity and current status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub identity: String,
    pub status: String,
}

/// Push acknowledgement carrying the receiver's own status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub success: bool,
    /// Receiver's self status; absent on rejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl PushResponse {
    pub fn accepted(status: impl Into<String>) -> Self {
        Self {
            success: true,
            status: Some(status.into()),
        }
    }

    pub fn rejected() -> Self {
        Self {
            success: false,
            status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rejection_omits_status() {
        let body = serde_json::to_value(PushResponse::rejected()).unwrap();
        assert_eq!(body, json!({ "success": false }));
    }

    #[test]
    fn test_acknowledgement_wire_format() {
        let body = serde_json::to_value(PushResponse::accepted("low")).unwrap();
        assert_eq!(body, json!({ "success": true, "status": "low" }));

        let parsed: PushResponse = serde_json::from_value(json!({ "success": false })).unwrap();
        assert_eq!(parsed, PushResponse::rejected());
    }
}
