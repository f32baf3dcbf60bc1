use serde::{Deserialize, Serialize};

use crate::{
    bake::BakeStatus,
    diagnostics::{Diagnostic, ErrorLog},
};

pub const MSG_PING: &str = "ping";
pub const MSG_PONG: &str = "pong";
pub const MSG_PROJECT_UPDATE: &str = "project_update";
pub const MSG_PROJECT_REQUEST: &str = "project_request";
pub const MSG_BAKE_STATUS: &str = "bake_status";
pub const MSG_ERROR: &str = "error";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WSMessage<T> {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub timestamp: u64,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
}

impl<T> WSMessage<T> {
    pub fn new(msg_type: &str, request_id: Option<String>, payload: Option<T>) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            timestamp: now_millis(),
            request_id,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticPayload {
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(rename = "nodeId", skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl From<&Diagnostic> for DiagnosticPayload {
    fn from(d: &Diagnostic) -> Self {
        Self {
            category: d.category.as_str().to_string(),
            message: d.message.clone(),
            stage: d.stage.map(|s| s.as_str().to_string()),
            node_id: d.node_id.clone(),
            line: d.line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakeStatusPayload {
    #[serde(flatten)]
    pub status: BakeStatus,
    #[serde(default)]
    pub diagnostics: Vec<DiagnosticPayload>,
}

impl BakeStatusPayload {
    pub fn new(status: BakeStatus, errors: &ErrorLog) -> Self {
        Self {
            status,
            diagnostics: errors.iter().map(DiagnosticPayload::from).collect(),
        }
    }
}

pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bake::BakeState, diagnostics::DiagnosticCategory};

    #[test]
    fn bake_status_serializes_flat() {
        let mut log = ErrorLog::new();
        log.push(Diagnostic::new(DiagnosticCategory::Bake, "compiler missing"));
        let status = BakeStatus {
            state: BakeState::Failed,
            build_id: 3,
            summary: log.summary().map(str::to_string),
        };
        let msg = WSMessage::new(MSG_BAKE_STATUS, None, Some(BakeStatusPayload::new(status, &log)));
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "bake_status");
        assert_eq!(v["payload"]["state"], "failed");
        assert_eq!(v["payload"]["buildId"], 3);
        assert_eq!(v["payload"]["diagnostics"][0]["category"], "bake");
        assert!(v.get("requestId").is_none());
    }
}
