use crate::error::StoreError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::AppState;
use crate::model::{Role, User};
use serde::de::DeserializeOwned;
use serde_json::json;

pub const WRITE_ROLES: &[Role] = &[Role::SystemAdmin, Role::Management];
pub const ATTENDANCE_ROLES: &[Role] = &[Role::SystemAdmin, Role::Management, Role::Teacher];
pub const ADMIN_ROLES: &[Role] = &[Role::SystemAdmin];

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        let details = match &e {
            StoreError::NotFound { kind, id } => Some(json!({ "kind": kind.as_str(), "id": id })),
            StoreError::Conflict { kind, .. } => Some(json!({ "kind": kind.as_str() })),
            StoreError::Invalid { field, .. } => Some(json!({ "field": field })),
            StoreError::Forbidden { role } => Some(json!({ "role": role.as_str() })),
            StoreError::Unauthenticated => None,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Deserializes `params[key]`, or the whole params object when `key` is
/// `None`.
pub fn parse_params<T: DeserializeOwned>(
    params: &serde_json::Value,
    key: Option<&str>,
) -> Result<T, HandlerErr> {
    let value = match key {
        Some(k) => params
            .get(k)
            .cloned()
            .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", k)))?,
        None => params.clone(),
    };
    serde_json::from_value(value).map_err(|e| {
        let message = match key {
            Some(k) => format!("invalid {}: {}", k, e),
            None => format!("invalid params: {}", e),
        };
        HandlerErr::bad_params(message)
    })
}

pub fn require_role<'a>(state: &'a AppState, roles: &[Role]) -> Result<&'a User, HandlerErr> {
    Ok(state.identity.require_role(roles)?)
}

pub fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("internal", e.to_string()))
}
