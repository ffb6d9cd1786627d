use crate::record::{ExtraFields, Severity};
use serde_json::Value;

/// Request context attached to API-surface errors and info reports.
///
/// `params` holds the request's query or body fields; enrichment
/// namespaces each one as `<METHOD>_<key>` so fields from different
/// endpoints cannot collide in the record.
#[derive(Debug, Clone, Default)]
pub struct ApiContext {
    pub method: String,
    pub path: String,
    pub params: ExtraFields,
    pub user: Option<String>,
}

impl ApiContext {
    pub(crate) fn apply(&self, extra: &mut ExtraFields) {
        extra.insert("method".to_string(), Value::from(self.method.clone()));
        extra.insert("path".to_string(), Value::from(self.path.clone()));
        for (key, value) in &self.params {
            extra.insert(format!("{}_{}", self.method, key), value.clone());
        }
        if let Some(user) = &self.user {
            extra.insert("user".to_string(), Value::from(user.clone()));
        }
    }
}

/// Connection context attached to socket-surface reports.
#[derive(Debug, Clone, Default)]
pub struct SocketContext {
    pub socket_id: String,
    pub address: Option<String>,
    pub user: Option<String>,
}

impl SocketContext {
    pub(crate) fn apply(&self, extra: &mut ExtraFields) {
        extra.insert("socket_id".to_string(), Value::from(self.socket_id.clone()));
        if let Some(address) = &self.address {
            extra.insert("client_address".to_string(), Value::from(address.clone()));
        }
        if let Some(user) = &self.user {
            extra.insert("user".to_string(), Value::from(user.clone()));
        }
    }
}

/// Upstream-response context attached to HTTP-client errors.
#[derive(Debug, Clone, Default)]
pub struct HttpClientContext {
    pub url: Option<String>,
    pub method: Option<String>,
    pub status: Option<u16>,
    pub body: Option<Value>,
}

impl HttpClientContext {
    pub(crate) fn apply(&self, extra: &mut ExtraFields) {
        if let Some(url) = &self.url {
            extra.insert("request_url".to_string(), Value::from(url.clone()));
        }
        if let Some(method) = &self.method {
            extra.insert("request_method".to_string(), Value::from(method.clone()));
        }
        if let Some(status) = self.status {
            extra.insert("response_status".to_string(), Value::from(status));
        }
        if let Some(body) = &self.body {
            extra.insert("response_body".to_string(), body.clone());
        }
    }
}

/// A recognized kind whose required context was missing or malformed.
#[derive(thiserror::Error, Debug)]
pub enum ClassifyError {
    #[error("error kind '{kind}' is missing required field '{field}'")]
    MissingField { kind: String, field: &'static str },
    #[error("error kind '{kind}' field '{field}' has the wrong shape")]
    WrongShape { kind: String, field: &'static str },
}

/// Outcome of classifying a loose error-like value.
#[derive(Debug, Clone)]
pub(crate) struct ClassifiedReport {
    pub short: String,
    pub full: String,
    pub severity: Severity,
    pub extra: ExtraFields,
}

fn message_of(value: &Value) -> String {
    value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "unclassified error".to_string())
}

fn detail_of(value: &Value) -> String {
    value
        .get("detail")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}

fn api_context_of(kind: &str, value: &Value) -> Result<ApiContext, ClassifyError> {
    let request = value
        .get("request")
        .ok_or_else(|| ClassifyError::MissingField {
            kind: kind.to_string(),
            field: "request",
        })?;
    let request = request.as_object().ok_or_else(|| ClassifyError::WrongShape {
        kind: kind.to_string(),
        field: "request",
    })?;

    let method = request
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| ClassifyError::MissingField {
            kind: kind.to_string(),
            field: "request.method",
        })?
        .to_string();
    let path = request
        .get("path")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // Query parameters take precedence; fall back to the body.
    let mut params = ExtraFields::new();
    let fields = request
        .get("query")
        .and_then(Value::as_object)
        .filter(|map| !map.is_empty())
        .or_else(|| request.get("body").and_then(Value::as_object));
    if let Some(fields) = fields {
        for (key, field) in fields {
            params.insert(key.clone(), field.clone());
        }
    }

    Ok(ApiContext {
        method,
        path,
        params,
        user: value.get("user").and_then(Value::as_str).map(str::to_string),
    })
}

fn socket_context_of(kind: &str, value: &Value) -> Result<SocketContext, ClassifyError> {
    let socket = value
        .get("socket")
        .ok_or_else(|| ClassifyError::MissingField {
            kind: kind.to_string(),
            field: "socket",
        })?;
    let socket = socket.as_object().ok_or_else(|| ClassifyError::WrongShape {
        kind: kind.to_string(),
        field: "socket",
    })?;

    Ok(SocketContext {
        socket_id: socket
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ClassifyError::MissingField {
                kind: kind.to_string(),
                field: "socket.id",
            })?
            .to_string(),
        address: socket
            .get("address")
            .and_then(Value::as_str)
            .map(str::to_string),
        user: value.get("user").and_then(Value::as_str).map(str::to_string),
    })
}

fn http_client_context_of(kind: &str, value: &Value) -> Result<HttpClientContext, ClassifyError> {
    let response = value
        .get("response")
        .ok_or_else(|| ClassifyError::MissingField {
            kind: kind.to_string(),
            field: "response",
        })?;
    let response = response
        .as_object()
        .ok_or_else(|| ClassifyError::WrongShape {
            kind: kind.to_string(),
            field: "response",
        })?;

    Ok(HttpClientContext {
        url: response
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string),
        method: response
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string),
        status: response
            .get("status")
            .and_then(Value::as_u64)
            .map(|s| s as u16),
        body: response.get("body").cloned(),
    })
}

/// Classify a loose error-like value by its `kind` tag.
///
/// Unrecognized or missing kinds take the generic path at `Alert`
/// severity, never an error; explicit `generic` and the context kinds
/// report at `Error`. Only a recognized kind with a malformed context
/// is an `Err`, which the reporter degrades to two generic reports.
pub(crate) fn classify(value: &Value) -> Result<ClassifiedReport, ClassifyError> {
    let kind = value.get("kind").and_then(Value::as_str).unwrap_or("");
    let short = message_of(value);
    let full = detail_of(value);
    let mut extra = ExtraFields::new();

    let severity = match kind {
        "generic" => Severity::Error,
        "api" | "api-context" => {
            api_context_of(kind, value)?.apply(&mut extra);
            Severity::Error
        }
        "socket" | "socket-context" => {
            socket_context_of(kind, value)?.apply(&mut extra);
            Severity::Error
        }
        "http-client" | "http-client-context" => {
            http_client_context_of(kind, value)?.apply(&mut extra);
            Severity::Error
        }
        // Missing or unrecognized kind: generic path, default severity
        // for unclassified errors.
        _ => Severity::Alert,
    };

    Ok(ClassifiedReport {
        short,
        full,
        severity,
        extra,
    })
}
