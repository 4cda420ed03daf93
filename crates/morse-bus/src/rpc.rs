//! Newline-delimited JSON-RPC 2.0 framing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use morse_core::Error;

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
/// Any middleware error; `data.name` carries its D-Bus name.
pub const SERVER_ERROR: i64 = -32000;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: Option<String>,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Server-to-client message without an id: a middleware signal.
#[derive(Debug, Serialize)]
pub struct RpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> RpcNotification<'a> {
    pub fn new(method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

pub fn respond_ok(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id,
        result: Some(result),
        error: None,
    }
}

pub fn respond_err(id: Value, code: i64, message: &str) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(json!({ "code": code, "message": message })),
    }
}

/// Reply to a line that is not a request; the id is unknown.
pub fn parse_error() -> RpcResponse {
    respond_err(Value::Null, PARSE_ERROR, "Parse error")
}

/// Typed middleware error, keeping its D-Bus name for the client.
pub fn respond_error(id: Value, error: &Error) -> RpcResponse {
    let code = match error {
        Error::InvalidArgument(_) => INVALID_PARAMS,
        _ => SERVER_ERROR,
    };
    RpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(json!({
            "code": code,
            "message": error.message(),
            "data": { "name": error.dbus_name() },
        })),
    }
}

pub fn parse_line(line: &str) -> Result<RpcRequest, serde_json::Error> {
    serde_json::from_str(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_carry_their_names() {
        let resp = respond_error(json!(3), &Error::InvalidHandle("Unknown handle 9".into()));
        let err = resp.error.unwrap();
        assert_eq!(err["code"], json!(SERVER_ERROR));
        assert_eq!(err["message"], json!("Unknown handle 9"));
        assert_eq!(
            err["data"]["name"],
            json!("org.freedesktop.Telepathy.Error.InvalidHandle")
        );

        let resp = respond_error(json!(4), &Error::InvalidArgument("bad".into()));
        assert_eq!(resp.error.unwrap()["code"], json!(INVALID_PARAMS));
    }

    #[test]
    fn ok_response_omits_error() {
        let txt = serde_json::to_string(&respond_ok(json!(1), json!({"a": 1}))).unwrap();
        assert_eq!(txt, r#"{"jsonrpc":"2.0","id":1,"result":{"a":1}}"#);
    }

    #[test]
    fn requests_parse_with_or_without_params() {
        let req = parse_line(r#"{"jsonrpc":"2.0","id":7,"method":"Connection.Connect"}"#).unwrap();
        assert_eq!(req.id, Some(json!(7)));
        assert!(req.params.is_none());
        assert!(parse_line("not json").is_err());
        assert_eq!(parse_error().error.unwrap()["code"], json!(PARSE_ERROR));
    }
}
