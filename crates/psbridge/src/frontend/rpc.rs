//! JSON-RPC 2.0 envelope and MCP method handling for the client stream.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::bridge::protocol::{ExecutionRequest, ExecutionResult};
use crate::version::ServerInfo;

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision announced in the `initialize` reply.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// The single tool exposed to clients.
pub const TOOL_NAME: &str = "powershell";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

/// Known client methods, with explicit fallbacks for everything else.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Initialize,
    /// `notifications/initialized` or the bare `initialized`.
    Initialized,
    Ping,
    ListTools,
    CallTool { name: String, arguments: Value },
    Unknown(String),
    MissingMethod,
}

impl ClientRequest {
    fn from_parts(method: Option<&str>, params: Option<&Value>) -> Self {
        let Some(method) = method else {
            return Self::MissingMethod;
        };
        match method {
            "initialize" => Self::Initialize,
            "initialized" | "notifications/initialized" => Self::Initialized,
            "ping" => Self::Ping,
            "tools/list" => Self::ListTools,
            "tools/call" => {
                let name = params
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = params
                    .and_then(|p| p.get("arguments"))
                    .filter(|a| !a.is_null())
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new()));
                Self::CallTool { name, arguments }
            }
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// One decoded client message.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcMessage {
    /// Absent (or null) for notifications.
    pub id: Option<Value>,
    pub request: ClientRequest,
}

impl RpcMessage {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(PARSE_ERROR, "Parse error").with_data(detail.to_string())
    }

    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request")
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found").with_data(method)
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, "Tool not found").with_data(name)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Decode one message body.
///
/// On failure the returned response is addressed to `null`, since the id of
/// an unreadable message is unknown.
pub fn decode_message(body: &[u8]) -> Result<RpcMessage, RpcResponse> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| RpcResponse::error(Value::Null, RpcError::parse_error(e)))?;

    let Value::Object(object) = value else {
        return Err(RpcResponse::error(Value::Null, RpcError::invalid_request()));
    };

    let id = object.get("id").filter(|id| !id.is_null()).cloned();
    let method = match object.get("method") {
        None | Some(Value::Null) => None,
        Some(Value::String(method)) => Some(method.as_str()),
        Some(_) => {
            return Err(RpcResponse::error(
                id.unwrap_or(Value::Null),
                RpcError::invalid_request(),
            ));
        }
    };
    let request = ClientRequest::from_parts(method, object.get("params"));

    Ok(RpcMessage { id, request })
}

/// Map `powershell` tool arguments onto a listener request.
pub fn parse_tool_arguments(arguments: &Value) -> Result<ExecutionRequest, RpcError> {
    const USAGE: &str = "Provide 'command' string or non-empty 'commands' array of strings";

    if let Some(command) = arguments.get("command").and_then(Value::as_str) {
        return Ok(ExecutionRequest::single(command));
    }

    let commands = arguments
        .get("commands")
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
        .ok_or_else(|| RpcError::invalid_params(USAGE))?;

    let commands = commands
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect::<Option<Vec<String>>>()
        .ok_or_else(|| RpcError::invalid_params(USAGE))?;

    match <[String; 1]>::try_from(commands) {
        Ok([command]) => Ok(ExecutionRequest::single(command)),
        Err(commands) => Ok(ExecutionRequest::batch(commands)),
    }
}

pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "serverInfo": ServerInfo::current(),
        "capabilities": { "tools": {} },
    })
}

pub fn tools_list_result() -> Value {
    json!({
        "tools": [{
            "name": TOOL_NAME,
            "description": "Run one or more PowerShell commands on the host through the execution listener.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Single PowerShell command to execute.",
                    },
                    "commands": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1,
                        "description": "PowerShell commands to run in order, each in a fresh process.",
                    },
                },
                "additionalProperties": false,
            },
        }],
    })
}

/// `tools/call` result for a finished execution.
pub fn tool_call_result(result: &ExecutionResult) -> Value {
    json!({
        "content": [{ "type": "text", "text": format_execution_text(result) }],
        "structuredContent": result,
        "isError": !result.succeeded(),
    })
}

/// Human-readable summary shown to the model.
pub fn format_execution_text(result: &ExecutionResult) -> String {
    let status = if result.ok { "completed" } else { "failed" };
    let mut header = format!("status: {status}, exit code: {}", result.code);
    if let Some(items) = &result.results {
        header.push_str(&format!(", commands: {}", items.len()));
    }

    let mut sections = vec![header];
    let stdout = result.stdout.trim_end_matches(['\r', '\n']);
    let stderr = result.stderr.trim_end_matches(['\r', '\n']);
    if !stdout.is_empty() {
        sections.push(stdout.to_string());
    }
    if !stderr.is_empty() {
        sections.push(format!("[stderr]\n{stderr}"));
    }
    if sections.len() == 1 {
        sections.push("(no output)".to_string());
    }
    sections.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(body: &str) -> RpcMessage {
        decode_message(body.as_bytes()).unwrap()
    }

    fn decode_err(body: &str) -> RpcResponse {
        decode_message(body.as_bytes()).unwrap_err()
    }

    #[test]
    fn decodes_known_methods() {
        let cases = [
            ("initialize", ClientRequest::Initialize),
            ("initialized", ClientRequest::Initialized),
            ("notifications/initialized", ClientRequest::Initialized),
            ("ping", ClientRequest::Ping),
            ("tools/list", ClientRequest::ListTools),
            ("resources/list", ClientRequest::Unknown("resources/list".into())),
        ];
        for (method, expected) in cases {
            let body = format!(r#"{{"jsonrpc":"2.0","id":1,"method":"{method}"}}"#);
            let message = decode(&body);
            assert_eq!(message.request, expected, "method {method}");
            assert_eq!(message.id, Some(json!(1)));
        }
    }

    #[test]
    fn decodes_tool_call() {
        let message = decode(
            r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"powershell","arguments":{"command":"Get-Date"}}}"#,
        );
        assert_eq!(
            message.request,
            ClientRequest::CallTool {
                name: "powershell".into(),
                arguments: json!({"command": "Get-Date"}),
            }
        );
    }

    #[test]
    fn tool_call_without_params_has_empty_name_and_arguments() {
        let message = decode(r#"{"jsonrpc":"2.0","id":2,"method":"tools/call"}"#);
        assert_eq!(
            message.request,
            ClientRequest::CallTool {
                name: String::new(),
                arguments: json!({}),
            }
        );
    }

    #[test]
    fn missing_id_is_notification() {
        assert!(
            decode(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).is_notification()
        );
        assert!(decode(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).is_notification());
        assert!(!decode(r#"{"jsonrpc":"2.0","id":0,"method":"ping"}"#).is_notification());
    }

    #[test]
    fn missing_method() {
        let message = decode(r#"{"jsonrpc":"2.0","id":5}"#);
        assert_eq!(message.request, ClientRequest::MissingMethod);
    }

    #[test]
    fn unparsable_body_is_parse_error_for_null_id() {
        let response = decode_err("{not json");
        assert_eq!(response.id, Value::Null);
        assert_eq!(response.error.map(|e| e.code), Some(PARSE_ERROR));
    }

    #[test]
    fn non_object_and_bad_method_are_invalid_requests() {
        let response = decode_err("[1,2]");
        assert_eq!(response.error.map(|e| e.code), Some(INVALID_REQUEST));

        let response = decode_err(r#"{"id":3,"method":7}"#);
        assert_eq!(response.id, json!(3));
        assert_eq!(response.error.map(|e| e.code), Some(INVALID_REQUEST));
    }

    #[test]
    fn tool_arguments_single_and_batch() {
        assert_eq!(
            parse_tool_arguments(&json!({"command": "dir"})).unwrap(),
            ExecutionRequest::single("dir")
        );
        assert_eq!(
            parse_tool_arguments(&json!({"commands": ["a", "b"]})).unwrap(),
            ExecutionRequest::batch(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            parse_tool_arguments(&json!({"commands": ["only"]})).unwrap(),
            ExecutionRequest::single("only")
        );
        // `command` wins when both are present.
        assert_eq!(
            parse_tool_arguments(&json!({"command": "x", "commands": ["y", "z"]})).unwrap(),
            ExecutionRequest::single("x")
        );
    }

    #[test]
    fn tool_arguments_rejected() {
        for arguments in [
            json!({}),
            json!({"command": 5}),
            json!({"commands": []}),
            json!({"commands": ["ok", 1]}),
            json!({"commands": "dir"}),
        ] {
            let err = parse_tool_arguments(&arguments).unwrap_err();
            assert_eq!(err.code, INVALID_PARAMS, "arguments {arguments}");
            assert_eq!(
                err.message,
                "Provide 'command' string or non-empty 'commands' array of strings"
            );
        }
    }

    #[test]
    fn error_response_shape() {
        let response = RpcResponse::error(json!(4), RpcError::tool_not_found("bash"));
        insta::assert_json_snapshot!(response, @r#"
        {
          "jsonrpc": "2.0",
          "id": 4,
          "error": {
            "code": -32601,
            "message": "Tool not found",
            "data": "bash"
          }
        }
        "#);
    }

    #[test]
    fn initialize_announces_server() {
        let result = initialize_result();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "psbridge");
        assert_eq!(result["serverInfo"]["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(result["capabilities"], json!({"tools": {}}));
    }

    #[test]
    fn tools_list_exposes_one_tool() {
        let result = tools_list_result();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], TOOL_NAME);
        assert_eq!(tools[0]["inputSchema"]["additionalProperties"], false);
        assert_eq!(tools[0]["inputSchema"]["properties"]["commands"]["minItems"], 1);
    }

    #[test]
    fn tool_call_result_for_successful_command() {
        let result = ExecutionResult::exited("hello\r\n", "", 0);
        insta::assert_json_snapshot!(tool_call_result(&result), @r#"
        {
          "content": [
            {
              "text": "status: completed, exit code: 0\nhello",
              "type": "text"
            }
          ],
          "isError": false,
          "structuredContent": {
            "code": 0,
            "ok": true,
            "stderr": "",
            "stdout": "hello\r\n"
          }
        }
        "#);
    }

    #[test]
    fn nonzero_exit_is_an_error_result() {
        let result = ExecutionResult::exited("", "boom\n", 2);
        let value = tool_call_result(&result);
        assert_eq!(value["isError"], true);
        assert_eq!(
            value["content"][0]["text"],
            "status: completed, exit code: 2\n[stderr]\nboom"
        );
    }

    #[test]
    fn failure_text() {
        let result = ExecutionResult::failure("could not connect to listener (no candidates)");
        assert_eq!(
            format_execution_text(&result),
            "status: failed, exit code: -1\n[stderr]\ncould not connect to listener (no candidates)"
        );
    }

    #[test]
    fn empty_output_text() {
        let result = ExecutionResult::exited("", "", 0);
        assert_eq!(
            format_execution_text(&result),
            "status: completed, exit code: 0\n(no output)"
        );
    }

    #[test]
    fn batch_text_counts_commands() {
        let result = ExecutionResult::from_batch(vec![
            ExecutionResult::exited("a\n", "", 0),
            ExecutionResult::exited("b\n", "", 0),
        ]);
        assert_eq!(
            format_execution_text(&result),
            "status: completed, exit code: 0, commands: 2\n[command 0 stdout]\na\n\n[command 1 stdout]\nb"
        );
    }
}
