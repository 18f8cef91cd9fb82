use serde::{Deserialize, Serialize};

pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26"];
pub const LATEST_PROTOCOL_VERSION: &str = "2025-03-26";

/// Echo a supported version; anything else negotiates to the latest one.
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|requested| {
            SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .copied()
                .find(|supported| *supported == requested)
        })
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

/// Methods the session server answers. Anything else is `-32601`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpMethod {
    Initialize,
    Initialized,
    Ping,
    ToolsList,
    ToolsCall,
}

impl McpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Initialized => "notifications/initialized",
            Self::Ping => "ping",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
        }
    }

    /// `tools/*` methods are refused until the session is initialized.
    pub fn requires_initialized(self) -> bool {
        matches!(self, Self::ToolsList | Self::ToolsCall)
    }
}

impl TryFrom<&str> for McpMethod {
    type Error = ();
    fn try_from(s: &str) -> Result<Self, ()> {
        match s {
            "initialize" => Ok(Self::Initialize),
            "notifications/initialized" => Ok(Self::Initialized),
            "ping" => Ok(Self::Ping),
            "tools/list" => Ok(Self::ToolsList),
            "tools/call" => Ok(Self::ToolsCall),
            _ => Err(()),
        }
    }
}

/// `clientInfo` of an initialize request. `id` names the calling actor;
/// clients that omit it are identified by `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ClientInfo {
    pub fn actor_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.name.as_deref())
            .filter(|actor| !actor.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default)]
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: serde_json::Value,
    pub server_info: ServerInfo,
}

/// Tool definition as returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// `tools/call` request params.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn negotiation_echoes_supported_versions() {
        assert_eq!(negotiate_protocol_version(Some("2024-11-05")), "2024-11-05");
        assert_eq!(negotiate_protocol_version(Some("2025-03-26")), "2025-03-26");
        assert_eq!(negotiate_protocol_version(Some("1999-01-01")), LATEST_PROTOCOL_VERSION);
        assert_eq!(negotiate_protocol_version(None), LATEST_PROTOCOL_VERSION);
    }

    #[test]
    fn method_names_round_trip() {
        for method in [
            McpMethod::Initialize,
            McpMethod::Initialized,
            McpMethod::Ping,
            McpMethod::ToolsList,
            McpMethod::ToolsCall,
        ] {
            assert_eq!(McpMethod::try_from(method.as_str()), Ok(method));
        }
        assert!(McpMethod::try_from("tools/delete").is_err());
        assert!(McpMethod::ToolsCall.requires_initialized());
        assert!(!McpMethod::Ping.requires_initialized());
    }

    #[test]
    fn initialize_params_use_camel_case() {
        let params: InitializeParams = serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "clientInfo": {"id": "c1", "name": "Client"}
        }))
        .expect("params");
        assert_eq!(params.protocol_version.as_deref(), Some("2024-11-05"));
        assert_eq!(params.client_info.actor_id(), Some("c1"));
    }

    #[test]
    fn actor_falls_back_to_client_name() {
        let info = ClientInfo {
            id: None,
            name: Some("Client".into()),
            version: None,
        };
        assert_eq!(info.actor_id(), Some("Client"));
        assert_eq!(ClientInfo::default().actor_id(), None);
    }

    #[test]
    fn tool_definition_serializes_input_schema_in_camel_case() {
        let tool = McpToolDefinition {
            name: "graph.query".into(),
            description: "query".into(),
            input_schema: json!({"type": "object"}),
        };
        let value = serde_json::to_value(&tool).expect("serialize");
        assert_eq!(value["inputSchema"]["type"], "object");
    }
}
