//! Version information for psbridge.

/// psbridge version from Cargo.toml
pub const PSBRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name announced to MCP clients.
pub const SERVER_NAME: &str = "psbridge";

/// `serverInfo` block of the `initialize` reply.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl ServerInfo {
    pub fn current() -> Self {
        Self {
            name: SERVER_NAME,
            version: PSBRIDGE_VERSION,
        }
    }
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_info_has_crate_version() {
        let info = ServerInfo::current();
        assert_eq!(info.name, "psbridge");
        assert_eq!(info.version, PSBRIDGE_VERSION);
        assert_eq!(info, ServerInfo::default());
    }

    #[test]
    fn server_info_serializes() {
        let info = ServerInfo {
            name: SERVER_NAME,
            version: "0.1.0",
        };
        insta::assert_json_snapshot!(info, @r#"
        {
          "name": "psbridge",
          "version": "0.1.0"
        }
        "#);
    }
}
