//! Version information for the cloakroom bot.

/// Crate version from Cargo.toml
pub const CLOAKROOM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VersionInfo {
    pub cloakroom: &'static str,
    /// Bot username as reported by `getMe`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            cloakroom: CLOAKROOM_VERSION,
            bot: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bot(mut self, username: String) -> Self {
        self.bot = Some(username);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_crate_version() {
        let info = VersionInfo::new();
        assert_eq!(info.cloakroom, CLOAKROOM_VERSION);
        assert!(info.bot.is_none());
    }

    #[test]
    fn version_info_serializes_minimal() {
        let info = VersionInfo {
            cloakroom: "0.1.0",
            bot: None,
        };
        insta::assert_json_snapshot!(info, @r#"
        {
          "cloakroom": "0.1.0"
        }
        "#);
    }

    #[test]
    fn version_info_serializes_bot_name() {
        let info = VersionInfo {
            cloakroom: "0.1.0",
            bot: None,
        }
        .with_bot("cloak_bot".to_string());
        insta::assert_json_snapshot!(info, @r#"
        {
          "cloakroom": "0.1.0",
          "bot": "cloak_bot"
        }
        "#);
    }
}
