//! Server configuration
//!
//! Loaded once at startup from a JSON document (the schema doubles as the
//! contract with the external admin UI) and treated as immutable for the
//! lifetime of the process. Environment overrides (`PORT`, `DISABLE_UI`)
//! are applied by the CLI before the snapshot is shared.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Listener settings
    pub server: ServerConfig,
    /// Ordered room list; the first entry is the default room
    pub rooms: Vec<RoomConfig>,
    /// Ordered IP filter list
    pub ip_filters: Vec<IpFilterRule>,
    /// Connection caps
    pub connection_limits: ConnectionLimits,
    /// Rate limit rules
    pub rate_limit_rules: Vec<RateLimitRule>,
    /// Authentication settings
    pub auth: AuthConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Listen port
    pub port: u16,
    /// Bind address
    pub host: String,
    /// WebSocket upgrade path
    pub ws_path: String,
}

/// Per-room configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    /// Stable room identifier
    pub id: String,
    /// `broadcast`, `unicast`, or `multicast`; unrecognized values route as
    /// broadcast
    #[serde(default = "default_routing_mode")]
    pub routing_mode: String,
    /// When present, only these message types may be sent in the room
    #[serde(default)]
    pub allowed_message_types: Option<Vec<String>>,
    /// Maximum members (enforced at upgrade time against the default room)
    #[serde(default)]
    pub max_members: Option<usize>,
}

/// One IP filter entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpFilterRule {
    /// Literal address or IPv4 `network/bits` CIDR
    pub pattern: String,
    /// Whitelist or blacklist
    #[serde(rename = "type")]
    pub kind: FilterKind,
}

/// Filter entry polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Address must match at least one whitelist entry when any exist
    Whitelist,
    /// A matching address is denied
    Blacklist,
}

/// Connection caps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionLimits {
    /// Maximum live connections sharing one remote address
    #[serde(rename = "maxConnectionsPerIP")]
    pub max_connections_per_ip: usize,
    /// Maximum members in the default room, checked at upgrade time
    pub max_connections_per_room: usize,
    /// Maximum live connections overall
    pub max_total_connections: usize,
    /// Defined in the schema but not currently enforced
    pub max_connections_per_user: usize,
}

/// One rate limit rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRule {
    /// Disabled rules are ignored entirely
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Frames admitted per window
    pub max_messages: u32,
    /// Window length in milliseconds
    pub window_ms: i64,
    /// When present, the rule applies only to these message types
    #[serde(default)]
    pub message_types: Option<Vec<String>>,
    /// Accepted in the schema; the enforcer is per-client only
    #[serde(default)]
    pub scope: Option<String>,
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// Master switch; disabled means every connection is anonymous
    pub enabled: bool,
    /// Authentication method
    pub method: AuthMethod,
    /// Skip authentication and assign anonymous identities
    pub allow_anonymous: bool,
    /// Prefix for anonymous user ids
    pub anonymous_prefix: String,
    /// Human-readable text the wallet displays; the signed challenge appends
    /// the nonce token to it
    pub handshake_message: String,
    /// Challenge validity in seconds
    pub handshake_expiry: u64,
}

/// Supported authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// No authentication; anonymous identities
    None,
    /// `token` query parameter derives the user id (placeholder: the token
    /// itself is not validated)
    Token,
    /// EIP-191 wallet challenge/response
    EthereumHandshake,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset
    pub level: String,
    /// Log connection admission and teardown at info
    pub log_connections: bool,
    /// Log per-frame routing at debug
    pub log_messages: bool,
}

fn default_routing_mode() -> String {
    "broadcast".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 6742,
            host: "0.0.0.0".to_string(),
            ws_path: "/ws".to_string(),
        }
    }
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_connections_per_ip: 10,
            max_connections_per_room: 50,
            max_total_connections: 500,
            max_connections_per_user: 5,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: AuthMethod::EthereumHandshake,
            allow_anonymous: false,
            anonymous_prefix: "anon_".to_string(),
            handshake_message: "Sign this to authenticate with the signaling server".to_string(),
            handshake_expiry: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_connections: true,
            log_messages: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rooms: vec![RoomConfig {
                id: "default".to_string(),
                routing_mode: "broadcast".to_string(),
                allowed_message_types: Some(
                    ["offer", "answer", "ice-candidate", "join", "leave", "custom"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                ),
                max_members: None,
            }],
            ip_filters: Vec::new(),
            connection_limits: ConnectionLimits::default(),
            rate_limit_rules: Vec::new(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Minimum challenge validity (prevents accidental zero = instant expiry)
    const MIN_HANDSHAKE_EXPIRY_SECS: u64 = 1;

    /// Load a configuration document from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e))?;
        Ok(config)
    }

    /// Validate and repair configuration values
    pub fn validate(&mut self) {
        if self.server.ws_path.is_empty() || !self.server.ws_path.starts_with('/') {
            tracing::warn!(
                "invalid wsPath '{}', falling back to /ws",
                self.server.ws_path
            );
            self.server.ws_path = "/ws".to_string();
        }
        if self.auth.handshake_expiry < Self::MIN_HANDSHAKE_EXPIRY_SECS {
            tracing::warn!(
                "handshakeExpiry {}s too small, clamping to {}s",
                self.auth.handshake_expiry,
                Self::MIN_HANDSHAKE_EXPIRY_SECS
            );
            self.auth.handshake_expiry = Self::MIN_HANDSHAKE_EXPIRY_SECS;
        }
    }

    /// Look up a room configuration by id
    pub fn room(&self, id: &str) -> Option<&RoomConfig> {
        self.rooms.iter().find(|r| r.id == id)
    }

    /// The default room: the first configured entry, if any
    pub fn default_room(&self) -> Option<&RoomConfig> {
        self.rooms.first()
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    /// File could not be read
    Io(String, std::io::Error),
    /// Document is not valid JSON for the schema
    Parse(String, serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "failed to read config {}: {}", path, e),
            Self::Parse(path, e) => write!(f, "failed to parse config {}: {}", path, e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_default_room() {
        let config = Config::default();
        assert_eq!(config.server.port, 6742);
        assert_eq!(config.server.ws_path, "/ws");
        let room = config.default_room().unwrap();
        assert_eq!(room.id, "default");
        assert_eq!(room.routing_mode, "broadcast");
    }

    #[test]
    fn test_parse_full_document() {
        let doc = r#"{
            "server": { "port": 9000, "host": "127.0.0.1", "wsPath": "/signal" },
            "rooms": [
                { "id": "lobby", "routingMode": "unicast",
                  "allowedMessageTypes": ["custom"], "maxMembers": 4 }
            ],
            "ipFilters": [
                { "pattern": "10.0.0.0/8", "type": "blacklist" },
                { "pattern": "192.168.1.5", "type": "whitelist" }
            ],
            "connectionLimits": { "maxConnectionsPerIP": 2, "maxConnectionsPerRoom": 8,
                                  "maxTotalConnections": 100, "maxConnectionsPerUser": 1 },
            "rateLimitRules": [
                { "enabled": true, "maxMessages": 30, "windowMs": 10000,
                  "messageTypes": ["custom"], "scope": "per-client" }
            ],
            "auth": { "enabled": true, "method": "ethereum-handshake",
                      "allowAnonymous": false, "anonymousPrefix": "anon_",
                      "handshakeMessage": "Sign this", "handshakeExpiry": 60 },
            "logging": { "level": "debug", "logConnections": false, "logMessages": true }
        }"#;
        let config: Config = serde_json::from_str(doc).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.ws_path, "/signal");
        assert_eq!(config.rooms[0].routing_mode, "unicast");
        assert_eq!(config.rooms[0].max_members, Some(4));
        assert_eq!(config.ip_filters[0].kind, FilterKind::Blacklist);
        assert_eq!(config.connection_limits.max_connections_per_ip, 2);
        assert_eq!(config.rate_limit_rules[0].max_messages, 30);
        assert_eq!(config.rate_limit_rules[0].scope.as_deref(), Some("per-client"));
        assert_eq!(config.auth.method, AuthMethod::EthereumHandshake);
        assert_eq!(config.auth.handshake_expiry, 60);
        assert!(config.logging.log_messages);
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{ "server": { "port": 7000 } }"#).unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.auth.handshake_expiry, 300);
        assert_eq!(config.connection_limits.max_total_connections, 500);
    }

    #[test]
    fn test_validate_repairs_ws_path() {
        let mut config = Config::default();
        config.server.ws_path = "no-slash".to_string();
        config.validate();
        assert_eq!(config.server.ws_path, "/ws");
    }

    #[test]
    fn test_validate_clamps_handshake_expiry() {
        let mut config = Config::default();
        config.auth.handshake_expiry = 0;
        config.validate();
        assert_eq!(config.auth.handshake_expiry, 1);
    }

    #[test]
    fn test_room_lookup_and_default_fallback_order() {
        let mut config = Config::default();
        config.rooms.push(RoomConfig {
            id: "second".to_string(),
            routing_mode: "broadcast".to_string(),
            allowed_message_types: None,
            max_members: None,
        });
        assert_eq!(config.room("second").unwrap().id, "second");
        assert!(config.room("missing").is_none());
        assert_eq!(config.default_room().unwrap().id, "default");
    }

    #[test]
    fn test_rule_enabled_defaults_true() {
        let rule: RateLimitRule =
            serde_json::from_str(r#"{ "maxMessages": 5, "windowMs": 1000 }"#).unwrap();
        assert!(rule.enabled);
        assert!(rule.message_types.is_none());
    }
}
