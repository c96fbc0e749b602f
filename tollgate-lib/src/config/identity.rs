use ipnet::IpNet;
use serde::Deserialize;

/// How caller identities are derived from requests
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct IdentityConfig {
    /// Honour the first X-Forwarded-For entry when the peer is a trusted proxy
    /// Default: false (always use the peer address)
    #[serde(default)]
    pub trust_forwarded_for: bool,
    /// Proxies whose X-Forwarded-For header is believed
    /// Supports CIDR notation: ["10.0.0.0/8", "::1/128"]
    /// Empty list with trust_forwarded_for = true trusts every peer
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_ip_networks")]
    pub trusted_proxies: Vec<IpNet>,
    /// Header carrying the authenticated user id, set by the upstream auth layer
    /// Default: "x-authenticated-user"
    #[serde(default = "default_user_header")]
    pub user_header: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            trust_forwarded_for: false,
            trusted_proxies: vec![],
            user_header: default_user_header(),
        }
    }
}

fn default_user_header() -> String {
    "x-authenticated-user".to_string()
}

/// Custom deserializer for IP networks that reports the offending entry
fn deserialize_ip_networks<'de, D>(deserializer: D) -> Result<Vec<IpNet>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let strings: Vec<String> = Vec::deserialize(deserializer)?;
    let mut networks = Vec::with_capacity(strings.len());

    for s in strings {
        match s.parse::<IpNet>() {
            Ok(net) => networks.push(net),
            Err(e) => {
                return Err(serde::de::Error::custom(format!("Invalid IP network '{}': {}", s, e)));
            }
        }
    }

    Ok(networks)
}
