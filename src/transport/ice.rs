//! ICE server configuration, sourced from the `./turn` configuration
//! endpoint rather than hard-coded, since the server, not this crate, owns
//! TURN credential minting.

use serde::Deserialize;
use webrtc::ice_transport::ice_server::RTCIceServer;

use super::TransportError;

/// One entry of the `{ iceServers: [...] }` response.
#[derive(Debug, Clone, Deserialize)]
pub struct IceServerEntry {
    #[serde(deserialize_with = "deserialize_urls")]
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TurnConfigResponse {
    #[serde(rename = "iceServers")]
    ice_servers: Vec<IceServerEntry>,
}

fn deserialize_urls<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum UrlsField {
        One(String),
        Many(Vec<String>),
    }
    Ok(match UrlsField::deserialize(deserializer)? {
        UrlsField::One(s) => vec![s],
        UrlsField::Many(v) => v,
    })
}

/// Fetch and parse the ICE server list from the `./turn` endpoint. Entry
/// `[0]` is treated as STUN and `[1]` (if present) as TURN.
pub async fn fetch_turn_config(url: &str) -> Result<Vec<IceServerEntry>, TransportError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| TransportError::IceConfigFailed(e.to_string()))?;
    let parsed: TurnConfigResponse = response
        .json()
        .await
        .map_err(|e| TransportError::IceConfigFailed(e.to_string()))?;
    Ok(parsed.ice_servers)
}

pub fn to_rtc_ice_servers(entries: &[IceServerEntry]) -> Vec<RTCIceServer> {
    entries
        .iter()
        .map(|entry| RTCIceServer {
            urls: entry.urls.clone(),
            username: entry.username.clone().unwrap_or_default(),
            credential: entry.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_multi_url_entries() {
        let json = r#"{"iceServers":[
            {"urls":"stun:stun.example.com:19302"},
            {"urls":["turn:turn.example.com:3478"],"username":"u","credential":"c"}
        ]}"#;
        let parsed: TurnConfigResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.ice_servers.len(), 2);
        assert_eq!(parsed.ice_servers[0].urls, vec!["stun:stun.example.com:19302"]);
        assert_eq!(parsed.ice_servers[1].username.as_deref(), Some("u"));
    }
}
