//! Chain node JSON-RPC client.
//!
//! Resolves client addresses to network ids and fetches the multiaddrs a
//! storage provider announces on chain.

use super::{ensure_success, AddressResolver, ProviderInfoLookup};
use crate::error::UpstreamError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::debug;

/// JSON-RPC request envelope.
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

/// JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MinerInfo {
    #[serde(default)]
    multiaddrs: Option<Vec<String>>,
}

/// Chain node client.
pub struct LotusClient {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl LotusClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            url: url.into(),
            token,
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, UpstreamError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        debug!("RPC {} -> {}", method, self.url);

        let mut builder = self.http.post(&self.url).json(&request);
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }

        let response = ensure_success(builder.send().await?).await?;
        let body: RpcResponse<T> = response.json().await?;

        if let Some(err) = body.error {
            if err.message.contains("not found") {
                return Err(UpstreamError::NotFound(err.message));
            }
            return Err(UpstreamError::Status {
                status: 200,
                body: format!("rpc error {}: {}", err.code, err.message),
            });
        }

        body.result
            .ok_or_else(|| UpstreamError::Decode(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl AddressResolver for LotusClient {
    async fn resolve(&self, address: &str) -> Result<String, UpstreamError> {
        self.call("Filecoin.StateLookupID", json!([address, null]))
            .await
    }
}

#[async_trait]
impl ProviderInfoLookup for LotusClient {
    async fn provider_network_info(&self, provider_id: &str) -> Result<Vec<String>, UpstreamError> {
        let info: MinerInfo = self
            .call("Filecoin.StateMinerInfo", json!([provider_id, null]))
            .await?;

        let addrs = info
            .multiaddrs
            .unwrap_or_default()
            .iter()
            .filter_map(|encoded| STANDARD.decode(encoded).ok())
            .filter_map(|bytes| decode_multiaddr(&bytes))
            .collect();

        Ok(addrs)
    }
}

fn read_varint(bytes: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(*pos)?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Option<&'a [u8]> {
    let end = pos.checked_add(len)?;
    let slice = bytes.get(*pos..end)?;
    *pos = end;
    Some(slice)
}

/// Decode a binary multiaddr into its text form.
///
/// Only the protocols providers announce in practice are understood;
/// anything else yields `None`.
pub fn decode_multiaddr(bytes: &[u8]) -> Option<String> {
    let mut pos = 0;
    let mut out = String::new();

    while pos < bytes.len() {
        let code = read_varint(bytes, &mut pos)?;
        match code {
            4 => {
                let b = take(bytes, &mut pos, 4)?;
                out.push_str(&format!("/ip4/{}", Ipv4Addr::new(b[0], b[1], b[2], b[3])));
            }
            41 => {
                let b: [u8; 16] = take(bytes, &mut pos, 16)?.try_into().ok()?;
                out.push_str(&format!("/ip6/{}", Ipv6Addr::from(b)));
            }
            6 | 273 => {
                let b = take(bytes, &mut pos, 2)?;
                let port = u16::from_be_bytes([b[0], b[1]]);
                let proto = if code == 6 { "tcp" } else { "udp" };
                out.push_str(&format!("/{}/{}", proto, port));
            }
            53 | 54 | 55 | 56 => {
                let len = usize::try_from(read_varint(bytes, &mut pos)?).ok()?;
                let name = std::str::from_utf8(take(bytes, &mut pos, len)?).ok()?;
                let proto = match code {
                    53 => "dns",
                    54 => "dns4",
                    55 => "dns6",
                    _ => "dnsaddr",
                };
                out.push_str(&format!("/{}/{}", proto, name));
            }
            460 => out.push_str("/quic"),
            461 => out.push_str("/quic-v1"),
            477 => out.push_str("/ws"),
            478 => out.push_str("/wss"),
            443 => out.push_str("/https"),
            480 => out.push_str("/http"),
            _ => return None,
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}
