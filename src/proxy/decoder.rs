//! Link decoder module for extracting endpoints from proxy links
//!
//! Supported formats:
//! - `vmess://BASE64(JSON)` with `add`, `port` and `ps` fields
//! - `vless://`, `trojan://` and `ss://` URIs, where the host, port and
//!   fragment carry the endpoint and label
//!
//! Decoding only checks that a link parses. Whether the endpoint is usable
//! (non-empty host, non-zero port) is left to the caller.

use crate::proxy::codec;
use crate::proxy::models::{Protocol, ProtocolRecord, RawEntry};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

/// Label given to URI links without a fragment
pub const NO_REMARK: &str = "NoRemark";

/// Endpoint fields pulled out of a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub label: String,
}

/// Decode function registered for a protocol
pub type DecodeFn = fn(&str) -> Option<Endpoint>;

/// `port` as it appears in vmess documents: a number or a numeric string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum VmessPort {
    Number(u64),
    Float(f64),
    Text(String),
    Other(Value),
}

impl Default for VmessPort {
    fn default() -> Self {
        VmessPort::Other(Value::Null)
    }
}

impl VmessPort {
    /// Normalize to a port number; anything unusable becomes 0
    fn to_port(&self) -> u16 {
        match self {
            VmessPort::Number(n) => u16::try_from(*n).unwrap_or(0),
            VmessPort::Float(f) if f.fract() == 0.0 && (0.0..=f64::from(u16::MAX)).contains(f) => *f as u16,
            VmessPort::Float(_) => 0,
            VmessPort::Text(s) => s.trim().parse().unwrap_or(0),
            VmessPort::Other(_) => 0,
        }
    }
}

/// Text fields are read loosely: anything but a JSON string becomes empty
#[derive(Debug, Deserialize)]
struct VmessDocument {
    #[serde(default)]
    add: Value,
    #[serde(default)]
    port: VmessPort,
    #[serde(default)]
    ps: Value,
}

fn text_field(value: Value) -> String {
    match value {
        Value::String(s) => s,
        _ => String::new(),
    }
}

/// Link decoder for the structured pipeline
pub struct LinkDecoder;

impl LinkDecoder {
    /// Decoder registered for a protocol, if it has one
    pub fn decoder_for(protocol: Protocol) -> Option<DecodeFn> {
        match protocol {
            Protocol::Vmess => Some(Self::decode_vmess as DecodeFn),
            Protocol::Vless | Protocol::Trojan | Protocol::Shadowsocks => Some(Self::decode_uri as DecodeFn),
            Protocol::ShadowsocksR | Protocol::Hysteria2 | Protocol::Tuic | Protocol::Warp => None,
        }
    }

    /// Decode an entry into a record
    pub fn decode(entry: &RawEntry) -> Option<ProtocolRecord> {
        let decode = Self::decoder_for(entry.protocol)?;
        let endpoint = decode(&entry.link)?;
        Some(ProtocolRecord::new(
            entry.protocol,
            entry.link.clone(),
            endpoint.host,
            endpoint.port,
            endpoint.label,
        ))
    }

    /// Decode a bare link string, detecting its protocol by prefix
    pub fn decode_link(link: &str) -> Option<ProtocolRecord> {
        RawEntry::new(link).and_then(|entry| Self::decode(&entry))
    }

    /// Decode a vmess link
    pub fn decode_vmess(link: &str) -> Option<Endpoint> {
        let encoded = link.strip_prefix(Protocol::Vmess.prefix())?;
        let json = codec::decode_padded(encoded).ok()?;
        let doc: VmessDocument = serde_json::from_slice(&json).ok()?;

        Some(Endpoint {
            host: text_field(doc.add),
            port: doc.port.to_port(),
            label: text_field(doc.ps),
        })
    }

    /// Decode a URI-shaped link (vless, trojan, shadowsocks)
    pub fn decode_uri(link: &str) -> Option<Endpoint> {
        let url = Url::parse(link).ok()?;

        let host = url
            .host_str()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url.port().unwrap_or(0);

        let label = match url.fragment() {
            Some(fragment) if !fragment.is_empty() => urlencoding::decode(fragment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| fragment.to_string()),
            _ => NO_REMARK.to_string(),
        };

        Some(Endpoint { host, port, label })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VMESS_STRING_PORT: &str =
        "vmess://eyJhZGQiOiJ0ZXN0LmNvbSIsInBvcnQiOiI0NDMiLCJwcyI6IlRlc3QifQ==";

    #[test]
    fn test_decode_vmess_string_port() {
        let record = LinkDecoder::decode_link(VMESS_STRING_PORT).unwrap();
        assert_eq!(record.protocol, Protocol::Vmess);
        assert_eq!(record.host, "test.com");
        assert_eq!(record.port, 443);
        assert_eq!(record.label, "Test");
        assert_eq!(record.link, VMESS_STRING_PORT);
        assert!(record.latency_ms.is_none());
    }

    #[test]
    fn test_decode_vmess_numeric_port() {
        // {"add":"example.org","port":8443,"ps":"Numeric"}
        let link = "vmess://eyJhZGQiOiJleGFtcGxlLm9yZyIsInBvcnQiOjg0NDMsInBzIjoiTnVtZXJpYyJ9";
        let endpoint = LinkDecoder::decode_vmess(link).unwrap();
        assert_eq!(endpoint.host, "example.org");
        assert_eq!(endpoint.port, 8443);
        assert_eq!(endpoint.label, "Numeric");
    }

    #[test]
    fn test_decode_vmess_unpadded() {
        let unpadded = VMESS_STRING_PORT.trim_end_matches('=');
        let endpoint = LinkDecoder::decode_vmess(unpadded).unwrap();
        assert_eq!(endpoint.host, "test.com");
    }

    #[test]
    fn test_decode_vmess_unparseable_port_is_zero() {
        // {"add":"example.org","port":"abc","ps":"Bad"}
        let link = "vmess://eyJhZGQiOiJleGFtcGxlLm9yZyIsInBvcnQiOiJhYmMiLCJwcyI6IkJhZCJ9";
        let record = LinkDecoder::decode_link(link).unwrap();
        assert_eq!(record.port, 0);
        assert!(!record.is_usable());
    }

    #[test]
    fn test_decode_vmess_empty_host_not_usable() {
        // {"add":"","port":443}
        let record = LinkDecoder::decode_link("vmess://eyJhZGQiOiIiLCJwb3J0Ijo0NDN9").unwrap();
        assert_eq!(record.host, "");
        assert_eq!(record.label, "");
        assert!(!record.is_usable());
    }

    fn vmess(doc: &str) -> String {
        format!("vmess://{}", codec::encode(doc))
    }

    #[test]
    fn test_decode_vmess_null_or_numeric_label() {
        let record = LinkDecoder::decode_link(&vmess(r#"{"add":"test.com","port":443,"ps":null}"#)).unwrap();
        assert_eq!(record.host, "test.com");
        assert_eq!(record.port, 443);
        assert_eq!(record.label, "");
        assert!(record.is_usable());

        let record = LinkDecoder::decode_link(&vmess(r#"{"add":"test.com","port":443,"ps":123}"#)).unwrap();
        assert_eq!(record.label, "");
        assert!(record.is_usable());
    }

    #[test]
    fn test_decode_vmess_non_string_host_is_empty() {
        let record = LinkDecoder::decode_link(&vmess(r#"{"add":42,"port":443,"ps":"x"}"#)).unwrap();
        assert_eq!(record.host, "");
        assert!(!record.is_usable());
    }

    #[test]
    fn test_decode_vmess_float_port() {
        let endpoint = LinkDecoder::decode_vmess(&vmess(r#"{"add":"test.com","port":443.0}"#)).unwrap();
        assert_eq!(endpoint.port, 443);

        let endpoint = LinkDecoder::decode_vmess(&vmess(r#"{"add":"test.com","port":443.5}"#)).unwrap();
        assert_eq!(endpoint.port, 0);
        let endpoint = LinkDecoder::decode_vmess(&vmess(r#"{"add":"test.com","port":70000.0}"#)).unwrap();
        assert_eq!(endpoint.port, 0);
    }

    #[test]
    fn test_decode_vmess_invalid_payloads() {
        assert!(LinkDecoder::decode_link("vmess://test").is_none());
        // base64("not json")
        assert!(LinkDecoder::decode_link("vmess://bm90IGpzb24=").is_none());
        assert!(LinkDecoder::decode_link("vmess://!!!").is_none());
    }

    #[test]
    fn test_decode_vless() {
        let link = "vless://12345678-1234-1234-1234-123456789abc@test.com:443?encryption=none&security=tls&type=ws&host=test.com&path=/ws#TestVLess";
        let record = LinkDecoder::decode_link(link).unwrap();
        assert_eq!(record.protocol, Protocol::Vless);
        assert_eq!(record.host, "test.com");
        assert_eq!(record.port, 443);
        assert_eq!(record.label, "TestVLess");
    }

    #[test]
    fn test_decode_trojan_without_fragment() {
        let record = LinkDecoder::decode_link("trojan://pass@test.com:443?security=tls&type=tcp").unwrap();
        assert_eq!(record.protocol, Protocol::Trojan);
        assert_eq!(record.host, "test.com");
        assert_eq!(record.port, 443);
        assert_eq!(record.label, NO_REMARK);
    }

    #[test]
    fn test_decode_shadowsocks() {
        let record = LinkDecoder::decode_link("ss://YWVzLTI1Ni1nY206dGVzdA@test.com:443#TestSS").unwrap();
        assert_eq!(record.protocol, Protocol::Shadowsocks);
        assert_eq!(record.host, "test.com");
        assert_eq!(record.port, 443);
        assert_eq!(record.label, "TestSS");
    }

    #[test]
    fn test_decode_uri_percent_encoded_label() {
        let endpoint = LinkDecoder::decode_uri("trojan://p@h.example:8443#My%20Server").unwrap();
        assert_eq!(endpoint.label, "My Server");
    }

    #[test]
    fn test_decode_uri_missing_port() {
        let endpoint = LinkDecoder::decode_uri("vless://id@test.com#x").unwrap();
        assert_eq!(endpoint.port, 0);
    }

    #[test]
    fn test_decode_uri_ipv6_host() {
        let endpoint = LinkDecoder::decode_uri("trojan://p@[2001:db8::1]:443#v6").unwrap();
        assert_eq!(endpoint.host, "2001:db8::1");
        assert_eq!(endpoint.port, 443);
    }

    #[test]
    fn test_decode_uri_unparseable() {
        assert!(LinkDecoder::decode_uri("trojan://p@host:99999").is_none());
    }

    #[test]
    fn test_unrecognized_or_undecodable_protocols() {
        assert!(LinkDecoder::decode_link("wg://foo").is_none());
        assert!(LinkDecoder::decode_link("ssr://abcdef").is_none());
        assert!(LinkDecoder::decode_link("hy2://pass@host:443#x").is_none());
        assert!(LinkDecoder::decoder_for(Protocol::Warp).is_none());
        assert!(LinkDecoder::decoder_for(Protocol::Shadowsocks).is_some());
    }
}
