//! SOAP envelope construction and response parsing.
//!
//! Viera firmware is inconsistent about namespace prefixes in its replies
//! (`u:`, `s:`, none at all), so every response goes through
//! [`strip_namespaces`] before elements are looked up by local name.

use std::borrow::Cow;
use std::sync::LazyLock;

use quick_xml::{Reader, escape::resolve_predefined_entity, events::Event};
use regex::Regex;

/// Service URN of the network-control (remote) service, without `urn:`.
pub const NRC_URN: &str = "panasonic-com:service:p00NetworkControl:1";

/// Service URN of the UPnP rendering-control service, without `urn:`.
pub const RENDERING_URN: &str = "schemas-upnp-org:service:RenderingControl:1";

/// Control endpoint of the network-control service.
pub const NRC_CONTROL_PATH: &str = "nrc/control_0";

/// Control endpoint of the rendering-control service.
pub const DMR_CONTROL_PATH: &str = "dmr/control_0";

/// GENA event endpoint of the network-control service.
pub const NRC_EVENT_PATH: &str = "nrc/event_0";

/// Device description document.
pub const DEVICE_DESCRIPTION_PATH: &str = "nrc/ddd.xml";

/// Network-control service description.
pub const SERVICE_DESCRIPTION_PATH: &str = "nrc/sdd_0.xml";

static TAG_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(/?)[A-Za-z_][\w.\-]*:").expect("valid tag prefix pattern"));

static PREFIX_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s+xmlns:[\w.\-]+\s*=\s*("[^"]*"|'[^']*')"#).expect("valid declaration pattern")
});

static APP_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'product_id=([0-9A-Z]+)'([^']+)").expect("valid app entry pattern"));

/// Builds `<u:{action} xmlns:u="urn:{urn}">{args}</u:{action}>`.
pub fn action_xml(urn: &str, action: &str, args: &str) -> String {
    format!(r#"<u:{action} xmlns:u="urn:{urn}">{args}</u:{action}>"#)
}

/// Wraps an action element in a SOAP 1.1 envelope.
pub fn envelope(body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">"#,
            "<s:Body>{}</s:Body></s:Envelope>"
        ),
        body
    )
}

/// Value of the `SOAPACTION` header for an action.
pub fn soap_action_header(urn: &str, action: &str) -> String {
    format!("\"urn:{urn}#{action}\"")
}

/// Removes `prefix:` qualifiers from element tags and drops the prefix
/// declarations they relied on. Other attributes are kept.
///
/// ```
/// use viera_core::soap::strip_namespaces;
///
/// assert_eq!(
///     strip_namespaces(r#"<ns:Foo xmlns:ns="urn:x">1</ns:Foo>"#),
///     "<Foo>1</Foo>"
/// );
/// ```
pub fn strip_namespaces(xml: &str) -> Cow<'_, str> {
    let stripped = TAG_PREFIX.replace_all(xml, "<$1");
    if !PREFIX_DECLARATION.is_match(&stripped) {
        return stripped;
    }
    Cow::Owned(PREFIX_DECLARATION.replace_all(&stripped, "").into_owned())
}

/// Returns the text content of the first element named `name`.
///
/// Text of nested elements is concatenated. Returns `None` when the
/// element is absent or the document is malformed before it closes.
pub fn element_text(xml: &str, name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if depth > 0 {
                    depth += 1;
                } else if e.local_name().as_ref() == name.as_bytes() {
                    depth = 1;
                }
            }
            Ok(Event::Empty(e)) if depth == 0 && e.local_name().as_ref() == name.as_bytes() => {
                return Some(String::new());
            }
            Ok(Event::End(_)) if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Some(text);
                }
            }
            Ok(Event::Text(e)) if depth > 0 => {
                text.push_str(&e.decode().ok()?);
            }
            Ok(Event::CData(e)) if depth > 0 => {
                text.push_str(&String::from_utf8_lossy(&e));
            }
            Ok(Event::GeneralRef(e)) if depth > 0 => {
                let entity = e.decode().ok()?;
                text.push_str(&resolve_entity(&entity)?);
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

fn resolve_entity(entity: &str) -> Option<Cow<'static, str>> {
    if let Some(num) = entity.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code).map(|c| Cow::Owned(c.to_string()));
    }
    resolve_predefined_entity(entity).map(Cow::Borrowed)
}

/// Returns `true` if `xml` contains an element named `name`.
pub fn has_element(xml: &str, name: &str) -> bool {
    element_text(xml, name).is_some()
}

/// A UPnP fault carried in a SOAP error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpFault {
    /// `errorCode`, e.g. 401 for an invalid action.
    pub code: u32,
    /// `errorDescription`, possibly empty.
    pub description: String,
}

impl std::fmt::Display for UpnpFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.description.is_empty() {
            write!(f, "UPnP error {}", self.code)
        } else {
            write!(f, "UPnP error {} ({})", self.code, self.description)
        }
    }
}

/// Extracts the `UPnPError` detail from a fault response, if present.
pub fn parse_fault(xml: &str) -> Option<UpnpFault> {
    let xml = strip_namespaces(xml);
    if !has_element(&xml, "UPnPError") {
        return None;
    }
    let code = element_text(&xml, "errorCode")?.trim().parse().ok()?;
    let description = element_text(&xml, "errorDescription")
        .map(|d| d.trim().to_string())
        .unwrap_or_default();
    Some(UpnpFault { code, description })
}

/// Parses the `X_AppList` text into `(product id, name)` pairs.
pub fn parse_app_list(text: &str) -> Vec<(String, String)> {
    APP_ENTRY
        .captures_iter(text)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}
