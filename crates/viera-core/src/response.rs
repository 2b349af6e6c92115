//! Typed results returned by the television.
//!
//! These structures cross into the embedding application, which may persist
//! them, so they all implement `Serialize`/`Deserialize`.
//!
//! # Example
//!
//! ```
//! use viera_core::response::TvEvent;
//!
//! let body = "<e:propertyset><e:property><X_ScreenState>on</X_ScreenState></e:property></e:propertyset>";
//! let event = TvEvent::from_notification(body).unwrap();
//! assert_eq!(event.screen_state, Some(true));
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::soap::strip_namespaces;

/// Static description of a television, read from `nrc/ddd.xml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpecs {
    /// `serialNumber`, or the UDN without its `uuid:` prefix when absent.
    pub serial_number: String,
    /// Marketing model name, e.g. "Panasonic VIErA".
    pub model_name: String,
    /// Model number, e.g. "TX-55CX700E".
    pub model_number: String,
    /// Name set by the user, if any.
    pub friendly_name: Option<String>,
    /// Manufacturer, normally "Panasonic".
    pub manufacturer: String,
    /// UPnP device type URN.
    pub device_type: String,
    /// Whether protected commands must be encrypted.
    pub requires_encryption: bool,
}

#[derive(Deserialize)]
struct DescriptionRoot {
    device: DescriptionDevice,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptionDevice {
    #[serde(default)]
    device_type: String,
    #[serde(default)]
    friendly_name: Option<String>,
    #[serde(default)]
    manufacturer: String,
    #[serde(default)]
    model_name: String,
    #[serde(default)]
    model_number: String,
    #[serde(default)]
    serial_number: Option<String>,
    #[serde(default, rename = "UDN")]
    udn: String,
}

impl DeviceSpecs {
    /// Parses a device description document.
    ///
    /// `requires_encryption` comes from the service description and is
    /// passed through unchanged.
    pub fn from_description(xml: &str, requires_encryption: bool) -> Result<Self, String> {
        let xml = strip_namespaces(xml);
        let root: DescriptionRoot =
            quick_xml::de::from_str(&xml).map_err(|e| format!("bad device description: {e}"))?;
        let device = root.device;

        let serial_number = device
            .serial_number
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                let udn = device.udn.trim();
                udn.strip_prefix("uuid:").unwrap_or(udn).to_string()
            });

        Ok(Self {
            serial_number,
            model_name: device.model_name.trim().to_string(),
            model_number: device.model_number.trim().to_string(),
            friendly_name: device
                .friendly_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            manufacturer: device.manufacturer.trim().to_string(),
            device_type: device.device_type.trim().to_string(),
            requires_encryption,
        })
    }
}

/// An installed application that can be launched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationEntry {
    /// Product id, e.g. "0010000200000001".
    pub id: String,
    /// Display name, e.g. "Netflix".
    pub name: String,
}

/// A state change pushed by the television.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TvEvent {
    /// `true` when the screen is on, `false` when off, `None` if not reported.
    pub screen_state: Option<bool>,
    /// Current input mode, if reported.
    pub input_mode: Option<String>,
}

static SCREEN_STATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"X_ScreenState\s*(?:>|&gt;)\s*([^<&\s]*)\s*(?:<|&lt;)").expect("valid screen state pattern")
});

static INPUT_MODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"X_InputMode\s*(?:>|&gt;)\s*([^<&]*?)\s*(?:<|&lt;)").expect("valid input mode pattern")
});

impl TvEvent {
    /// Scans a NOTIFY body for screen state and input mode.
    ///
    /// Values may appear as plain elements or XML-escaped inside another
    /// property. Returns `None` when neither is present.
    pub fn from_notification(body: &str) -> Option<Self> {
        let capture = |re: &Regex| re.captures(body).map(|c| c[1].to_string());

        let screen_state = capture(&SCREEN_STATE).and_then(|s| match s.to_ascii_lowercase().as_str() {
            "on" => Some(true),
            "off" => Some(false),
            _ => None,
        });
        let input_mode = capture(&INPUT_MODE).filter(|m| !m.is_empty());

        if screen_state.is_none() && input_mode.is_none() {
            return None;
        }
        Some(Self {
            screen_state,
            input_mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_compile() {
        LazyLock::force(&SCREEN_STATE);
        LazyLock::force(&INPUT_MODE);
    }

    const DDD: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<root xmlns="urn:schemas-upnp-org:device-1-0" xmlns:pana="urn:schemas-panasonic-com:pana">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:panasonic-com:device:p00RemoteController:1</deviceType>
    <friendlyName>Living Room TV</friendlyName>
    <manufacturer>Panasonic</manufacturer>
    <modelName>Panasonic VIErA</modelName>
    <modelNumber>TX-55CX700E</modelNumber>
    <UDN>uuid:4D454930-0200-1000-8001-A81374A2E48F</UDN>
    <pana:X_DeviceTypes><pana:X_DeviceType>tv</pana:X_DeviceType></pana:X_DeviceTypes>
    <serviceList><service><serviceType>urn:panasonic-com:service:p00NetworkControl:1</serviceType></service></serviceList>
  </device>
</root>"#;

    #[test]
    fn test_parse_device_description() {
        let specs = DeviceSpecs::from_description(DDD, true).unwrap();
        assert_eq!(specs.serial_number, "4D454930-0200-1000-8001-A81374A2E48F");
        assert_eq!(specs.model_name, "Panasonic VIErA");
        assert_eq!(specs.model_number, "TX-55CX700E");
        assert_eq!(specs.friendly_name.as_deref(), Some("Living Room TV"));
        assert_eq!(specs.manufacturer, "Panasonic");
        assert_eq!(specs.device_type, "urn:panasonic-com:device:p00RemoteController:1");
        assert!(specs.requires_encryption);
    }

    #[test]
    fn test_serial_number_preferred_over_udn() {
        let xml = DDD.replace("<UDN>", "<serialNumber>SN123</serialNumber><UDN>");
        let specs = DeviceSpecs::from_description(&xml, false).unwrap();
        assert_eq!(specs.serial_number, "SN123");
    }

    #[test]
    fn test_parse_device_description_rejects_garbage() {
        assert!(DeviceSpecs::from_description("<html>nope</html>", false).is_err());
    }

    #[test]
    fn test_specs_serialize() {
        let specs = DeviceSpecs::from_description(DDD, false).unwrap();
        let json = serde_json::to_string(&specs).unwrap();
        assert!(json.contains("\"model_number\":\"TX-55CX700E\""));
        let back: DeviceSpecs = serde_json::from_str(&json).unwrap();
        assert_eq!(back, specs);
    }

    #[test]
    fn test_event_screen_on() {
        let body = r#"<?xml version="1.0"?><e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><X_ScreenState>on</X_ScreenState></e:property></e:propertyset>"#;
        let event = TvEvent::from_notification(body).unwrap();
        assert_eq!(event.screen_state, Some(true));
        assert_eq!(event.input_mode, None);
    }

    #[test]
    fn test_event_screen_off_with_input() {
        let body = "<e:property><X_ScreenState>off</X_ScreenState></e:property><e:property><X_InputMode>HDMI 1</X_InputMode></e:property>";
        let event = TvEvent::from_notification(body).unwrap();
        assert_eq!(event.screen_state, Some(false));
        assert_eq!(event.input_mode.as_deref(), Some("HDMI 1"));
    }

    #[test]
    fn test_event_escaped_values() {
        let body = "<LastChange>&lt;X_ScreenState&gt;on&lt;/X_ScreenState&gt;</LastChange>";
        assert_eq!(TvEvent::from_notification(body).unwrap().screen_state, Some(true));
    }

    #[test]
    fn test_event_without_known_fields() {
        assert_eq!(TvEvent::from_notification("<e:property><Other>1</Other></e:property>"), None);
    }
}
