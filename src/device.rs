//! Device records and response parsing for bluetoothctl output.
//!
//! bluetoothctl answers `devices` and `devices Connected` with one line per
//! device. A configured [`DevicePattern`] turns that text into [`Device`]
//! records; a [`ResponseCheck`] decides whether a `connect` reply means the
//! device actually connected.

use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ManagerError;

static ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("static address regex")
});

/// A device reported by the control tool.
///
/// The address is the identity. Two records with the same address are the
/// same device even when the advertised name differs between listings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Device {
    /// Hardware address, e.g. `AA:BB:CC:DD:EE:FF`.
    pub address: String,
    /// Advertised name. May be empty or stale.
    pub name: String,
}

impl Device {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// Returns true if `address` looks like a 48-bit hardware address.
    pub fn is_valid_address(address: &str) -> bool {
        ADDRESS_REGEX.is_match(address)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// A compiled pattern that extracts devices from tool output.
///
/// Capture groups are mapped as follows:
/// - named groups `address` and `name` when the pattern declares them
/// - otherwise group 1 is the address and group 2 the name
/// - a single group yields an empty name
/// - a pattern without groups yields the whole match as the address
#[derive(Debug, Clone)]
pub struct DevicePattern {
    regex: Regex,
}

impl DevicePattern {
    pub fn new(pattern: &str) -> Result<Self, ManagerError> {
        let regex = Regex::new(pattern).map_err(|source| ManagerError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }

    /// Extracts all non-overlapping matches in input order.
    ///
    /// Never fails: text that does not match yields an empty list.
    pub fn parse(&self, text: &str) -> Vec<Device> {
        let named = self
            .regex
            .capture_names()
            .any(|name| name == Some("address"));
        let groups = self.regex.captures_len() - 1;

        self.regex
            .captures_iter(text)
            .map(|caps| {
                let (address, name) = if named {
                    (caps.name("address"), caps.name("name"))
                } else if groups == 0 {
                    (caps.get(0), None)
                } else {
                    (caps.get(1), caps.get(2))
                };
                Device::new(
                    address.map_or("", |m| m.as_str()).trim(),
                    name.map_or("", |m| m.as_str()).trim(),
                )
            })
            .collect()
    }
}

/// Parses `text` with a pattern given as a string.
pub fn parse_devices(text: &str, pattern: &str) -> Result<Vec<Device>, ManagerError> {
    Ok(DevicePattern::new(pattern)?.parse(text))
}

/// Predicate applied to a `connect` reply to decide success.
///
/// bluetoothctl has no structured status code, so success is a text check
/// against configuration.
#[derive(Debug, Clone)]
pub enum ResponseCheck {
    /// Success when the reply contains this substring.
    Contains(String),
    /// Success when the reply matches this regex anywhere.
    Matches(Regex),
}

impl ResponseCheck {
    pub fn contains(expected: impl Into<String>) -> Self {
        ResponseCheck::Contains(expected.into())
    }

    pub fn matches(pattern: &str) -> Result<Self, ManagerError> {
        Regex::new(pattern)
            .map(ResponseCheck::Matches)
            .map_err(|source| ManagerError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn is_success(&self, response: &str) -> bool {
        match self {
            ResponseCheck::Contains(expected) => response.contains(expected.as_str()),
            ResponseCheck::Matches(regex) => regex.is_match(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Device, DevicePattern, ResponseCheck, parse_devices};
    use crate::error::ManagerError;
    use std::collections::HashSet;

    const SCAN_PATTERN: &str = r"Device ((?:[0-9A-F]{2}:){5}[0-9A-F]{2}) (.+)";

    #[test]
    fn scan_output_parses_in_order() {
        let text = "Device AA:BB:CC:DD:EE:01 Speaker\nDevice AA:BB:CC:DD:EE:02 Headphones";
        let devices = parse_devices(text, SCAN_PATTERN).expect("valid pattern");

        let pairs: Vec<(&str, &str)> = devices
            .iter()
            .map(|d| (d.address.as_str(), d.name.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("AA:BB:CC:DD:EE:01", "Speaker"),
                ("AA:BB:CC:DD:EE:02", "Headphones"),
            ]
        );
    }

    #[test]
    fn parse_is_repeatable() {
        let pattern = DevicePattern::new(SCAN_PATTERN).expect("valid pattern");
        let text = "[bluetooth]# devices\nDevice 11:22:33:44:55:66 Keyboard\n[bluetooth]# exit";

        let first = pattern.parse(text);
        let second = pattern.parse(text);
        assert_eq!(first.len(), 1);
        let pairs = |devices: &[Device]| -> Vec<(String, String)> {
            devices
                .iter()
                .map(|d| (d.address.clone(), d.name.clone()))
                .collect()
        };
        assert_eq!(pairs(&first), pairs(&second));
    }

    #[test]
    fn non_matching_text_yields_nothing() {
        let pattern = DevicePattern::new(SCAN_PATTERN).expect("valid pattern");
        assert!(pattern.parse("No default controller available").is_empty());
        assert!(pattern.parse("").is_empty());
    }

    #[test]
    fn named_groups_take_precedence() {
        let pattern =
            DevicePattern::new(r"(?P<name>\w+)=(?P<address>[0-9A-F:]{17})").expect("valid");
        let devices = pattern.parse("Mouse=AA:BB:CC:DD:EE:10");
        assert_eq!(devices[0].address, "AA:BB:CC:DD:EE:10");
        assert_eq!(devices[0].name, "Mouse");
    }

    #[test]
    fn single_group_and_groupless_patterns() {
        let single = DevicePattern::new(r"Device ([0-9A-F:]{17})").expect("valid");
        let devices = single.parse("Device AA:BB:CC:DD:EE:FF Phone");
        assert_eq!(devices[0].address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(devices[0].name, "");

        let bare = DevicePattern::new(r"[0-9A-F]{2}(?::[0-9A-F]{2}){5}").expect("valid");
        let devices = bare.parse("AA:BB:CC:DD:EE:FF and 00:11:22:33:44:55");
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].address, "00:11:22:33:44:55");
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = DevicePattern::new("Device (").expect_err("unbalanced group");
        assert!(matches!(err, ManagerError::InvalidPattern { .. }));
    }

    #[test]
    fn identity_ignores_name_drift() {
        let a = Device::new("AA:BB:CC:DD:EE:01", "Speaker");
        let b = Device::new("AA:BB:CC:DD:EE:01", "Living Room Speaker");
        assert_eq!(a, b);

        let set: HashSet<Device> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn address_validation() {
        assert!(Device::is_valid_address("aa:bb:cc:dd:ee:ff"));
        assert!(!Device::is_valid_address("AA:BB:CC:DD:EE"));
        assert!(!Device::is_valid_address("not-an-address"));
    }

    #[test]
    fn response_checks() {
        let contains = ResponseCheck::contains("successful");
        assert!(contains.is_success("Connection successful"));
        assert!(!contains.is_success("Failed to connect: org.bluez.Error.Failed"));

        let matches = ResponseCheck::matches(r"(?i)connection successful").expect("valid");
        assert!(matches.is_success("[CHG] Device AA Connected: yes\nConnection Successful"));
        assert!(!matches.is_success("Failed to connect"));
    }
}
