//! MAC address type with safe parsing and formatting.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// Parsing accepts the colon and hyphen separated forms as well as the
/// dotted triplet form NX-OS prints in `show ipv6 neighbor`.
///
/// # Examples
///
/// ```
/// use nxos_types::MacAddress;
///
/// let mac: MacAddress = "f6a5.486e.8aad".parse().unwrap();
/// assert_eq!(mac.to_string(), "f6:a5:48:6e:8a:ad");
///
/// let mac2: MacAddress = "F6-A5-48-6E-8A-AD".parse().unwrap();
/// assert_eq!(mac, mac2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Returns the raw bytes of the MAC address.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Parses the Cisco dotted notation (`f6a5.486e.8aad`).
    pub fn from_cisco(s: &str) -> Result<Self, ParseError> {
        let groups: Vec<&str> = s.split('.').collect();
        if groups.len() != 3 || groups.iter().any(|g| g.len() != 4) {
            return Err(ParseError::InvalidMacAddress(s.to_string()));
        }
        let hex: String = groups.concat();
        Self::from_hex_digits(&hex).ok_or_else(|| ParseError::InvalidMacAddress(s.to_string()))
    }

    fn from_hex_digits(hex: &str) -> Option<Self> {
        if hex.len() != 12 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(MacAddress(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('.') {
            return Self::from_cisco(s);
        }

        let separator = if s.contains(':') { ':' } else { '-' };

        let parts: Vec<&str> = s.split(separator).collect();
        if parts.len() != 6 || parts.iter().any(|p| p.is_empty() || p.len() > 2) {
            return Err(ParseError::InvalidMacAddress(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::InvalidMacAddress(s.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_cisco_format() {
        let mac = MacAddress::from_cisco("f6a5.486e.8aad").unwrap();
        assert_eq!(mac.as_bytes(), &[0xf6, 0xa5, 0x48, 0x6e, 0x8a, 0xad]);
        assert_eq!(mac.to_string(), "f6:a5:48:6e:8a:ad");
    }

    #[test]
    fn test_parse_colon_format() {
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn test_parse_hyphen_format() {
        let mac: MacAddress = "00-11-22-33-44-55".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn test_all_notations_agree() {
        let cisco: MacAddress = "0011.2233.4455".parse().unwrap();
        let colon: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        assert_eq!(cisco, colon);
    }

    #[test]
    fn test_serde_as_string() {
        let mac: MacAddress = serde_json::from_str("\"f6a5.486e.8aad\"").unwrap();
        assert_eq!(serde_json::to_string(&mac).unwrap(), "\"f6:a5:48:6e:8a:ad\"");
    }

    #[test]
    fn test_invalid_format() {
        assert!("invalid".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<MacAddress>().is_err());
        assert!("gg:11:22:33:44:55".parse::<MacAddress>().is_err());
        assert!("f6a5.486e".parse::<MacAddress>().is_err());
        assert!("f6a5.486e.8aaz".parse::<MacAddress>().is_err());
        assert!("f6a.5486e.8aad".parse::<MacAddress>().is_err());
    }
}
