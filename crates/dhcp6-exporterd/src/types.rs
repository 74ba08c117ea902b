//! DHCPv6 identifiers shared by the lease boundary and the intent model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// DHCPv6 identity association type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IaType {
    #[serde(rename = "IA_NA", alias = "na")]
    Na,
    #[serde(rename = "IA_TA", alias = "ta")]
    Ta,
    #[serde(rename = "IA_PD", alias = "pd")]
    Pd,
}

impl IaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IaType::Na => "IA_NA",
            IaType::Ta => "IA_TA",
            IaType::Pd => "IA_PD",
        }
    }
}

impl fmt::Display for IaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DHCP unique identifier, an opaque byte string.
///
/// Rendered and parsed as colon separated hex (`00:01:00:01:2a:...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Duid(Vec<u8>);

impl Duid {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Duid(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Duid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for Duid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("DUID is empty".to_string());
        }
        s.split(':')
            .map(|part| {
                if part.is_empty() || part.len() > 2 {
                    return Err(format!("invalid DUID: {}", s));
                }
                u8::from_str_radix(part, 16).map_err(|_| format!("invalid DUID: {}", s))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Duid)
    }
}

impl TryFrom<String> for Duid {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Duid> for String {
    fn from(duid: Duid) -> String {
        duid.to_string()
    }
}
