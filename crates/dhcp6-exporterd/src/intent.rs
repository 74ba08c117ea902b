//! Route intents: what the switch client is asked to change.
//!
//! A [`RouteIntent`] is built once by a lease-event handler or by the
//! reconciler, validated on construction, and handed by value to the switch
//! client which consumes it.

use crate::commands::{host_prefix, network_prefix};
use crate::error::{ExporterError, Result};
use crate::types::{Duid, IaType};
use std::fmt;
use std::net::Ipv6Addr;

/// The route change carried by an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePayload {
    /// Resolve the VLAN interface from the relay link address, then route
    /// the leased address to it.
    NaApply {
        link_address: Ipv6Addr,
        leased_address: Ipv6Addr,
    },
    /// Route a delegated prefix via the sibling IA_NA address.
    PdApply {
        next_hop: Ipv6Addr,
        prefix: Ipv6Addr,
        prefix_len: u8,
    },
    /// Remove an IA_NA route, rediscovering its interface on the switch.
    NaFuzzyRemove { leased_address: Ipv6Addr },
    /// Remove a delegated prefix route whose next hop is not known locally.
    PdFuzzyRemove { prefix: Ipv6Addr, prefix_len: u8 },
    /// Route the leased address to an interface that is already known.
    NaFastApply {
        interface: String,
        leased_address: Ipv6Addr,
    },
}

impl RoutePayload {
    pub fn ia_type(&self) -> IaType {
        match self {
            RoutePayload::NaApply { .. }
            | RoutePayload::NaFuzzyRemove { .. }
            | RoutePayload::NaFastApply { .. } => IaType::Na,
            RoutePayload::PdApply { .. } | RoutePayload::PdFuzzyRemove { .. } => IaType::Pd,
        }
    }

    /// Route destination as written in CLI commands.
    pub fn destination(&self) -> String {
        match self {
            RoutePayload::NaApply { leased_address, .. }
            | RoutePayload::NaFuzzyRemove { leased_address }
            | RoutePayload::NaFastApply { leased_address, .. } => host_prefix(leased_address),
            RoutePayload::PdApply {
                prefix, prefix_len, ..
            }
            | RoutePayload::PdFuzzyRemove { prefix, prefix_len } => {
                network_prefix(prefix, *prefix_len)
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            RoutePayload::PdApply { prefix_len, .. }
            | RoutePayload::PdFuzzyRemove { prefix_len, .. }
                if *prefix_len > 128 =>
            {
                Err(ExporterError::invalid_intent(format!(
                    "prefix length {} exceeds 128",
                    prefix_len
                )))
            }
            RoutePayload::NaFastApply { interface, .. } if interface.trim().is_empty() => {
                Err(ExporterError::invalid_intent("interface name is empty"))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for RoutePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutePayload::NaApply {
                link_address,
                leased_address,
            } => write!(f, "NA apply leased={} link={}", leased_address, link_address),
            RoutePayload::PdApply {
                next_hop,
                prefix,
                prefix_len,
            } => write!(f, "PD apply prefix={}/{} via={}", prefix, prefix_len, next_hop),
            RoutePayload::NaFuzzyRemove { leased_address } => {
                write!(f, "NA fuzzy remove leased={}", leased_address)
            }
            RoutePayload::PdFuzzyRemove { prefix, prefix_len } => {
                write!(f, "PD fuzzy remove prefix={}/{}", prefix, prefix_len)
            }
            RoutePayload::NaFastApply {
                interface,
                leased_address,
            } => write!(f, "NA fast apply leased={} if={}", leased_address, interface),
        }
    }
}

/// One unit of work for the switch client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteIntent {
    transaction_id: Option<u32>,
    iaid: u32,
    duid: Option<Duid>,
    payload: RoutePayload,
}

impl RouteIntent {
    pub fn new(
        transaction_id: Option<u32>,
        iaid: u32,
        duid: Option<Duid>,
        payload: RoutePayload,
    ) -> Result<Self> {
        payload.validate()?;
        Ok(Self {
            transaction_id,
            iaid,
            duid,
            payload,
        })
    }

    pub fn transaction_id(&self) -> Option<u32> {
        self.transaction_id
    }

    pub fn iaid(&self) -> u32 {
        self.iaid
    }

    pub fn duid(&self) -> Option<&Duid> {
        self.duid.as_ref()
    }

    pub fn payload(&self) -> &RoutePayload {
        &self.payload
    }

    pub fn ia_type(&self) -> IaType {
        self.payload.ia_type()
    }

    /// `"IA_NA"` or `"IA_PD"`, used to correlate log lines.
    pub fn classification(&self) -> &'static str {
        self.ia_type().as_str()
    }
}

impl fmt::Display for RouteIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transaction_id {
            Some(id) => write!(f, "transid={}", id)?,
            None => f.write_str("transid=-")?,
        }
        write!(f, ", iaid={}", self.iaid)?;
        match &self.duid {
            Some(duid) => write!(f, ", duid={}", duid)?,
            None => f.write_str(", duid=-")?,
        }
        write!(f, ", {}", self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn addr(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_classification() {
        let na = RouteIntent::new(
            Some(12),
            1,
            None,
            RoutePayload::NaApply {
                link_address: addr("2001:db8::1"),
                leased_address: addr("2001:db8::5"),
            },
        )
        .unwrap();
        assert_eq!(na.classification(), "IA_NA");

        let pd = RouteIntent::new(
            None,
            1,
            None,
            RoutePayload::PdFuzzyRemove {
                prefix: addr("2001:db8:100::"),
                prefix_len: 56,
            },
        )
        .unwrap();
        assert_eq!(pd.classification(), "IA_PD");
    }

    #[test]
    fn test_trace_string() {
        let intent = RouteIntent::new(
            Some(12),
            1,
            Some("00:01:aa".parse().unwrap()),
            RoutePayload::PdApply {
                next_hop: addr("2001:db8::5"),
                prefix: addr("2001:db8:100::"),
                prefix_len: 56,
            },
        )
        .unwrap();
        assert_eq!(
            intent.to_string(),
            "transid=12, iaid=1, duid=00:01:aa, PD apply prefix=2001:db8:100::/56 via=2001:db8::5"
        );

        let intent = RouteIntent::new(
            None,
            3,
            None,
            RoutePayload::NaFuzzyRemove {
                leased_address: addr("2001:db8::5"),
            },
        )
        .unwrap();
        assert_eq!(
            intent.to_string(),
            "transid=-, iaid=3, duid=-, NA fuzzy remove leased=2001:db8::5"
        );
    }

    #[test]
    fn test_destination() {
        let na = RoutePayload::NaFastApply {
            interface: "Vlan100".to_string(),
            leased_address: addr("2001:db8::5"),
        };
        assert_eq!(na.destination(), "2001:db8::5/128");

        let pd = RoutePayload::PdApply {
            next_hop: addr("2001:db8::5"),
            prefix: addr("2001:db8:100::"),
            prefix_len: 56,
        };
        assert_eq!(pd.destination(), "2001:db8:100::/56");
    }

    #[test]
    fn test_rejects_invalid_payloads() {
        let err = RouteIntent::new(
            None,
            1,
            None,
            RoutePayload::PdFuzzyRemove {
                prefix: addr("2001:db8::"),
                prefix_len: 129,
            },
        );
        assert!(matches!(err, Err(ExporterError::InvalidIntent(_))));

        let err = RouteIntent::new(
            None,
            1,
            None,
            RoutePayload::NaFastApply {
                interface: " ".to_string(),
                leased_address: addr("2001:db8::5"),
            },
        );
        assert!(matches!(err, Err(ExporterError::InvalidIntent(_))));
    }
}
