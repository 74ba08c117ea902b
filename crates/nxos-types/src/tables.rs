//! Structured output of the `show` commands the exporter issues.
//!
//! NX-OS renders every `TABLE_x` as either one object or an array of
//! objects, and each of those wraps its `ROW_x` as either one object or an
//! array, depending on how many rows there are. Each table field below is
//! read through a per-table function that flattens all four shapes into a
//! plain `Vec` of rows.

use crate::ParseError;
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(t) => vec![t],
        }
    }
}

fn rows<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let table = Option::<OneOrMany<BTreeMap<String, OneOrMany<T>>>>::deserialize(deserializer)?;
    Ok(table
        .map(OneOrMany::into_vec)
        .unwrap_or_default()
        .into_iter()
        .flat_map(BTreeMap::into_values)
        .flat_map(OneOrMany::into_vec)
        .collect())
}

/// Normalizes `TABLE_vrf` of a route lookup.
pub fn vrf_table<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<VrfRow>, D::Error> {
    rows(d)
}

/// Normalizes `TABLE_addrf`.
pub fn addrf_table<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<AddrfRow>, D::Error> {
    rows(d)
}

/// Normalizes `TABLE_prefix`.
pub fn prefix_table<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<PrefixRow>, D::Error> {
    rows(d)
}

/// Normalizes `TABLE_path`.
pub fn path_table<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<PathRow>, D::Error> {
    rows(d)
}

/// Normalizes `TABLE_vrf` of a neighbor lookup.
pub fn neighbor_vrf_table<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Vec<NeighborVrfRow>, D::Error> {
    rows(d)
}

/// Normalizes `TABLE_afi`.
pub fn afi_table<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<AfiRow>, D::Error> {
    rows(d)
}

/// Normalizes `TABLE_adj`.
pub fn adj_table<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<AdjacencyRow>, D::Error> {
    rows(d)
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Bool(b) => b,
        Raw::Text(s) => !(s == "false" || s == "FALSE"),
    })
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }
    match Raw::deserialize(d)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Output of `show ipv6 route <addr>[/len]`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RouteLookupResponse {
    #[serde(rename = "TABLE_vrf", default, deserialize_with = "vrf_table")]
    pub vrfs: Vec<VrfRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VrfRow {
    #[serde(rename = "vrf-name-out", default)]
    pub vrf_name: String,
    #[serde(rename = "TABLE_addrf", default, deserialize_with = "addrf_table")]
    pub addrfs: Vec<AddrfRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AddrfRow {
    #[serde(default)]
    pub addrf: String,
    #[serde(rename = "TABLE_prefix", default, deserialize_with = "prefix_table")]
    pub prefixes: Vec<PrefixRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PrefixRow {
    #[serde(default)]
    pub ipprefix: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub attached: bool,
    #[serde(rename = "TABLE_path", default, deserialize_with = "path_table")]
    pub paths: Vec<PathRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PathRow {
    #[serde(default)]
    pub ipnexthop: Option<String>,
    #[serde(default)]
    pub ifname: Option<String>,
}

impl RouteLookupResponse {
    /// Returns the prefix row of a lookup that must resolve to exactly one
    /// VRF and one address family.
    pub fn single_route(&self) -> Result<&PrefixRow, ParseError> {
        let vrf = exactly_one(&self.vrfs, "TABLE_vrf")?;
        let addrf = exactly_one(&vrf.addrfs, "TABLE_addrf")?;
        addrf.prefixes.first().ok_or(ParseError::TableShape {
            table: "TABLE_prefix",
            found: 0,
        })
    }

    /// First interface name on the single resolved route accepted by `filter`.
    pub fn first_interface<F>(&self, filter: F) -> Result<&str, ParseError>
    where
        F: Fn(&str) -> bool,
    {
        self.single_route()?
            .paths
            .iter()
            .filter_map(|p| p.ifname.as_deref())
            .find(|name| filter(name))
            .ok_or(ParseError::MissingValue("vlan interface id"))
    }

    /// First next hop in any row of the table.
    pub fn first_next_hop(&self) -> Option<&str> {
        self.prefixes()
            .flat_map(|p| p.paths.iter())
            .find_map(|path| path.ipnexthop.as_deref())
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &PrefixRow> {
        self.vrfs
            .iter()
            .flat_map(|v| v.addrfs.iter())
            .flat_map(|a| a.prefixes.iter())
    }

    pub fn has_prefixes(&self) -> bool {
        self.prefixes().next().is_some()
    }
}

fn exactly_one<'a, T>(rows: &'a [T], table: &'static str) -> Result<&'a T, ParseError> {
    match rows {
        [row] => Ok(row),
        _ => Err(ParseError::TableShape {
            table,
            found: rows.len(),
        }),
    }
}

/// Output of `show ipv6 neighbor`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NeighborLookupResponse {
    #[serde(rename = "TABLE_vrf", default, deserialize_with = "neighbor_vrf_table")]
    pub vrfs: Vec<NeighborVrfRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NeighborVrfRow {
    #[serde(rename = "vrf-name-out", default)]
    pub vrf_name: String,
    #[serde(rename = "TABLE_afi", default, deserialize_with = "afi_table")]
    pub afis: Vec<AfiRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AfiRow {
    #[serde(default)]
    pub afi: String,
    #[serde(rename = "TABLE_adj", default, deserialize_with = "adj_table")]
    pub adjacencies: Vec<AdjacencyRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AdjacencyRow {
    #[serde(rename = "intf-out", default)]
    pub intf_out: String,
    #[serde(default)]
    pub ipaddr: Option<String>,
    /// Cisco dotted notation, absent for incomplete entries.
    #[serde(default)]
    pub mac: Option<String>,
}

impl NeighborLookupResponse {
    pub fn adjacencies(&self) -> impl Iterator<Item = &AdjacencyRow> {
        self.vrfs
            .iter()
            .flat_map(|v| v.afis.iter())
            .flat_map(|a| a.adjacencies.iter())
    }
}

/// Kernel uptime fields of `show version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct UptimeResponse {
    #[serde(deserialize_with = "lenient_u64")]
    pub kern_uptm_days: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub kern_uptm_hrs: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub kern_uptm_mins: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub kern_uptm_secs: u64,
}

impl UptimeResponse {
    /// Uptime in seconds, clamped at `u64::MAX`.
    pub fn total_seconds(&self) -> u64 {
        self.kern_uptm_secs
            .saturating_add(self.kern_uptm_mins.saturating_mul(60))
            .saturating_add(self.kern_uptm_hrs.saturating_mul(3600))
            .saturating_add(self.kern_uptm_days.saturating_mul(86400))
    }
}

/// A response type that can be read from a command's `result`.
pub trait CommandOutput: DeserializeOwned {
    const NAME: &'static str;

    /// Value used when the device returns no body at all, or `None` if a
    /// body is mandatory.
    fn empty() -> Option<Self>;
}

impl CommandOutput for RouteLookupResponse {
    const NAME: &'static str = "RouteLookupResponse";

    fn empty() -> Option<Self> {
        Some(Self::default())
    }
}

impl CommandOutput for NeighborLookupResponse {
    const NAME: &'static str = "NeighborLookupResponse";

    fn empty() -> Option<Self> {
        Some(Self::default())
    }
}

impl CommandOutput for UptimeResponse {
    const NAME: &'static str = "UptimeResponse";

    fn empty() -> Option<Self> {
        None
    }
}

/// Reads `result.body` of one command reply as `T`.
///
/// A missing, null or empty-string body counts as no body.
pub fn parse_output<T: CommandOutput>(result: &Value) -> Result<T, ParseError> {
    match result.get("body") {
        None | Some(Value::Null) => T::empty().ok_or(ParseError::MissingValue(T::NAME)),
        Some(Value::String(s)) if s.is_empty() => {
            T::empty().ok_or(ParseError::MissingValue(T::NAME))
        }
        Some(body) => {
            T::deserialize(body).map_err(|e| ParseError::InvalidResponse {
                response: T::NAME,
                reason: e.to_string(),
            })
        }
    }
}
