//! IP address to coarse location lookup.
//!
//! The recorder only needs a pure `ip -> GeoDetails` function. Deployments
//! without a geo database run the [`NoopGeoResolver`]. A GeoLite2/GeoIP2
//! `.mmdb` file is served by [`MaxMindGeoResolver`]; any other file is read
//! as a JSON table of CIDR ranges and served by [`RangeGeoResolver`] with
//! longest-prefix match.

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ipnet::IpNet;
use maxminddb::{MaxMindDBError, Reader, geoip2};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::fingerprint::normalize_ip;
use crate::error::TrackerError;

/// Coarse location of a fetch. All fields are null when unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeoDetails {
    /// ISO country code.
    pub geo_country: Option<String>,
    /// Region or state code.
    pub geo_region: Option<String>,
    /// City name.
    pub geo_city: Option<String>,
    /// Latitude in degrees.
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    pub longitude: Option<f64>,
}

/// Maps an address to a location.
pub trait GeoResolver: Send + Sync + fmt::Debug {
    /// Resolves `ip`. An unknown address is `Ok` with empty details; only a
    /// malformed address or a broken backend is an error.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::GeoLookupFailure`] when the lookup itself fails.
    fn resolve(&self, ip: &str) -> Result<GeoDetails, TrackerError>;
}

/// Resolver that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGeoResolver;

impl GeoResolver for NoopGeoResolver {
    fn resolve(&self, _ip: &str) -> Result<GeoDetails, TrackerError> {
        Ok(GeoDetails::default())
    }
}

/// One line of the JSON range table.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoRangeEntry {
    /// Network in CIDR notation, e.g. `203.0.113.0/24`.
    pub cidr: String,
    /// ISO country code.
    #[serde(default)]
    pub country: Option<String>,
    /// Region code.
    #[serde(default)]
    pub region: Option<String>,
    /// City name.
    #[serde(default)]
    pub city: Option<String>,
    /// Latitude.
    #[serde(default)]
    pub latitude: Option<f64>,
    /// Longitude.
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone)]
struct GeoRange {
    network: IpNet,
    details: GeoDetails,
}

/// Longest-prefix lookup over an in-memory range table.
#[derive(Debug, Clone, Default)]
pub struct RangeGeoResolver {
    ranges: Vec<GeoRange>,
}

impl RangeGeoResolver {
    /// Builds the table from parsed entries.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::GeoLookupFailure`] for a malformed CIDR.
    pub fn from_entries(entries: Vec<GeoRangeEntry>) -> Result<Self, TrackerError> {
        let mut ranges = Vec::with_capacity(entries.len());
        for entry in entries {
            let network = parse_cidr(&entry.cidr)?;
            ranges.push(GeoRange {
                network,
                details: GeoDetails {
                    geo_country: entry.country,
                    geo_region: entry.region,
                    geo_city: entry.city,
                    latitude: entry.latitude,
                    longitude: entry.longitude,
                },
            });
        }
        // Longest prefix first so the first hit wins.
        ranges.sort_by(|a, b| b.network.prefix_len().cmp(&a.network.prefix_len()));
        Ok(Self { ranges })
    }

    /// Parses a JSON array of [`GeoRangeEntry`].
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::GeoLookupFailure`] on malformed JSON or CIDR.
    pub fn from_json_str(json: &str) -> Result<Self, TrackerError> {
        let entries: Vec<GeoRangeEntry> = serde_json::from_str(json)
            .map_err(|e| TrackerError::GeoLookupFailure(format!("bad geo table: {e}")))?;
        Self::from_entries(entries)
    }

    /// Loads the table from a file.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::GeoLookupFailure`] if the file cannot be read
    /// or parsed.
    pub fn load(path: &Path) -> Result<Self, TrackerError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::GeoLookupFailure(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Number of ranges in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns `true` if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl GeoResolver for RangeGeoResolver {
    fn resolve(&self, ip: &str) -> Result<GeoDetails, TrackerError> {
        let normalized = normalize_ip(Some(ip));
        if normalized.is_empty() {
            return Ok(GeoDetails::default());
        }
        let addr = parse_ip(&normalized, ip)?;
        Ok(self
            .ranges
            .iter()
            .find(|range| range.network.contains(&addr))
            .map(|range| range.details.clone())
            .unwrap_or_default())
    }
}

/// Lookup against a MaxMind GeoLite2/GeoIP2 City database.
pub struct MaxMindGeoResolver {
    path: PathBuf,
    reader: Reader<Vec<u8>>,
}

impl MaxMindGeoResolver {
    /// Reads the whole database into memory.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::GeoLookupFailure`] if the file is missing or
    /// is not a MaxMind database.
    pub fn open(path: &Path) -> Result<Self, TrackerError> {
        let reader = Reader::open_readfile(path).map_err(|e| {
            TrackerError::GeoLookupFailure(format!("cannot open {}: {e}", path.display()))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
        })
    }

    /// Database type from the file metadata, e.g. `GeoLite2-City`.
    #[must_use]
    pub fn database_type(&self) -> &str {
        &self.reader.metadata.database_type
    }
}

impl fmt::Debug for MaxMindGeoResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaxMindGeoResolver")
            .field("path", &self.path)
            .field("database_type", &self.database_type())
            .finish_non_exhaustive()
    }
}

impl GeoResolver for MaxMindGeoResolver {
    fn resolve(&self, ip: &str) -> Result<GeoDetails, TrackerError> {
        let normalized = normalize_ip(Some(ip));
        if normalized.is_empty() {
            return Ok(GeoDetails::default());
        }
        let addr = parse_ip(&normalized, ip)?;
        let city: geoip2::City<'_> = match self.reader.lookup(addr) {
            Ok(city) => city,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return Ok(GeoDetails::default()),
            Err(e) => return Err(TrackerError::GeoLookupFailure(e.to_string())),
        };

        let location = city.location.as_ref();
        Ok(GeoDetails {
            geo_country: city
                .country
                .as_ref()
                .and_then(|c| c.iso_code)
                .map(str::to_owned),
            geo_region: city
                .subdivisions
                .as_ref()
                .and_then(|subs| subs.first())
                .and_then(|s| s.iso_code)
                .map(str::to_owned),
            geo_city: city
                .city
                .as_ref()
                .and_then(|c| c.names.as_ref())
                .and_then(|names| names.get("en"))
                .map(|name| (*name).to_owned()),
            latitude: location.and_then(|l| l.latitude),
            longitude: location.and_then(|l| l.longitude),
        })
    }
}

/// Opens the geo database at `path`: a MaxMind reader for `.mmdb` files, a
/// JSON range table otherwise.
///
/// # Errors
///
/// Returns [`TrackerError::GeoLookupFailure`] if the file cannot be read or
/// parsed.
pub fn open_geo_resolver(path: &Path) -> Result<Arc<dyn GeoResolver>, TrackerError> {
    let is_mmdb = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mmdb"));
    if is_mmdb {
        let resolver = MaxMindGeoResolver::open(path)?;
        tracing::info!(
            path = %path.display(),
            database_type = resolver.database_type(),
            "maxmind geo database loaded"
        );
        Ok(Arc::new(resolver))
    } else {
        let resolver = RangeGeoResolver::load(path)?;
        tracing::info!(path = %path.display(), ranges = resolver.len(), "geo table loaded");
        Ok(Arc::new(resolver))
    }
}

fn parse_ip(normalized: &str, raw: &str) -> Result<IpAddr, TrackerError> {
    normalized
        .parse()
        .map_err(|_| TrackerError::GeoLookupFailure(format!("not an ip address: {raw}")))
}

fn parse_cidr(cidr: &str) -> Result<IpNet, TrackerError> {
    let cidr = cidr.trim();
    cidr.parse::<IpNet>()
        .or_else(|_| cidr.parse::<IpAddr>().map(IpNet::from))
        .map(|net| net.trunc())
        .map_err(|_| TrackerError::GeoLookupFailure(format!("bad cidr: {cidr}")))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    const TABLE: &str = r#"[
        {"cidr": "203.0.113.0/24", "country": "AU", "region": "NSW", "city": "Sydney",
         "latitude": -33.87, "longitude": 151.21},
        {"cidr": "203.0.0.0/16", "country": "AU"},
        {"cidr": "2001:db8::/32", "country": "NL", "city": "Amsterdam"}
    ]"#;

    fn resolver() -> RangeGeoResolver {
        let Ok(resolver) = RangeGeoResolver::from_json_str(TABLE) else {
            panic!("table should parse");
        };
        resolver
    }

    #[test]
    fn longest_prefix_wins() {
        let Ok(details) = resolver().resolve("203.0.113.40") else {
            panic!("lookup should succeed");
        };
        assert_eq!(details.geo_city.as_deref(), Some("Sydney"));

        let Ok(details) = resolver().resolve("203.0.7.1") else {
            panic!("lookup should succeed");
        };
        assert_eq!(details.geo_country.as_deref(), Some("AU"));
        assert_eq!(details.geo_city, None);
    }

    #[test]
    fn mapped_and_v6_addresses() {
        let Ok(details) = resolver().resolve("::ffff:203.0.113.9") else {
            panic!("mapped lookup should succeed");
        };
        assert_eq!(details.geo_region.as_deref(), Some("NSW"));

        let Ok(details) = resolver().resolve("2001:db8::42") else {
            panic!("v6 lookup should succeed");
        };
        assert_eq!(details.geo_country.as_deref(), Some("NL"));
    }

    #[test]
    fn unknown_is_empty_and_garbage_is_error() {
        assert_eq!(resolver().resolve("198.51.100.1").ok(), Some(GeoDetails::default()));
        assert!(matches!(
            resolver().resolve("not-an-ip"),
            Err(TrackerError::GeoLookupFailure(_))
        ));
        assert_eq!(resolver().resolve("").ok(), Some(GeoDetails::default()));
    }

    #[test]
    fn bad_cidr_is_rejected() {
        assert!(RangeGeoResolver::from_json_str(r#"[{"cidr": "10.0.0.0/40"}]"#).is_err());
        assert!(RangeGeoResolver::from_json_str(r#"[{"cidr": "nope/8"}]"#).is_err());
    }

    #[test]
    fn host_and_unaligned_entries() {
        let table = r#"[
            {"cidr": "192.0.2.77", "city": "Host"},
            {"cidr": "192.0.2.130/25", "city": "Upper"}
        ]"#;
        let Ok(resolver) = RangeGeoResolver::from_json_str(table) else {
            panic!("table should parse");
        };
        let city = |ip: &str| resolver.resolve(ip).ok().and_then(|d| d.geo_city);
        assert_eq!(city("192.0.2.77").as_deref(), Some("Host"));
        assert_eq!(city("192.0.2.78"), None);
        assert_eq!(city("192.0.2.200").as_deref(), Some("Upper"));
    }

    #[test]
    fn opener_picks_backend_by_extension() {
        let dir = std::env::temp_dir().join(format!("geo-{}", uuid::Uuid::new_v4()));
        let Ok(()) = std::fs::create_dir_all(&dir) else {
            panic!("temp dir");
        };
        let table = dir.join("ranges.json");
        let Ok(()) = std::fs::write(&table, TABLE) else {
            panic!("write table");
        };

        let Ok(resolver) = open_geo_resolver(&table) else {
            panic!("json table should load");
        };
        let Ok(details) = resolver.resolve("203.0.113.40") else {
            panic!("lookup should succeed");
        };
        assert_eq!(details.geo_city.as_deref(), Some("Sydney"));

        let not_a_database = dir.join("GeoLite2-City.mmdb");
        let Ok(()) = std::fs::write(&not_a_database, TABLE) else {
            panic!("write mmdb");
        };
        assert!(matches!(
            open_geo_resolver(&not_a_database),
            Err(TrackerError::GeoLookupFailure(_))
        ));
        assert!(open_geo_resolver(&dir.join("missing.mmdb")).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn noop_knows_nothing() {
        assert_eq!(NoopGeoResolver.resolve("203.0.113.1").ok(), Some(GeoDetails::default()));
    }
}
