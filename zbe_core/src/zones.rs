//! Zone catalog - low-emission zone records and where they come from.
//!
//! The engine never fetches anything itself. A [`ZoneSource`] hands it a
//! list of [`Zone`]s. [`GeoportalZoneSource`] queries the official Madrid
//! MapServer; wrapped in a [`FallbackZoneSource`] it degrades to the static
//! Madrid list when the geoportal is unreachable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ZoneError;
use crate::zbe_geometry::{self, Point};

/// Identifier of a zone (the geoportal's `OBJECTID`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(pub u64);

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A geofenced low-emission zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,

    /// Display name (e.g. "ZBEDEP Distrito Centro")
    pub name: String,

    pub municipality: String,

    /// Regulatory category of the zone
    #[serde(rename = "type")]
    pub zone_type: String,

    /// Human-readable access restrictions
    pub restrictions: String,

    /// Boundary ring; callers are expected to supply it closed
    pub polygon: Vec<Point>,

    /// Provenance label
    pub source: String,
}

impl Zone {
    /// True when the ring's first and last points coincide.
    pub fn is_closed(&self) -> bool {
        match (self.polygon.first(), self.polygon.last()) {
            (Some(first), Some(last)) => self.polygon.len() > 1 && first == last,
            _ => false,
        }
    }

    /// Appends the first vertex if the ring is open.
    pub fn close_ring(&mut self) {
        if !self.polygon.is_empty() && !self.is_closed() {
            let first = self.polygon[0];
            self.polygon.push(first);
        }
    }

    /// Whether `point` falls inside the zone (ray casting).
    pub fn contains(&self, point: Point) -> bool {
        zbe_geometry::contains_point(point, &self.polygon)
    }

    /// Distance from `point` to the nearest edge of the zone.
    pub fn distance_to_boundary(&self, point: Point) -> f64 {
        zbe_geometry::distance_to_boundary(point, &self.polygon)
    }

    /// Flat vertex-average centre of the zone.
    pub fn centroid(&self) -> Option<Point> {
        zbe_geometry::centroid(&self.polygon)
    }

    /// The zone boundary as a `geo` polygon (x = lng, y = lat).
    pub fn to_polygon(&self) -> geo::Polygon<f64> {
        let exterior: Vec<geo::Coord<f64>> = self.polygon.iter().copied().map(Into::into).collect();
        geo::Polygon::new(geo::LineString::from(exterior), vec![])
    }
}

/// Zone whose centroid is closest to `point`, with that distance in meters.
///
/// Zones with an empty ring are ignored.
pub fn nearest_zone(point: Point, zones: &[Zone]) -> Option<(&Zone, f64)> {
    zones
        .iter()
        .filter_map(|zone| {
            zone.centroid()
                .map(|c| (zone, zbe_geometry::haversine_meters(point, c)))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

// ============================================================================
// ARCGIS INGESTION
// ============================================================================

#[derive(Debug, Deserialize)]
struct ArcGisResponse {
    features: Option<Vec<ArcGisFeature>>,
}

#[derive(Debug, Deserialize)]
struct ArcGisFeature {
    #[serde(default)]
    attributes: ArcGisAttributes,
    geometry: Option<ArcGisGeometry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct ArcGisAttributes {
    objectid: Option<u64>,
    nombre: Option<String>,
    municipio: Option<String>,
    tipo: Option<String>,
    restricciones: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArcGisGeometry {
    rings: Option<Vec<Vec<[f64; 2]>>>,
}

const GEOPORTAL_SOURCE: &str = "Comunidad de Madrid - Geoportal";

/// MapServer publishing the Madrid ZBE layer
pub const MADRID_GEOPORTAL_URL: &str =
    "https://sigma.madrid.es/hosted/rest/services/GEOPORTAL/MADRID_ZBE/MapServer";

/// Layer 0, every feature, every attribute, with geometry
const GEOPORTAL_QUERY: &str = "/0/query?f=json&where=1%3D1&outFields=*&returnGeometry=true";

const GEOPORTAL_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("zbe-navigator/", env!("CARGO_PKG_VERSION"));
const STATIC_SOURCE: &str = "Datos estáticos - Comunidad de Madrid";

/// Converts a geoportal MapServer query response into zones.
///
/// Only the first ring of each feature is used and its `[lng, lat]` pairs
/// are swapped into [`Point`]s. Features without an `OBJECTID` get their
/// 1-based position in the response. A response without a `features`
/// member yields the fallback list.
pub fn parse_arcgis_features(json: &str) -> Result<Vec<Zone>, ZoneError> {
    let response: ArcGisResponse = serde_json::from_str(json)?;

    let Some(features) = response.features else {
        warn!("Geoportal response has no features, using fallback zones");
        return Ok(fallback_zones());
    };

    let zones = features
        .into_iter()
        .enumerate()
        .map(|(idx, feature)| {
            let attrs = feature.attributes;
            let polygon = feature
                .geometry
                .and_then(|g| g.rings)
                .and_then(|rings| rings.into_iter().next())
                .map(|ring| ring.into_iter().map(|[lng, lat]| Point::new(lat, lng)).collect())
                .unwrap_or_default();

            Zone {
                id: ZoneId(attrs.objectid.unwrap_or(idx as u64 + 1)),
                name: attrs.nombre.unwrap_or_else(|| "ZBE Sin Nombre".to_string()),
                municipality: attrs.municipio.unwrap_or_else(|| "Madrid".to_string()),
                zone_type: attrs.tipo.unwrap_or_else(|| "Zona de Bajas Emisiones".to_string()),
                restrictions: attrs
                    .restricciones
                    .unwrap_or_else(|| "Restricciones según normativa".to_string()),
                polygon,
                source: GEOPORTAL_SOURCE.to_string(),
            }
        })
        .collect::<Vec<_>>();

    debug!(count = zones.len(), "Parsed geoportal zones");
    Ok(zones)
}

/// Static zone list used when the geoportal cannot be reached.
pub fn fallback_zones() -> Vec<Zone> {
    let zone = |id: u64, name: &str, municipality: &str, zone_type: &str, restrictions: &str, ring: &[(f64, f64)]| Zone {
        id: ZoneId(id),
        name: name.to_string(),
        municipality: municipality.to_string(),
        zone_type: zone_type.to_string(),
        restrictions: restrictions.to_string(),
        polygon: ring.iter().map(|&(lat, lng)| Point::new(lat, lng)).collect(),
        source: STATIC_SOURCE.to_string(),
    };

    vec![
        zone(
            1,
            "ZBEDEP Distrito Centro",
            "Madrid",
            "Zona de Bajas Emisiones de Especial Protección",
            "Prohibido acceso vehículos categoría A. Restricciones para B y C",
            &[
                (40.4200, -3.7038),
                (40.4180, -3.6980),
                (40.4140, -3.6990),
                (40.4120, -3.7020),
                (40.4130, -3.7080),
                (40.4170, -3.7090),
                (40.4200, -3.7038),
            ],
        ),
        zone(
            2,
            "ZBE Alcalá de Henares",
            "Alcalá de Henares",
            "Zona de Bajas Emisiones",
            "Restricciones según clasificación ambiental",
            &[
                (40.4817, -3.3658),
                (40.4800, -3.3600),
                (40.4780, -3.3620),
                (40.4790, -3.3680),
                (40.4817, -3.3658),
            ],
        ),
        zone(
            3,
            "ZBE Alcobendas",
            "Alcobendas",
            "Zona de Bajas Emisiones",
            "Restricciones según normativa municipal",
            &[
                (40.5411, -3.6419),
                (40.5390, -3.6380),
                (40.5370, -3.6400),
                (40.5380, -3.6440),
                (40.5411, -3.6419),
            ],
        ),
    ]
}

/// Aggregate figures about a zone list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSummary {
    pub total_zones: usize,
    pub municipalities: usize,
}

impl ZoneSummary {
    pub fn from_zones(zones: &[Zone]) -> Self {
        let municipalities: HashSet<&str> = zones.iter().map(|z| z.municipality.as_str()).collect();
        Self {
            total_zones: zones.len(),
            municipalities: municipalities.len(),
        }
    }
}

// ============================================================================
// ZONE SOURCES
// ============================================================================

/// Provider of zone records.
///
/// Implementations own retries and provenance; the engine takes whatever
/// list it is given, including an empty one.
#[async_trait]
pub trait ZoneSource: Send + Sync {
    /// Fetches the current zone list.
    async fn fetch_zones(&self) -> Result<Vec<Zone>, ZoneError>;

    /// Short label for logging.
    fn name(&self) -> &str;
}

/// In-memory zone list.
pub struct StaticZoneSource {
    zones: Vec<Zone>,
}

impl StaticZoneSource {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self { zones }
    }

    /// The built-in Madrid fallback list.
    pub fn madrid() -> Self {
        Self::new(fallback_zones())
    }
}

#[async_trait]
impl ZoneSource for StaticZoneSource {
    async fn fetch_zones(&self) -> Result<Vec<Zone>, ZoneError> {
        Ok(self.zones.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Reads a saved geoportal query response from disk.
pub struct ArcGisFileSource {
    path: PathBuf,
}

impl ArcGisFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ZoneSource for ArcGisFileSource {
    async fn fetch_zones(&self) -> Result<Vec<Zone>, ZoneError> {
        let json = tokio::fs::read_to_string(&self.path).await?;
        parse_arcgis_features(&json)
    }

    fn name(&self) -> &str {
        "arcgis-file"
    }
}

/// Queries the geoportal MapServer over HTTP.
///
/// Transport failures and non-2xx statuses become [`ZoneError::Fetch`].
pub struct GeoportalZoneSource {
    client: reqwest::Client,
    base_url: String,
}

impl GeoportalZoneSource {
    /// Source for the MapServer at `base_url` (without the layer path).
    pub fn new(base_url: impl Into<String>) -> Result<Self, ZoneError> {
        let client = reqwest::Client::builder()
            .timeout(GEOPORTAL_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ZoneError::Fetch(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// The official Madrid geoportal.
    pub fn madrid() -> Result<Self, ZoneError> {
        Self::new(MADRID_GEOPORTAL_URL)
    }

    pub fn query_url(&self) -> String {
        format!("{}{}", self.base_url, GEOPORTAL_QUERY)
    }
}

#[async_trait]
impl ZoneSource for GeoportalZoneSource {
    async fn fetch_zones(&self) -> Result<Vec<Zone>, ZoneError> {
        let url = self.query_url();
        debug!(url = %url, "Querying geoportal");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ZoneError::Fetch(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ZoneError::Fetch(format!("HTTP {} from {}", status, url)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ZoneError::Fetch(format!("Failed to read response: {}", e)))?;
        parse_arcgis_features(&body)
    }

    fn name(&self) -> &str {
        "geoportal"
    }
}

/// Wraps a primary source and substitutes a fixed list when it fails.
pub struct FallbackZoneSource<S> {
    primary: S,
    fallback: Vec<Zone>,
}

impl<S: ZoneSource> FallbackZoneSource<S> {
    /// Falls back to the built-in Madrid list.
    pub fn new(primary: S) -> Self {
        Self::with_fallback(primary, fallback_zones())
    }

    pub fn with_fallback(primary: S, fallback: Vec<Zone>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<S: ZoneSource> ZoneSource for FallbackZoneSource<S> {
    async fn fetch_zones(&self) -> Result<Vec<Zone>, ZoneError> {
        match self.primary.fetch_zones().await {
            Ok(zones) => Ok(zones),
            Err(e) => {
                warn!(source = self.primary.name(), error = %e, "Zone fetch failed, using fallback list");
                Ok(self.fallback.clone())
            }
        }
    }

    fn name(&self) -> &str {
        self.primary.name()
    }
}
