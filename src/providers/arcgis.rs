//! Riksantikvaren ArcGIS REST provider: the national cultural-heritage
//! registry queried as GeoJSON (WGS84).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::registry::{
    Content, RegistryError, ToolDefinition, ToolError, ToolHandler, ToolRegistry,
};
use crate::schema::Schema;
use crate::upstream::{build_client, fetch_json};

const BASE_URL: &str = "https://kart.ra.no/arcgis/rest/services/Distribusjon";

pub const DEFAULT_SERVICE: &str = "Kulturminner20180301";
pub const DEFAULT_LAYER: u64 = 6;
const DISPLAY_LIMIT: usize = 20;

/// Layers of the default service, kept as data for the catalog tool.
const KNOWN_LAYERS: &[(u64, &str)] = &[
    (0, "Bygninger (buildings)"),
    (1, "FredaBygninger (protected buildings)"),
    (2, "SefrakBygninger (SEFRAK-registered buildings)"),
    (3, "Kulturminner (heritage sites, icons)"),
    (4, "Enkeltminneikoner (single monuments, icons)"),
    (5, "Lokalitetsikoner (localities, icons)"),
    (6, "Enkeltminner (single monuments, polygons)"),
    (7, "Lokaliteter (localities, polygons)"),
    (8, "Sikringssoner (protection zones)"),
    (9, "Brannvern (fire protection)"),
    (12, "Brannsmitteomrader (fire spread areas)"),
    (13, "VerneverdigTetteTrehusmiljoer (preserved wooden house areas)"),
    (14, "Kulturmiljoer (cultural environments)"),
];

pub struct ArcGisClient {
    http: reqwest::Client,
}

impl ArcGisClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: build_client(timeout)?,
        })
    }

    pub async fn list_services(&self) -> Result<Value, ToolError> {
        fetch_json(&self.http, BASE_URL, &[("f", "json".to_string())]).await
    }

    pub async fn query_layer(
        &self,
        service: &str,
        layer_id: u64,
        query: &LayerQuery,
    ) -> Result<Value, ToolError> {
        let url = format!("{BASE_URL}/{}/MapServer/{layer_id}/query", checked_service(service)?);

        let mut params = vec![
            ("where", query.where_clause.clone()),
            ("outFields", "*".to_string()),
            ("returnGeometry", "true".to_string()),
            ("outSR", "4326".to_string()),
            ("f", "geojson".to_string()),
            ("resultRecordCount", query.limit.to_string()),
        ];
        if let Some(geometry) = &query.geometry {
            params.push(("geometry", geometry.shape.to_string()));
            params.push(("geometryType", geometry.kind.to_string()));
            params.push(("spatialRel", "esriSpatialRelIntersects".to_string()));
            params.push(("inSR", "4326".to_string()));
            if let Some(distance) = geometry.distance_meters {
                params.push(("distance", distance.to_string()));
                params.push(("units", "esriSRUnit_Meter".to_string()));
            }
        }

        fetch_json(&self.http, &url, &params).await
    }
}

pub struct LayerQuery {
    pub where_clause: String,
    pub geometry: Option<GeometryFilter>,
    pub limit: u64,
}

pub struct GeometryFilter {
    pub shape: Value,
    pub kind: &'static str,
    pub distance_meters: Option<u64>,
}

impl GeometryFilter {
    pub fn point(latitude: f64, longitude: f64, distance_meters: u64) -> Self {
        Self {
            shape: json!({ "x": longitude, "y": latitude }),
            kind: "esriGeometryPoint",
            distance_meters: Some(distance_meters),
        }
    }

    pub fn envelope(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            shape: json!({
                "xmin": min_lon,
                "ymin": min_lat,
                "xmax": max_lon,
                "ymax": max_lat,
            }),
            kind: "esriGeometryEnvelope",
            distance_meters: None,
        }
    }
}

/// Service names become path segments, so only plain names pass.
fn checked_service(service: &str) -> Result<&str, ToolError> {
    if !service.is_empty() && service.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        Ok(service)
    } else {
        Err(ToolError::Invalid(format!("invalid service name '{service}'")))
    }
}

fn format_feature(feature: &Value, index: usize) -> String {
    let empty = serde_json::Map::new();
    let props = feature["properties"].as_object().unwrap_or(&empty);

    let name = ["navn", "lokalitetsnavn", "tittel"]
        .iter()
        .find_map(|key| property(props, key))
        .unwrap_or_else(|| {
            let object_id = props
                .get("OBJECTID")
                .and_then(Value::as_u64)
                .map(|id| id.to_string())
                .unwrap_or_else(|| index.to_string());
            format!("Feature {object_id}")
        });

    let mut lines = vec![format!("**{name}**")];
    for (key, label) in [
        ("kategori", "Kategori"),
        ("kommune", "Kommune"),
        ("fylke", "Fylke"),
        ("vernetype", "Vernetype"),
        ("vernestatus", "Vernestatus"),
        ("datering", "Datering"),
        ("funksjon", "Funksjon"),
    ] {
        if let Some(value) = property(props, key) {
            lines.push(format!("  {label}: {value}"));
        }
    }

    let geometry = &feature["geometry"];
    if geometry["type"] == "Point" {
        if let Some(coords) = geometry["coordinates"].as_array() {
            if let (Some(lon), Some(lat)) =
                (coords.first().and_then(Value::as_f64), coords.get(1).and_then(Value::as_f64))
            {
                lines.push(format!("  Koordinater: {lat:.5}, {lon:.5}"));
            }
        }
    }

    lines.join("\n")
}

/// Case-insensitive property lookup; upstream layers disagree on casing.
fn property(props: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    props
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .and_then(|(_, value)| value.as_str())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn format_features(heading: String, features: &[Value]) -> String {
    let mut lines = vec![heading, String::new()];
    for (index, feature) in features.iter().take(DISPLAY_LIMIT).enumerate() {
        lines.push(format!("{}. {}", index + 1, format_feature(feature, index + 1)));
        lines.push(String::new());
    }
    if features.len() > DISPLAY_LIMIT {
        lines.push(format!(
            "... and {} more features",
            features.len() - DISPLAY_LIMIT
        ));
    }
    lines.join("\n")
}

struct ServicesTool {
    client: Arc<ArcGisClient>,
}

#[async_trait]
impl ToolHandler for ServicesTool {
    async fn call(&self, _arguments: Value) -> Result<Vec<Content>, ToolError> {
        let catalog = self.client.list_services().await?;

        let mut lines = vec![
            "# Riksantikvaren ArcGIS map services".to_string(),
            String::new(),
            format!("**Default service:** `{DEFAULT_SERVICE}` (layer {DEFAULT_LAYER})"),
            String::new(),
            format!("## {DEFAULT_SERVICE} layers"),
        ];
        for (layer_id, layer_name) in KNOWN_LAYERS {
            let marker = if *layer_id == DEFAULT_LAYER { " (default)" } else { "" };
            lines.push(format!("  - Layer {layer_id}: {layer_name}{marker}"));
        }

        let additional: Vec<String> = catalog["services"]
            .as_array()
            .map(|services| {
                services
                    .iter()
                    .filter_map(|service| {
                        let name = service["name"].as_str()?.rsplit('/').next()?;
                        (name != DEFAULT_SERVICE).then(|| {
                            let kind = service["type"].as_str().unwrap_or("Unknown");
                            format!("- {name} ({kind})")
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        if !additional.is_empty() {
            lines.push(String::new());
            lines.push("## Additional services".to_string());
            lines.extend(additional);
        }

        Ok(vec![Content::text(lines.join("\n"))])
    }
}

fn default_service() -> String {
    DEFAULT_SERVICE.to_string()
}

fn default_layer() -> u64 {
    DEFAULT_LAYER
}

fn default_where() -> String {
    "1=1".to_string()
}

fn default_query_limit() -> u64 {
    50
}

fn default_distance() -> u64 {
    1000
}

fn default_nearby_limit() -> u64 {
    20
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    #[serde(default = "default_service")]
    service: String,
    #[serde(default = "default_layer")]
    layer_id: u64,
    bbox: Option<String>,
    #[serde(default = "default_where")]
    r#where: String,
    #[serde(default = "default_query_limit")]
    limit: u64,
}

struct QueryTool {
    client: Arc<ArcGisClient>,
}

#[async_trait]
impl ToolHandler for QueryTool {
    async fn call(&self, arguments: Value) -> Result<Vec<Content>, ToolError> {
        let args: QueryArgs = serde_json::from_value(arguments)
            .map_err(|err| ToolError::Invalid(err.to_string()))?;

        let geometry = args.bbox.as_deref().map(parse_bbox).transpose()?;
        let query = LayerQuery {
            where_clause: args.r#where,
            geometry,
            limit: args.limit,
        };

        let result = self
            .client
            .query_layer(&args.service, args.layer_id, &query)
            .await?;
        let features = result["features"].as_array().cloned().unwrap_or_default();
        if features.is_empty() {
            return Ok(vec![Content::text(format!(
                "No features found in {}/{}",
                args.service, args.layer_id
            ))]);
        }

        Ok(vec![Content::text(format_features(
            format!(
                "Found {} features in {} (layer {}):",
                features.len(),
                args.service,
                args.layer_id
            ),
            &features,
        ))])
    }
}

fn parse_bbox(bbox: &str) -> Result<GeometryFilter, ToolError> {
    let parts: Vec<f64> = bbox
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| ToolError::Invalid("bbox values must be numbers".to_string()))?;
    let [min_lon, min_lat, max_lon, max_lat] = parts.as_slice() else {
        return Err(ToolError::Invalid(
            "bbox must have 4 values: min_lon,min_lat,max_lon,max_lat".to_string(),
        ));
    };
    Ok(GeometryFilter::envelope(*min_lon, *min_lat, *max_lon, *max_lat))
}

#[derive(Debug, Deserialize)]
struct NearbyArgs {
    latitude: f64,
    longitude: f64,
    #[serde(default = "default_distance")]
    distance: u64,
    #[serde(default = "default_service")]
    service: String,
    #[serde(default = "default_layer")]
    layer_id: u64,
    #[serde(default = "default_nearby_limit")]
    limit: u64,
}

struct NearbyTool {
    client: Arc<ArcGisClient>,
}

#[async_trait]
impl ToolHandler for NearbyTool {
    async fn call(&self, arguments: Value) -> Result<Vec<Content>, ToolError> {
        let args: NearbyArgs = serde_json::from_value(arguments)
            .map_err(|err| ToolError::Invalid(err.to_string()))?;

        let query = LayerQuery {
            where_clause: "1=1".to_string(),
            geometry: Some(GeometryFilter::point(
                args.latitude,
                args.longitude,
                args.distance,
            )),
            limit: args.limit,
        };

        let result = self
            .client
            .query_layer(&args.service, args.layer_id, &query)
            .await?;
        let features = result["features"].as_array().cloned().unwrap_or_default();
        if features.is_empty() {
            return Ok(vec![Content::text(format!(
                "No cultural heritage sites found within {}m of ({}, {})",
                args.distance, args.latitude, args.longitude
            ))]);
        }

        Ok(vec![Content::text(format_features(
            format!(
                "Found {} sites within {}m of ({}, {}):",
                features.len(),
                args.distance,
                args.latitude,
                args.longitude
            ),
            &features,
        ))])
    }
}

pub fn register_tools(registry: &mut ToolRegistry, config: &Config) -> Result<(), RegistryError> {
    let client = Arc::new(
        ArcGisClient::new(config.geo_timeout)
            .map_err(|err| RegistryError::Provider(err.to_string()))?,
    );

    registry.register(ToolDefinition::new(
        "arcgis-services",
        "List available Riksantikvaren ArcGIS map services and layers. The primary service \
         covers buildings, monuments, localities, and protection zones.",
        Schema::empty_object(),
        config.geo_timeout,
        Arc::new(ServicesTool {
            client: Arc::clone(&client),
        }),
    ))?;

    registry.register(ToolDefinition::new(
        "arcgis-query",
        "Query cultural heritage features by SQL WHERE clause or bounding box. Returns \
         feature attributes including dating, category, and protection status.",
        Schema::object(
            [
                ("service", Schema::string("Service name (default Kulturminner20180301)")),
                ("layer_id", Schema::integer("Layer id (default 6, single monuments)")),
                (
                    "bbox",
                    Schema::string("Bounding box as 'min_lon,min_lat,max_lon,max_lat' (WGS84)"),
                ),
                ("where", Schema::string("SQL WHERE clause, e.g. \"kommune='Oslo'\"")),
                ("limit", Schema::integer("Maximum features to return")),
            ],
            &[],
        ),
        config.geo_timeout,
        Arc::new(QueryTool {
            client: Arc::clone(&client),
        }),
    ))?;

    registry.register(ToolDefinition::new(
        "arcgis-nearby",
        "Find cultural heritage sites near coordinates, with a distance in meters. Good for \
         locating burial mounds, churches, and other monuments around a point.",
        Schema::object(
            [
                ("latitude", Schema::number("Latitude in decimal degrees")),
                ("longitude", Schema::number("Longitude in decimal degrees")),
                ("distance", Schema::integer("Search distance in meters")),
                ("service", Schema::string("Service name")),
                ("layer_id", Schema::integer("Layer id (6=single monuments, 7=localities)")),
                ("limit", Schema::integer("Maximum results")),
            ],
            &["latitude", "longitude"],
        ),
        config.geo_timeout,
        Arc::new(NearbyTool { client }),
    ))?;

    Ok(())
}
