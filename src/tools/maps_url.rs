//! maps_url 工具：不依赖 API Key 生成地图链接
//!
//! - 坐标（`[lat, lng]` 或文本中的坐标）→ 定位 URL
//! - 其它文本 → 搜索 URL
//!
//! 文本坐标支持 `40.7128, -74.0060`、`(40.7128, -74.0060)`、`Lat: 40.7128, Lng: -74.0060`、`N 40.7484, W 73.9857`。

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::tools::Tool;

const MAPS_BASE: &str = "https://www.google.com/maps";
pub const MAX_ZOOM: u8 = 20;

static COORD_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn coord_patterns() -> &'static [Regex] {
    COORD_PATTERNS.get_or_init(|| {
        [
            r"(-?\d+\.\d+),\s*(-?\d+\.\d+)",
            r"\((-?\d+\.\d+),\s*(-?\d+\.\d+)\)",
            r"Lat:\s*(-?\d+\.\d+),\s*Lng:\s*(-?\d+\.\d+)",
            r"([NS])\s*(\d+\.\d+),\s*([WE])\s*(\d+\.\d+)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// 地点输入
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapsLocation<'a> {
    Text(&'a str),
    Coordinates(f64, f64),
}

fn valid_coordinates(lat: f64, lng: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

/// 从文本中找出第一组合法坐标；越界的匹配跳过，继续看同一模式的后续匹配
pub fn parse_text_coordinates(text: &str) -> Option<(f64, f64)> {
    coord_patterns()
        .iter()
        .find_map(|re| re.captures_iter(text).find_map(|caps| coordinates_from(&caps)))
}

fn coordinates_from(caps: &Captures<'_>) -> Option<(f64, f64)> {
    let group = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or_default();
    let (lat, lng) = if caps.len() == 5 {
        let lat: f64 = group(2).parse().ok()?;
        let lng: f64 = group(4).parse().ok()?;
        let lat = if group(1).eq_ignore_ascii_case("N") { lat } else { -lat };
        let lng = if group(3).eq_ignore_ascii_case("E") { lng } else { -lng };
        (lat, lng)
    } else {
        (group(1).parse().ok()?, group(2).parse().ok()?)
    };
    valid_coordinates(lat, lng).then_some((lat, lng))
}

fn coordinate_url(lat: f64, lng: f64, zoom: u8) -> String {
    format!("{}?q={},{}&z={}", MAPS_BASE, lat, lng, zoom)
}

/// 生成地图 URL；非法坐标对回退到全局视图
pub fn generate_maps_url(location: MapsLocation<'_>, zoom: u8, parse_coordinates: bool) -> String {
    let zoom = zoom.min(MAX_ZOOM);
    match location {
        MapsLocation::Coordinates(lat, lng) if valid_coordinates(lat, lng) => {
            coordinate_url(lat, lng, zoom)
        }
        MapsLocation::Coordinates(..) => MAPS_BASE.to_string(),
        MapsLocation::Text(text) => {
            if parse_coordinates {
                if let Some((lat, lng)) = parse_text_coordinates(text) {
                    return coordinate_url(lat, lng, zoom);
                }
            }
            if let Some((lat, lng)) = text.split_once(',') {
                if let (Ok(lat), Ok(lng)) = (lat.trim().parse::<f64>(), lng.trim().parse::<f64>()) {
                    if valid_coordinates(lat, lng) {
                        return coordinate_url(lat, lng, zoom);
                    }
                }
            }
            format!(
                "{}/search/?api=1&query={}",
                MAPS_BASE,
                urlencoding::encode(text)
            )
        }
    }
}

/// 地图 URL 工具
pub struct MapsUrlTool {
    default_zoom: u8,
}

impl MapsUrlTool {
    pub fn new(default_zoom: u8) -> Self {
        Self {
            default_zoom: default_zoom.min(MAX_ZOOM),
        }
    }
}

impl Default for MapsUrlTool {
    fn default() -> Self {
        Self::new(15)
    }
}

#[async_trait]
impl Tool for MapsUrlTool {
    fn name(&self) -> &str {
        "maps_url"
    }

    fn description(&self) -> &str {
        "Generates a maps URL for a location without requiring an API key. \
Location may be a place description ('Eiffel Tower, Paris'), a [lat, lng] pair, or a coordinate string ('40.7128,-74.0060'). \
Text descriptions give a search URL; coordinates give a precise location URL."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "description": "Place description, coordinate string, or [lat, lng] array",
                    "oneOf": [
                        { "type": "string" },
                        { "type": "array", "items": { "type": "number" }, "minItems": 2, "maxItems": 2 }
                    ]
                },
                "zoom": { "type": "integer", "minimum": 0, "maximum": MAX_ZOOM, "default": self.default_zoom },
                "parse_text_coordinates": { "type": "boolean", "default": true }
            },
            "required": ["location"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let zoom = match args.get("zoom") {
            None | Some(Value::Null) => self.default_zoom,
            Some(v) => match v.as_u64() {
                Some(z) if z <= u64::from(MAX_ZOOM) => z as u8,
                _ => return Err(format!("zoom must be an integer between 0 and {}", MAX_ZOOM)),
            },
        };
        let parse_coordinates = args
            .get("parse_text_coordinates")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        match args.get("location") {
            Some(Value::String(text)) if !text.trim().is_empty() => Ok(generate_maps_url(
                MapsLocation::Text(text.trim()),
                zoom,
                parse_coordinates,
            )),
            Some(Value::Array(pair)) if pair.len() == 2 => {
                let lat = pair[0].as_f64().ok_or("latitude must be a number")?;
                let lng = pair[1].as_f64().ok_or("longitude must be a number")?;
                Ok(generate_maps_url(
                    MapsLocation::Coordinates(lat, lng),
                    zoom,
                    parse_coordinates,
                ))
            }
            _ => Err("Missing location (string or [lat, lng])".to_string()),
        }
    }
}
