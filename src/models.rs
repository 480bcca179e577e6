//! Row models for the accident, news-flash and traffic-alert schemas.
//!
//! Every struct mirrors one table (or one projection of it) and is decoded
//! with `sqlx::FromRow`. Column lists used by the query layer live next to
//! the struct they feed so the two cannot drift apart.

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::constants::{SEVERITY_FATAL, SEVERITY_LIGHT, SEVERITY_SEVERE, UNITED_HATZALA_CODE};

/// Accident severity as coded by every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Severe,
    Light,
}

impl Severity {
    pub fn code(self) -> i32 {
        match self {
            Severity::Fatal => SEVERITY_FATAL,
            Severity::Severe => SEVERITY_SEVERE,
            Severity::Light => SEVERITY_LIGHT,
        }
    }
}

/// Composite identity of an accident: the same numeric id recurs across
/// providers and years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::FromRow)]
pub struct MarkerKey {
    pub id: i64,
    pub provider_code: i32,
    pub accident_year: i32,
}

/// Column-wise form of a key list, bound as three parallel arrays.
pub fn split_keys(keys: &[MarkerKey]) -> (Vec<i64>, Vec<i32>, Vec<i32>) {
    let mut ids = Vec::with_capacity(keys.len());
    let mut providers = Vec::with_capacity(keys.len());
    let mut years = Vec::with_capacity(keys.len());
    for key in keys {
        ids.push(key.id);
        providers.push(key.provider_code);
        years.push(key.accident_year);
    }
    (ids, providers, years)
}

/// Columns selected for a full marker row (`geom` is never decoded).
pub const MARKER_COLUMNS: &str = "id, provider_code, accident_year, \"type\", title, created, \
    latitude, longitude, provider_and_id, file_type_police, description, accident_type, \
    accident_severity, address, location_accuracy, road_type, road_shape, day_type, police_unit, \
    main_street, secondary_street, junction, one_lane, multi_lane, speed_limit, road_intactness, \
    road_width, road_sign, road_light, road_control, weather, road_surface, road_object, \
    object_distance, didnt_cross, cross_mode, cross_location, cross_direction, video_link, road1, \
    road2, km, km_raw, km_accurate, yishuv_symbol, yishuv_name, geo_area, day_night, day_in_week, \
    traffic_light, region, district, natural_area, municipal_status, yishuv_shape, street1, \
    street1_hebrew, street2, street2_hebrew, house_number, urban_intersection, \
    non_urban_intersection, non_urban_intersection_hebrew, accident_month, accident_day, \
    accident_hour_raw, accident_hour, accident_minute, x, y, vehicle_type_rsa, violation_type_rsa, \
    non_urban_intersection_by_junction_number, rsa_severity, rsa_license_plate";

/// Columns selected in thin mode: just enough to drop a pin on a map.
pub const THIN_MARKER_COLUMNS: &str = "id, latitude, longitude";

/// One accident marker (`cbs.markers`).
///
/// Columns missing from the result set decode to their defaults, which is
/// what lets a thin projection reuse this type.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
#[sqlx(default)]
pub struct AccidentMarker {
    pub id: i64,
    pub provider_code: i32,
    pub accident_year: i32,
    #[sqlx(rename = "type")]
    pub marker_type: Option<i32>,
    pub title: Option<String>,
    pub created: Option<NaiveDateTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub provider_and_id: Option<i64>,
    pub file_type_police: Option<i32>,
    pub description: Option<String>,
    pub accident_type: Option<i32>,
    pub accident_severity: Option<i32>,
    pub address: Option<String>,
    pub location_accuracy: Option<i32>,
    pub road_type: Option<i32>,
    pub road_shape: Option<i32>,
    pub day_type: Option<i32>,
    pub police_unit: Option<i32>,
    pub main_street: Option<String>,
    pub secondary_street: Option<String>,
    pub junction: Option<String>,
    pub one_lane: Option<i32>,
    pub multi_lane: Option<i32>,
    pub speed_limit: Option<i32>,
    pub road_intactness: Option<i32>,
    pub road_width: Option<i32>,
    pub road_sign: Option<i32>,
    pub road_light: Option<i32>,
    pub road_control: Option<i32>,
    pub weather: Option<i32>,
    pub road_surface: Option<i32>,
    pub road_object: Option<i32>,
    pub object_distance: Option<i32>,
    pub didnt_cross: Option<i32>,
    pub cross_mode: Option<i32>,
    pub cross_location: Option<i32>,
    pub cross_direction: Option<i32>,
    pub video_link: Option<String>,
    pub road1: Option<i32>,
    pub road2: Option<i32>,
    pub km: Option<f64>,
    pub km_raw: Option<String>,
    pub km_accurate: Option<bool>,
    pub yishuv_symbol: Option<i32>,
    pub yishuv_name: Option<String>,
    pub geo_area: Option<i32>,
    pub day_night: Option<i32>,
    pub day_in_week: Option<i32>,
    pub traffic_light: Option<i32>,
    pub region: Option<i32>,
    pub district: Option<i32>,
    pub natural_area: Option<i32>,
    pub municipal_status: Option<i32>,
    pub yishuv_shape: Option<i32>,
    pub street1: Option<i32>,
    pub street1_hebrew: Option<String>,
    pub street2: Option<i32>,
    pub street2_hebrew: Option<String>,
    pub house_number: Option<i32>,
    pub urban_intersection: Option<i32>,
    pub non_urban_intersection: Option<i32>,
    pub non_urban_intersection_hebrew: Option<String>,
    pub accident_month: Option<i32>,
    pub accident_day: Option<i32>,
    pub accident_hour_raw: Option<i32>,
    pub accident_hour: Option<i32>,
    pub accident_minute: Option<i32>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub vehicle_type_rsa: Option<String>,
    pub violation_type_rsa: Option<String>,
    pub non_urban_intersection_by_junction_number: Option<String>,
    pub rsa_severity: Option<i32>,
    pub rsa_license_plate: Option<String>,
}

impl AccidentMarker {
    /// JSON shape served to the map client.
    ///
    /// Ids are rendered as strings since they exceed what JavaScript numbers
    /// hold exactly. Optional road attributes are omitted when coded 0.
    pub fn to_json(&self, is_thin: bool) -> Value {
        let mut fields = Map::new();
        fields.insert("id".into(), json!(self.id.to_string()));
        fields.insert("latitude".into(), json!(self.latitude));
        fields.insert("longitude".into(), json!(self.longitude));
        if is_thin {
            return Value::Object(fields);
        }

        let full = json!({
            "provider_code": self.provider_code,
            "accident_year": self.accident_year,
            "accident_severity": self.accident_severity,
            "location_accuracy": self.location_accuracy,
            "created": self.created.map(|c| c.format("%Y-%m-%dT%H:%M:%S").to_string()),
            "title": self.title,
            "address": self.address,
            "type": self.marker_type,
            "accident_type": self.accident_type,
            "road_type": self.road_type,
            "road_shape": self.road_shape,
            "day_type": self.day_type,
            "police_unit": self.police_unit,
            "mainStreet": self.main_street,
            "secondaryStreet": self.secondary_street,
            "junction": self.junction,
            "description": self.description_text(),
        });
        if let Value::Object(full) = full {
            fields.extend(full);
        }

        let optional: [(&str, Value); 20] = [
            ("one_lane", json!(self.one_lane)),
            ("multi_lane", json!(self.multi_lane)),
            ("speed_limit", json!(self.speed_limit)),
            ("road_intactness", json!(self.road_intactness)),
            ("road_width", json!(self.road_width)),
            ("road_sign", json!(self.road_sign)),
            ("road_light", json!(self.road_light)),
            ("road_control", json!(self.road_control)),
            ("weather", json!(self.weather)),
            ("road_surface", json!(self.road_surface)),
            ("road_object", json!(self.road_object)),
            ("object_distance", json!(self.object_distance)),
            ("didnt_cross", json!(self.didnt_cross)),
            ("cross_mode", json!(self.cross_mode)),
            ("cross_location", json!(self.cross_location)),
            ("cross_direction", json!(self.cross_direction)),
            ("video_link", json!(self.video_link)),
            ("road1", json!(self.road1)),
            ("road2", json!(self.road2)),
            ("km", json!(self.km)),
        ];
        for (name, value) in optional {
            if !is_zero(&value) {
                fields.insert(name.into(), value);
            }
        }

        Value::Object(fields)
    }

    /// CBS descriptions are stored as a JSON object of field → value and are
    /// flattened to `field: value` lines with raw codes, not localized labels.
    /// United Hatzala reports are free text.
    fn description_text(&self) -> Option<String> {
        let raw = self.description.as_deref()?;
        if self.provider_code == UNITED_HATZALA_CODE {
            return Some(raw.to_string());
        }
        match serde_json::from_str::<Map<String, Value>>(raw) {
            Ok(map) => Some(
                map.iter()
                    .map(|(field, value)| match value {
                        Value::String(s) => format!("{field}: {s}"),
                        other => format!("{field}: {other}"),
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Err(_) => Some(raw.to_string()),
        }
    }
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

pub const INVOLVED_COLUMNS: &str = "id, provider_and_id, provider_code, file_type_police, \
    accident_id, involved_type, license_acquiring_date, age_group, sex, vehicle_type, \
    safety_measures, involve_yishuv_symbol, involve_yishuv_name, injury_severity, injured_type, \
    injured_position, population_type, home_region, home_district, home_natural_area, \
    home_municipal_status, home_yishuv_shape, hospital_time, medical_type, release_dest, \
    safety_measures_use, late_deceased, car_id, involve_id, accident_year, accident_month, \
    injury_severity_mais";

/// A person involved in an accident (`cbs.involved`).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Involved {
    pub id: i64,
    #[serde(skip)]
    pub provider_and_id: Option<i64>,
    pub provider_code: Option<i32>,
    #[serde(skip)]
    pub file_type_police: Option<i32>,
    pub accident_id: Option<i64>,
    pub involved_type: Option<i32>,
    pub license_acquiring_date: Option<i32>,
    pub age_group: Option<i32>,
    pub sex: Option<i32>,
    pub vehicle_type: Option<i32>,
    pub safety_measures: Option<i32>,
    pub involve_yishuv_symbol: Option<i32>,
    #[serde(skip)]
    pub involve_yishuv_name: Option<String>,
    pub injury_severity: Option<i32>,
    pub injured_type: Option<i32>,
    pub injured_position: Option<i32>,
    pub population_type: Option<i32>,
    pub home_region: Option<i32>,
    pub home_district: Option<i32>,
    pub home_natural_area: Option<i32>,
    pub home_municipal_status: Option<i32>,
    pub home_yishuv_shape: Option<i32>,
    pub hospital_time: Option<i32>,
    pub medical_type: Option<i32>,
    pub release_dest: Option<i32>,
    pub safety_measures_use: Option<i32>,
    pub late_deceased: Option<i32>,
    #[serde(skip)]
    pub car_id: Option<i32>,
    #[serde(skip)]
    pub involve_id: Option<i32>,
    #[serde(skip)]
    pub accident_year: Option<i32>,
    #[serde(skip)]
    pub accident_month: Option<i32>,
    #[serde(skip)]
    pub injury_severity_mais: Option<i32>,
}

pub const VEHICLE_COLUMNS: &str = "id, provider_and_id, provider_code, file_type_police, \
    accident_id, engine_volume, manufacturing_year, driving_directions, vehicle_status, \
    vehicle_attribution, vehicle_type, seats, total_weight, car_id, accident_year, accident_month, \
    vehicle_damage";

/// A vehicle involved in an accident (`cbs.vehicles`).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Vehicle {
    pub id: i64,
    #[serde(skip)]
    pub provider_and_id: Option<i64>,
    pub provider_code: Option<i32>,
    #[serde(skip)]
    pub file_type_police: Option<i32>,
    pub accident_id: Option<i64>,
    pub engine_volume: Option<i32>,
    pub manufacturing_year: Option<i32>,
    pub driving_directions: Option<i32>,
    pub vehicle_status: Option<i32>,
    pub vehicle_attribution: Option<i32>,
    pub vehicle_type: Option<i32>,
    pub seats: Option<i32>,
    pub total_weight: Option<i32>,
    #[serde(skip)]
    pub car_id: Option<i32>,
    #[serde(skip)]
    pub accident_year: Option<i32>,
    #[serde(skip)]
    pub accident_month: Option<i32>,
    #[serde(skip)]
    pub vehicle_damage: Option<i32>,
}

/// Flattened accident row with Hebrew labels, one per road segment match
/// (`public.road_segments`).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RoadSegment {
    pub id: i32,
    pub provider_and_id: Option<i64>,
    pub provider_code: Option<i32>,
    pub provider_code_hebrew: Option<String>,
    pub file_type_police: Option<i32>,
    pub accident_type: Option<i32>,
    pub accident_type_hebrew: Option<String>,
    pub accident_severity: Option<i32>,
    pub accident_severity_hebrew: Option<String>,
    pub accident_timestamp: Option<String>,
    pub location_accuracy: Option<String>,
    pub location_accuracy_hebrew: Option<String>,
    pub road_type: Option<i32>,
    pub road_type_hebrew: Option<String>,
    pub road_shape: Option<i32>,
    pub road_shape_hebrew: Option<String>,
    pub day_type: Option<i32>,
    pub day_type_hebrew: Option<String>,
    pub police_unit: Option<i32>,
    pub police_unit_hebrew: Option<String>,
    pub one_lane: Option<i32>,
    pub one_lane_hebrew: Option<String>,
    pub multi_lane: Option<i32>,
    pub multi_lane_hebrew: Option<String>,
    pub speed_limit: Option<i32>,
    pub speed_limit_hebrew: Option<String>,
    pub road_intactness: Option<i32>,
    pub road_intactness_hebrew: Option<String>,
    pub road_width: Option<i32>,
    pub road_width_hebrew: Option<String>,
    pub road_sign: Option<i32>,
    pub road_sign_hebrew: Option<String>,
    pub road_light: Option<i32>,
    pub road_light_hebrew: Option<String>,
    pub road_control: Option<i32>,
    pub road_control_hebrew: Option<String>,
    pub weather: Option<i32>,
    pub weather_hebrew: Option<String>,
    pub road_surface: Option<i32>,
    pub road_surface_hebrew: Option<String>,
    pub road_object: Option<i32>,
    pub road_object_hebrew: Option<String>,
    pub object_distance: Option<i32>,
    pub object_distance_hebrew: Option<String>,
    pub didnt_cross: Option<i32>,
    pub didnt_cross_hebrew: Option<String>,
    pub cross_mode: Option<i32>,
    pub cross_mode_hebrew: Option<String>,
    pub cross_location: Option<i32>,
    pub cross_location_hebrew: Option<String>,
    pub cross_direction: Option<i32>,
    pub cross_direction_hebrew: Option<String>,
    pub road1: Option<i32>,
    pub road2: Option<i32>,
    pub km: Option<f64>,
    pub km_raw: Option<f64>,
    pub km_accurate: Option<String>,
    pub yishuv_symbol: Option<i32>,
    pub yishuv_name: Option<String>,
    pub geo_area: Option<i32>,
    pub geo_area_hebrew: Option<String>,
    pub day_night: Option<i32>,
    pub day_night_hebrew: Option<String>,
    pub day_in_week: Option<i32>,
    pub day_in_week_hebrew: Option<String>,
    pub traffic_light: Option<i32>,
    pub traffic_light_hebrew: Option<String>,
    pub region: Option<i32>,
    pub region_hebrew: Option<String>,
    pub district: Option<i32>,
    pub district_hebrew: Option<String>,
    pub natural_area: Option<i32>,
    pub natural_area_hebrew: Option<String>,
    pub municipal_status: Option<i32>,
    pub municipal_status_hebrew: Option<String>,
    pub yishuv_shape: Option<i32>,
    pub yishuv_shape_hebrew: Option<String>,
    pub street1: Option<i32>,
    pub street1_hebrew: Option<String>,
    pub street2: Option<i32>,
    pub street2_hebrew: Option<String>,
    pub house_number: Option<i32>,
    pub non_urban_intersection: Option<i32>,
    pub non_urban_intersection_hebrew: Option<String>,
    pub non_urban_intersection_by_junction_number: Option<String>,
    pub urban_intersection: Option<i32>,
    pub accident_year: Option<i32>,
    pub accident_month: Option<i32>,
    pub accident_day: Option<i32>,
    pub accident_hour_raw: Option<i32>,
    pub accident_hour_raw_hebrew: Option<String>,
    pub accident_hour: Option<i32>,
    pub accident_minute: Option<i32>,
    pub geom: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

pub const NEWS_FLASH_COLUMNS: &str = "id, accident, author, date, description, lat, link, lon, \
    road1, road2, resolution, title, source, location, tweet_id, region_hebrew, district_hebrew, \
    yishuv_name, street1_hebrew, street2_hebrew, non_urban_intersection_hebrew, road_segment_name";

/// One news item about a road accident (`news_flash.news_flash`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct NewsFlash {
    pub id: i64,
    pub accident: Option<bool>,
    pub author: Option<String>,
    pub date: Option<NaiveDateTime>,
    pub description: Option<String>,
    pub lat: Option<f64>,
    pub link: Option<String>,
    pub lon: Option<f64>,
    pub road1: Option<f64>,
    pub road2: Option<f64>,
    pub resolution: Option<String>,
    pub title: Option<String>,
    pub source: Option<String>,
    pub location: Option<String>,
    pub tweet_id: Option<i64>,
    pub region_hebrew: Option<String>,
    pub district_hebrew: Option<String>,
    pub yishuv_name: Option<String>,
    pub street1_hebrew: Option<String>,
    pub street2_hebrew: Option<String>,
    pub non_urban_intersection_hebrew: Option<String>,
    pub road_segment_name: Option<String>,
}

pub const WAZE_ALERT_COLUMNS: &str = "id, city, confidence, created_at, longitude, latitude, \
    magvar, number_thumbs_up, report_rating, reliability, alert_type, alert_subtype, uuid, \
    street, road_type";

/// A crowd-sourced traffic alert (`waze.waze_alerts`).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct WazeAlert {
    pub id: i64,
    pub city: Option<String>,
    pub confidence: Option<i32>,
    pub created_at: Option<NaiveDateTime>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub magvar: Option<i32>,
    pub number_thumbs_up: Option<i32>,
    pub report_rating: Option<i32>,
    pub reliability: Option<i32>,
    pub alert_type: Option<String>,
    pub alert_subtype: Option<String>,
    pub uuid: Option<String>,
    pub street: Option<String>,
    pub road_type: Option<i32>,
}

pub const WAZE_TRAFFIC_JAM_COLUMNS: &str = "id, level, line, speed_kmh, turn_type, length, \
    \"type\", uuid, speed, segments, road_type, delay, street, city, end_node, \
    blocking_alert_uuid, start_node, created_at";

/// A reported traffic jam along a line geometry (`waze.waze_traffic_jams`).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct WazeTrafficJam {
    pub id: i64,
    pub level: Option<i32>,
    pub line: Option<String>,
    pub speed_kmh: Option<i32>,
    pub turn_type: Option<i32>,
    pub length: Option<f64>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub jam_type: Option<String>,
    pub uuid: Option<String>,
    pub speed: Option<i32>,
    pub segments: Option<String>,
    pub road_type: Option<i32>,
    pub delay: Option<i32>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub end_node: Option<String>,
    pub blocking_alert_uuid: Option<String>,
    pub start_node: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

/// One code → label row of a dimension table.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct LookupEntry {
    pub id: i32,
    pub year: Option<i32>,
    pub provider_code: Option<i32>,
    pub label: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn marker() -> AccidentMarker {
        AccidentMarker {
            id: 2019000123,
            provider_code: 1,
            accident_year: 2019,
            latitude: Some(32.08),
            longitude: Some(34.78),
            created: NaiveDate::from_ymd_opt(2019, 1, 14).and_then(|d| d.and_hms_opt(7, 30, 0)),
            accident_severity: Some(2),
            description: Some(r#"{"SUG_DEREH": "urban"}"#.into()),
            weather: Some(0),
            road_surface: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn thin_json_carries_only_the_pin() {
        let value = marker().to_json(true);
        let obj = value.as_object().expect("object");
        assert_eq!(obj.len(), 3);
        assert_eq!(obj["id"], json!("2019000123"));
        assert_eq!(obj["latitude"], json!(32.08));
    }

    #[test]
    fn full_json_drops_zero_coded_attributes() {
        let value = marker().to_json(false);
        assert_eq!(value["created"], json!("2019-01-14T07:30:00"));
        assert_eq!(value["road_surface"], json!(3));
        assert!(value.get("weather").is_none());
        assert_eq!(value["description"], json!("SUG_DEREH: urban"));
    }

    #[test]
    fn united_hatzala_descriptions_pass_through() {
        let m = AccidentMarker {
            provider_code: UNITED_HATZALA_CODE,
            description: Some("{not json".into()),
            ..marker()
        };
        assert_eq!(m.to_json(false)["description"], json!("{not json"));
    }

    #[test]
    fn keys_split_into_parallel_columns() {
        let keys = [
            MarkerKey { id: 7, provider_code: 1, accident_year: 2019 },
            MarkerKey { id: 7, provider_code: 4, accident_year: 2018 },
        ];
        let (ids, providers, years) = split_keys(&keys);
        assert_eq!(ids, vec![7, 7]);
        assert_eq!(providers, vec![1, 4]);
        assert_eq!(years, vec![2019, 2018]);
    }

    #[test]
    fn severity_codes_follow_the_provider_coding() {
        assert_eq!(Severity::Fatal.code(), 1);
        assert_eq!(Severity::Severe.code(), 2);
        assert_eq!(Severity::Light.code(), 3);
    }
}
