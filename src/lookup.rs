//! Catalogue of the static CBS dimension tables.
//!
//! Each table maps a (code, year, provider) triple to a Hebrew label held in
//! `<table>_hebrew`. Table names never come from the request verbatim: a
//! request name is resolved against this catalogue first, so only known
//! identifiers reach the SQL text.

/// Dimension tables in the `cbs` schema that share the common layout.
const VERSIONED_TABLES: &[&str] = &[
    "police_unit",
    "road_type",
    "accident_severity",
    "accident_type",
    "road_shape",
    "one_lane",
    "multi_lane",
    "speed_limit",
    "road_intactness",
    "road_width",
    "road_sign",
    "road_light",
    "road_control",
    "weather",
    "road_surface",
    "road_object",
    "object_distance",
    "didnt_cross",
    "cross_mode",
    "cross_location",
    "cross_direction",
    "driving_directions",
    "vehicle_status",
    "involved_type",
    "safety_measures",
    "injury_severity",
    "day_type",
    "day_night",
    "day_in_week",
    "traffic_light",
    "vehicle_attribution",
    "vehicle_type",
    "injured_type",
    "injured_position",
    "accident_month",
    "population_type",
    "sex",
    "geo_area",
    "region",
    "municipal_status",
    "district",
    "natural_area",
    "yishuv_shape",
    "age_group",
    "accident_hour_raw",
    "engine_volume",
    "total_weight",
    "hospital_time",
    "medical_type",
    "release_dest",
    "safety_measures_use",
    "late_deceased",
    "location_accuracy",
    "vehicle_damage",
    "columns_description",
];

/// `provider_code` is keyed by code alone.
const UNVERSIONED_TABLES: &[&str] = &["provider_code"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupTable {
    name: &'static str,
    versioned: bool,
}

impl LookupTable {
    /// Resolve a request-supplied table name.
    pub fn by_name(name: &str) -> Option<Self> {
        if let Some(table) = VERSIONED_TABLES.iter().copied().find(|t| *t == name) {
            return Some(Self { name: table, versioned: true });
        }
        UNVERSIONED_TABLES
            .iter()
            .copied()
            .find(|t| *t == name)
            .map(|table| Self { name: table, versioned: false })
    }

    pub fn all() -> impl Iterator<Item = LookupTable> {
        VERSIONED_TABLES
            .iter()
            .copied()
            .map(|name| Self { name, versioned: true })
            .chain(
                UNVERSIONED_TABLES
                    .iter()
                    .copied()
                    .map(|name| Self { name, versioned: false }),
            )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether rows are further keyed by `year` and `provider_code`.
    pub fn is_versioned(&self) -> bool {
        self.versioned
    }

    pub fn label_column(&self) -> String {
        match self.name {
            "columns_description" => "column_description".to_string(),
            name => format!("{name}_hebrew"),
        }
    }

    /// `SELECT` prefix yielding `LookupEntry` columns, without a `WHERE`.
    pub fn select_sql(&self) -> String {
        let label = self.label_column();
        if self.versioned {
            format!(
                "SELECT id, year, provider_code, {label} AS label FROM cbs.{}",
                self.name
            )
        } else {
            format!(
                "SELECT id, NULL::int AS year, NULL::int AS provider_code, {label} AS label FROM cbs.{}",
                self.name
            )
        }
    }
}
