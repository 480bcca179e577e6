//! Typed marker filter and its query-string decoding.
//!
//! Every toggle the map client may send is a named field with a "show all"
//! default. Decoding is permissive: a toggle with an unknown value falls back
//! to its default. Only the bounding box and the date window are validated,
//! and only when markers are requested at all.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::constants::{BIKE_ACCIDENTS, MAX_DIRECT_ACCIDENT_TYPE};
use crate::errors::ApiError;

/// Rectangle given by its south-west and north-east corners, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub sw_lat: f64,
    pub sw_lng: f64,
    pub ne_lat: f64,
    pub ne_lng: f64,
}

impl BoundingBox {
    pub fn new(sw_lat: f64, sw_lng: f64, ne_lat: f64, ne_lng: f64) -> Result<Self, ApiError> {
        for (name, value, limit) in [
            ("sw_lat", sw_lat, 90.0),
            ("ne_lat", ne_lat, 90.0),
            ("sw_lng", sw_lng, 180.0),
            ("ne_lng", ne_lng, 180.0),
        ] {
            if !value.is_finite() || value.abs() > limit {
                return Err(ApiError::InvalidArgument(format!(
                    "{name} must be a coordinate within ±{limit}, got {value}"
                )));
            }
        }
        Ok(Self { sw_lat, sw_lng, ne_lat, ne_lng })
    }

    /// Closed WKT ring, longitude first.
    pub fn to_wkt(&self) -> String {
        format!(
            "POLYGON(({0} {1},{0} {3},{2} {3},{2} {1},{0} {1}))",
            self.sw_lng, self.sw_lat, self.ne_lng, self.ne_lat
        )
    }
}

/// `show_urban`: 3 all, 2 urban only, 1 non-urban only, 0 neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UrbanFilter {
    #[default]
    All,
    UrbanOnly,
    NonUrbanOnly,
    Neither,
}

impl UrbanFilter {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => UrbanFilter::Neither,
            1 => UrbanFilter::NonUrbanOnly,
            2 => UrbanFilter::UrbanOnly,
            _ => UrbanFilter::All,
        }
    }
}

/// `show_intersection`: 3 all, 2 at an intersection, 1 elsewhere, 0 neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntersectionFilter {
    #[default]
    All,
    AtIntersection,
    NotAtIntersection,
    Neither,
}

impl IntersectionFilter {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => IntersectionFilter::Neither,
            1 => IntersectionFilter::NotAtIntersection,
            2 => IntersectionFilter::AtIntersection,
            _ => IntersectionFilter::All,
        }
    }
}

/// `show_lane`: 3 all, 2 two-way roads, 1 one-way roads, 0 neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaneFilter {
    #[default]
    All,
    TwoWay,
    OneWay,
    Neither,
}

impl LaneFilter {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => LaneFilter::Neither,
            1 => LaneFilter::OneWay,
            2 => LaneFilter::TwoWay,
            _ => LaneFilter::All,
        }
    }
}

/// Hour-of-day restriction on the accident timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFilter {
    #[default]
    All,
    /// Hours 6 through 17.
    Daylight,
    /// Hours 18 through 5.
    Dark,
    /// Six hours starting at the given hour.
    WindowFrom(i32),
    /// `[start, end)` in whole hours.
    Range { start: i32, end: i32 },
}

impl TimeFilter {
    /// `show_time` takes precedence; 24 means unset and defers to the
    /// explicit `start_time`/`end_time` pair, where 25 means unset.
    pub fn from_codes(
        show_time: Option<i64>,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Self {
        match show_time.unwrap_or(24) {
            25 => return TimeFilter::Daylight,
            26 => return TimeFilter::Dark,
            hour @ 0..=23 => return TimeFilter::WindowFrom(hour as i32),
            _ => {}
        }
        match (start_time.unwrap_or(25), end_time.unwrap_or(25)) {
            (start @ 0..=24, end @ 0..=24) => TimeFilter::Range {
                start: start as i32,
                end: end as i32,
            },
            _ => TimeFilter::All,
        }
    }
}

/// `acctype`: 0 all, 1–20 a CBS accident type, 21 any accident with a bicycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccidentTypeFilter {
    #[default]
    All,
    Type(i32),
    Bike,
}

impl AccidentTypeFilter {
    pub fn from_code(code: i64) -> Self {
        match code {
            c if c == i64::from(BIKE_ACCIDENTS) => AccidentTypeFilter::Bike,
            c if (1..=i64::from(MAX_DIRECT_ACCIDENT_TYPE)).contains(&c) => {
                AccidentTypeFilter::Type(c as i32)
            }
            _ => AccidentTypeFilter::All,
        }
    }
}

/// Every predicate the marker query understands.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerFilter {
    pub bounds: Option<BoundingBox>,
    /// Inclusive lower bound on `created`.
    pub start_date: Option<NaiveDateTime>,
    /// Exclusive upper bound on `created`.
    pub end_date: Option<NaiveDateTime>,

    pub show_markers: bool,
    pub show_rsa: bool,
    pub show_accidents: bool,
    pub accurate: bool,
    pub approx: bool,
    pub show_fatal: bool,
    pub show_severe: bool,
    pub show_light: bool,
    pub show_urban: UrbanFilter,
    pub show_intersection: IntersectionFilter,
    pub show_lane: LaneFilter,
    /// Day of week, 0 = Sunday.
    pub show_day: Option<i32>,
    /// `day_type` code.
    pub show_holiday: Option<i32>,
    pub time: TimeFilter,
    pub weather: Option<i32>,
    pub road_shape: Option<i32>,
    /// `multi_lane` code, sent as `separation`.
    pub separation: Option<i32>,
    pub road_surface: Option<i32>,
    pub accident_type: AccidentTypeFilter,
    /// `road_control` code, sent as `controlmeasure`.
    pub control_measure: Option<i32>,
    /// Police unit code. The client sends it as `district`.
    pub police_unit: Option<i32>,
    /// Provider code, sent as `case_type`.
    pub case_type: Option<i32>,
    pub age_groups: Option<Vec<i32>>,
}

impl Default for MarkerFilter {
    fn default() -> Self {
        Self {
            bounds: None,
            start_date: None,
            end_date: None,
            show_markers: true,
            show_rsa: true,
            show_accidents: true,
            accurate: true,
            approx: true,
            show_fatal: true,
            show_severe: true,
            show_light: true,
            show_urban: UrbanFilter::All,
            show_intersection: IntersectionFilter::All,
            show_lane: LaneFilter::All,
            show_day: None,
            show_holiday: None,
            time: TimeFilter::All,
            weather: None,
            road_shape: None,
            separation: None,
            road_surface: None,
            accident_type: AccidentTypeFilter::All,
            control_measure: None,
            police_unit: None,
            case_type: None,
            age_groups: None,
        }
    }
}

impl MarkerFilter {
    /// A filter over `[start_date, end_date)` inside `bounds`, everything else shown.
    pub fn new(bounds: BoundingBox, start_date: NaiveDateTime, end_date: NaiveDateTime) -> Self {
        Self {
            bounds: Some(bounds),
            start_date: Some(start_date),
            end_date: Some(end_date),
            ..Self::default()
        }
    }
}

/// Requested page, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    /// `None` unless both numbers are positive.
    pub fn new(page: u32, per_page: u32) -> Option<Self> {
        (page > 0 && per_page > 0).then_some(Self { page, per_page })
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }
}

/// How the result sets are shaped and materialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Only id and coordinates in primary rows.
    pub is_thin: bool,
    /// Resolve the primary page eagerly together with its child rows.
    pub involved_and_vehicles: bool,
    pub fetch_markers: bool,
    pub fetch_vehicles: bool,
    pub fetch_involved: bool,
    pub page: Option<Page>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            is_thin: false,
            involved_and_vehicles: false,
            fetch_markers: true,
            fetch_vehicles: true,
            fetch_involved: true,
            page: None,
        }
    }
}

/// Decoded `application/x-www-form-urlencoded` parameters, last value wins.
#[derive(Debug, Default, Clone)]
pub struct QueryParams {
    values: HashMap<String, String>,
}

impl QueryParams {
    pub fn parse(query: &str) -> Self {
        let values = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        Self { values }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Booleans accept 1/0, true/false, on/off, yes/no in any case.
    pub fn flag(&self, name: &str, default: bool) -> bool {
        match self.text(name).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if matches!(v.as_str(), "1" | "true" | "on" | "yes") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "off" | "no" | "") => false,
            _ => default,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.text(name).and_then(|v| v.trim().parse().ok())
    }

    /// An integer code where 0 (or anything unparseable) means "no filter".
    fn code(&self, name: &str) -> Option<i32> {
        self.int(name)
            .and_then(|v| i32::try_from(v).ok())
            .filter(|v| *v != 0)
    }

    fn required_coordinate(&self, name: &str) -> Result<f64, ApiError> {
        let raw = self
            .text(name)
            .ok_or_else(|| ApiError::InvalidArgument(format!("missing {name}")))?;
        raw.trim()
            .parse()
            .map_err(|_| ApiError::InvalidArgument(format!("{name} is not a number: {raw:?}")))
    }

    fn required_date(&self, name: &str) -> Result<NaiveDateTime, ApiError> {
        let raw = self
            .text(name)
            .ok_or_else(|| ApiError::InvalidArgument(format!("missing {name}")))?;
        parse_date(raw)
            .ok_or_else(|| ApiError::InvalidArgument(format!("{name} is not a date: {raw:?}")))
    }

    /// Bounding box from `sw_lat`, `sw_lng`, `ne_lat` and `ne_lng`.
    pub fn bounding_box(&self) -> Result<BoundingBox, ApiError> {
        BoundingBox::new(
            self.required_coordinate("sw_lat")?,
            self.required_coordinate("sw_lng")?,
            self.required_coordinate("ne_lat")?,
            self.required_coordinate("ne_lng")?,
        )
    }

    /// `(start_date, end_date)`, both required.
    pub fn date_window(&self) -> Result<(NaiveDateTime, NaiveDateTime), ApiError> {
        Ok((self.required_date("start_date")?, self.required_date("end_date")?))
    }

    pub fn marker_filter(&self) -> Result<MarkerFilter, ApiError> {
        let show_markers = self.flag("show_markers", true);
        if !show_markers {
            return Ok(MarkerFilter {
                show_markers,
                ..MarkerFilter::default()
            });
        }

        let (start_date, end_date) = self.date_window()?;
        let age_groups = self.text("age_groups").and_then(|raw| {
            let groups: Vec<i32> = raw
                .split(',')
                .filter_map(|g| g.trim().parse().ok())
                .collect();
            (!groups.is_empty()).then_some(groups)
        });

        Ok(MarkerFilter {
            bounds: Some(self.bounding_box()?),
            start_date: Some(start_date),
            end_date: Some(end_date),
            show_markers,
            show_rsa: self.flag("show_rsa", true),
            show_accidents: self.flag("show_accidents", true),
            accurate: self.flag("accurate", true),
            approx: self.flag("approx", true),
            show_fatal: self.flag("show_fatal", true),
            show_severe: self.flag("show_severe", true),
            show_light: self.flag("show_light", true),
            show_urban: self
                .int("show_urban")
                .map_or_else(Default::default, UrbanFilter::from_code),
            show_intersection: self
                .int("show_intersection")
                .map_or_else(Default::default, IntersectionFilter::from_code),
            show_lane: self.int("show_lane").map_or_else(Default::default, LaneFilter::from_code),
            show_day: self
                .int("show_day")
                .filter(|d| (0..=6).contains(d))
                .map(|d| d as i32),
            show_holiday: self.code("show_holiday"),
            time: TimeFilter::from_codes(
                self.int("show_time"),
                self.int("start_time"),
                self.int("end_time"),
            ),
            weather: self.code("weather"),
            road_shape: self.code("road"),
            separation: self.code("separation"),
            road_surface: self.code("surface"),
            accident_type: self
                .int("acctype")
                .map_or_else(Default::default, AccidentTypeFilter::from_code),
            control_measure: self.code("controlmeasure"),
            police_unit: self.code("district"),
            case_type: self.code("case_type"),
            age_groups,
        })
    }

    pub fn fetch_options(&self) -> FetchOptions {
        let page = match (self.int("page"), self.int("per_page")) {
            (Some(page), Some(per_page)) => u32::try_from(page)
                .ok()
                .zip(u32::try_from(per_page).ok())
                .and_then(|(page, per_page)| Page::new(page, per_page)),
            _ => None,
        };
        FetchOptions {
            is_thin: self.flag("thin_markers", false),
            involved_and_vehicles: self.flag("involved_and_vehicles", false),
            fetch_markers: self.flag("fetch_markers", true),
            fetch_vehicles: self.flag("fetch_vehicles", true),
            fetch_involved: self.flag("fetch_involved", true),
            page,
        }
    }
}

/// Accepts Unix seconds, `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`,
/// `YYYY-MM-DDTHH:MM:SS` and RFC 3339 (converted to UTC).
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc())
}
