//! Bounding-box marker queries.
//!
//! Composition is split in two. [`compose`] is pure: it turns a
//! [`MarkerFilter`] into query plans, applying the early-exit rules in a fixed
//! order. [`bounding_box_query`] runs those plans against Postgres: counts,
//! paging and the optional eager fetch of child rows.
//!
//! Plans render to SQL through `sqlx::QueryBuilder`; every filter value is a
//! bind parameter and every identifier comes from [`MarkerColumn`].

use std::time::Instant;

use chrono::NaiveDateTime;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::constants::{
    CBS_ACCIDENT_TYPE_1_CODE, CBS_ACCIDENT_TYPE_3_CODE, DAYLIGHT_END_HOUR, DAYLIGHT_START_HOUR,
    LOCATION_ACCURACY_EXACT, RSA_PROVIDER_CODE, TIME_WINDOW_HOURS, UNITED_HATZALA_CODE,
    VEHICLE_TYPE_BIKE,
};
use crate::db_utils;
use crate::errors::ApiError;
use crate::filter::{
    AccidentTypeFilter, FetchOptions, IntersectionFilter, LaneFilter, MarkerFilter, Page,
    TimeFilter, UrbanFilter,
};
use crate::metrics::{MARKER_QUERY_COUNTER, MARKER_QUERY_HISTOGRAM, SHORT_CIRCUIT_COUNTER};
use crate::models::{
    AccidentMarker, Involved, MarkerKey, Severity, Vehicle, MARKER_COLUMNS, THIN_MARKER_COLUMNS,
};

/// Marker columns a predicate may compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerColumn {
    ProviderCode,
    LocationAccuracy,
    AccidentSeverity,
    RoadType,
    OneLane,
    MultiLane,
    DayType,
    Weather,
    RoadShape,
    RoadSurface,
    AccidentType,
    RoadControl,
    PoliceUnit,
}

impl MarkerColumn {
    pub fn as_sql(self) -> &'static str {
        match self {
            MarkerColumn::ProviderCode => "m.provider_code",
            MarkerColumn::LocationAccuracy => "m.location_accuracy",
            MarkerColumn::AccidentSeverity => "m.accident_severity",
            MarkerColumn::RoadType => "m.road_type",
            MarkerColumn::OneLane => "m.one_lane",
            MarkerColumn::MultiLane => "m.multi_lane",
            MarkerColumn::DayType => "m.day_type",
            MarkerColumn::Weather => "m.weather",
            MarkerColumn::RoadShape => "m.road_shape",
            MarkerColumn::RoadSurface => "m.road_surface",
            MarkerColumn::AccidentType => "m.accident_type",
            MarkerColumn::RoadControl => "m.road_control",
            MarkerColumn::PoliceUnit => "m.police_unit",
        }
    }
}

/// One `WHERE` conjunct over `cbs.markers AS m`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Geometry intersects the WKT polygon.
    Intersects(String),
    CreatedAtOrAfter(NaiveDateTime),
    CreatedBefore(NaiveDateTime),
    Eq(MarkerColumn, i32),
    Ne(MarkerColumn, i32),
    /// Inclusive on both ends.
    Between(MarkerColumn, i32, i32),
    /// Hour of `created` in `[from, to)`.
    HourIn(i32, i32),
    /// Hour of `created` outside `[from, to)`.
    HourNotIn(i32, i32),
    /// Day of week of `created`, 0 = Sunday.
    DayOfWeek(i32),
    /// Some vehicle of the accident has this type.
    HasVehicleType(i32),
    /// Some involved person of the accident is in one of these age groups.
    HasInvolvedAgeGroup(Vec<i32>),
}

impl Predicate {
    fn push_to(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        match self {
            Predicate::Intersects(wkt) => {
                qb.push("ST_Intersects(m.geom, ST_GeomFromText(");
                qb.push_bind(wkt.clone());
                qb.push(", 4326))");
            }
            Predicate::CreatedAtOrAfter(at) => {
                qb.push("m.created >= ");
                qb.push_bind(*at);
            }
            Predicate::CreatedBefore(at) => {
                qb.push("m.created < ");
                qb.push_bind(*at);
            }
            Predicate::Eq(column, value) => {
                qb.push(column.as_sql()).push(" = ");
                qb.push_bind(*value);
            }
            Predicate::Ne(column, value) => {
                qb.push(column.as_sql()).push(" <> ");
                qb.push_bind(*value);
            }
            Predicate::Between(column, low, high) => {
                qb.push(column.as_sql()).push(" BETWEEN ");
                qb.push_bind(*low);
                qb.push(" AND ");
                qb.push_bind(*high);
            }
            Predicate::HourIn(from, to) => {
                qb.push("(EXTRACT(HOUR FROM m.created) >= ");
                qb.push_bind(*from);
                qb.push(" AND EXTRACT(HOUR FROM m.created) < ");
                qb.push_bind(*to);
                qb.push(")");
            }
            Predicate::HourNotIn(from, to) => {
                qb.push("(EXTRACT(HOUR FROM m.created) < ");
                qb.push_bind(*from);
                qb.push(" OR EXTRACT(HOUR FROM m.created) >= ");
                qb.push_bind(*to);
                qb.push(")");
            }
            Predicate::DayOfWeek(day) => {
                qb.push("EXTRACT(DOW FROM m.created) = ");
                qb.push_bind(*day);
            }
            Predicate::HasVehicleType(vehicle_type) => {
                qb.push(
                    "EXISTS (SELECT 1 FROM cbs.vehicles v \
                     WHERE v.accident_id = m.id AND v.provider_code = m.provider_code \
                     AND v.accident_year = m.accident_year AND v.vehicle_type = ",
                );
                qb.push_bind(*vehicle_type);
                qb.push(")");
            }
            Predicate::HasInvolvedAgeGroup(groups) => {
                qb.push(
                    "EXISTS (SELECT 1 FROM cbs.involved i \
                     WHERE i.accident_id = m.id AND i.provider_code = m.provider_code \
                     AND i.accident_year = m.accident_year AND i.age_group = ANY(",
                );
                qb.push_bind(groups.clone());
                qb.push("))");
            }
        }
    }
}

/// An unrealised marker query: filters, projection and page.
///
/// An empty plan matches nothing and is answered without a round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerPlan {
    predicates: Vec<Predicate>,
    matches_nothing: bool,
    thin: bool,
    page: Option<Page>,
}

impl MarkerPlan {
    pub fn empty() -> Self {
        Self {
            predicates: Vec::new(),
            matches_nothing: true,
            thin: false,
            page: None,
        }
    }

    fn within(wkt: &str, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            predicates: vec![
                Predicate::Intersects(wkt.to_string()),
                Predicate::CreatedAtOrAfter(start),
                Predicate::CreatedBefore(end),
            ],
            matches_nothing: false,
            thin: false,
            page: None,
        }
    }

    fn filter(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    pub fn is_empty(&self) -> bool {
        self.matches_nothing
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_thin(&self) -> bool {
        self.thin
    }

    /// Same plan restricted to one page of the ordered rows.
    pub fn paged(mut self, page: Page) -> Self {
        self.page = Some(page);
        self
    }

    fn push_where(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        if self.matches_nothing {
            qb.push(" WHERE false");
            return;
        }
        for (i, predicate) in self.predicates.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            predicate.push_to(qb);
        }
    }

    /// Ordered, paged row query.
    pub fn select_query(&self) -> QueryBuilder<'static, Postgres> {
        let columns = if self.thin { THIN_MARKER_COLUMNS } else { MARKER_COLUMNS };
        self.ordered_query(columns)
    }

    /// Ordered, paged composite-key query; what the eager fetch resolves first.
    pub fn key_query(&self) -> QueryBuilder<'static, Postgres> {
        self.ordered_query("m.id, m.provider_code, m.accident_year")
    }

    fn ordered_query(&self, columns: &str) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(format!("SELECT {columns} FROM cbs.markers AS m"));
        self.push_where(&mut qb);
        qb.push(
            " ORDER BY m.created DESC, m.id DESC, m.provider_code DESC, m.accident_year DESC",
        );
        if let Some(page) = self.page {
            qb.push(" LIMIT ");
            qb.push_bind(page.limit());
            qb.push(" OFFSET ");
            qb.push_bind(page.offset());
        }
        qb
    }

    /// Row count ignoring any page.
    pub fn count_query(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM cbs.markers AS m");
        self.push_where(&mut qb);
        qb
    }

    pub async fn fetch_all(&self, pool: &PgPool) -> Result<Vec<AccidentMarker>, ApiError> {
        if self.matches_nothing {
            return Ok(Vec::new());
        }
        let mut qb = self.select_query();
        let rows = qb.build_query_as::<AccidentMarker>().fetch_all(pool).await?;
        Ok(rows)
    }

    pub async fn fetch_keys(&self, pool: &PgPool) -> Result<Vec<MarkerKey>, ApiError> {
        if self.matches_nothing {
            return Ok(Vec::new());
        }
        let mut qb = self.key_query();
        let keys = qb.build_query_as::<MarkerKey>().fetch_all(pool).await?;
        Ok(keys)
    }

    pub async fn count(&self, pool: &PgPool) -> Result<i64, ApiError> {
        if self.matches_nothing {
            return Ok(0);
        }
        let mut qb = self.count_query();
        let count = qb.build_query_scalar::<i64>().fetch_one(pool).await?;
        Ok(count)
    }
}

/// Outcome of composing a filter, before anything is counted.
#[derive(Debug, Clone, PartialEq)]
pub enum Composition {
    /// Nothing can match; count is zero.
    Nothing { reason: &'static str },
    /// The primary set was ruled out; only alternate-source markers remain.
    AlternateOnly { reason: &'static str, rsa: MarkerPlan },
    Both { primary: MarkerPlan, rsa: MarkerPlan },
}

/// Builds the primary and alternate-source plans for `filter`.
///
/// The early exits are evaluated in this order and stop composition on the
/// spot: `show_markers`, then `accurate`/`approx`, then the "neither"
/// encodings of `show_urban`, `show_intersection` and `show_lane`.
pub fn compose(filter: &MarkerFilter, options: &FetchOptions) -> Result<Composition, ApiError> {
    if !filter.show_markers {
        return Ok(Composition::Nothing { reason: "show_markers" });
    }

    let bounds = filter
        .bounds
        .ok_or_else(|| ApiError::InvalidArgument("missing bounding box".into()))?;
    let start = filter
        .start_date
        .ok_or_else(|| ApiError::InvalidArgument("missing start_date".into()))?;
    let end = filter
        .end_date
        .ok_or_else(|| ApiError::InvalidArgument("missing end_date".into()))?;
    let wkt = bounds.to_wkt();

    let mut markers = MarkerPlan::within(&wkt, start, end);
    markers.filter(Predicate::Ne(MarkerColumn::ProviderCode, RSA_PROVIDER_CODE));

    let rsa = if filter.show_rsa {
        let mut rsa = MarkerPlan::within(&wkt, start, end);
        rsa.filter(Predicate::Eq(MarkerColumn::ProviderCode, RSA_PROVIDER_CODE));
        rsa
    } else {
        MarkerPlan::empty()
    };

    if !filter.show_accidents {
        for code in [CBS_ACCIDENT_TYPE_1_CODE, CBS_ACCIDENT_TYPE_3_CODE, UNITED_HATZALA_CODE] {
            markers.filter(Predicate::Ne(MarkerColumn::ProviderCode, code));
        }
    }

    match (filter.accurate, filter.approx) {
        (true, false) => markers.filter(Predicate::Eq(
            MarkerColumn::LocationAccuracy,
            LOCATION_ACCURACY_EXACT,
        )),
        (false, true) => markers.filter(Predicate::Ne(
            MarkerColumn::LocationAccuracy,
            LOCATION_ACCURACY_EXACT,
        )),
        (false, false) => return Ok(Composition::Nothing { reason: "location_accuracy" }),
        (true, true) => {}
    }

    for (shown, severity) in [
        (filter.show_fatal, Severity::Fatal),
        (filter.show_severe, Severity::Severe),
        (filter.show_light, Severity::Light),
    ] {
        if !shown {
            markers.filter(Predicate::Ne(MarkerColumn::AccidentSeverity, severity.code()));
        }
    }

    match filter.show_urban {
        UrbanFilter::All => {}
        UrbanFilter::UrbanOnly => markers.filter(Predicate::Between(MarkerColumn::RoadType, 1, 2)),
        UrbanFilter::NonUrbanOnly => {
            markers.filter(Predicate::Between(MarkerColumn::RoadType, 3, 4))
        }
        UrbanFilter::Neither => {
            return Ok(Composition::AlternateOnly { reason: "show_urban", rsa })
        }
    }

    match filter.show_intersection {
        IntersectionFilter::All => {}
        IntersectionFilter::AtIntersection => {
            markers.filter(Predicate::Ne(MarkerColumn::RoadType, 2));
            markers.filter(Predicate::Ne(MarkerColumn::RoadType, 4));
        }
        IntersectionFilter::NotAtIntersection => {
            markers.filter(Predicate::Ne(MarkerColumn::RoadType, 1));
            markers.filter(Predicate::Ne(MarkerColumn::RoadType, 3));
        }
        IntersectionFilter::Neither => {
            return Ok(Composition::AlternateOnly { reason: "show_intersection", rsa })
        }
    }

    match filter.show_lane {
        LaneFilter::All => {}
        LaneFilter::TwoWay => markers.filter(Predicate::Between(MarkerColumn::OneLane, 2, 3)),
        LaneFilter::OneWay => markers.filter(Predicate::Eq(MarkerColumn::OneLane, 1)),
        LaneFilter::Neither => {
            return Ok(Composition::AlternateOnly { reason: "show_lane", rsa })
        }
    }

    if let Some(day) = filter.show_day {
        markers.filter(Predicate::DayOfWeek(day));
    }
    if let Some(day_type) = filter.show_holiday {
        markers.filter(Predicate::Eq(MarkerColumn::DayType, day_type));
    }

    match filter.time {
        TimeFilter::All => {}
        TimeFilter::Daylight => {
            markers.filter(Predicate::HourIn(DAYLIGHT_START_HOUR, DAYLIGHT_END_HOUR))
        }
        TimeFilter::Dark => {
            markers.filter(Predicate::HourNotIn(DAYLIGHT_START_HOUR, DAYLIGHT_END_HOUR))
        }
        TimeFilter::WindowFrom(hour) => {
            markers.filter(Predicate::HourIn(hour, hour + TIME_WINDOW_HOURS))
        }
        TimeFilter::Range { start, end } => markers.filter(Predicate::HourIn(start, end)),
    }

    for (value, column) in [
        (filter.weather, MarkerColumn::Weather),
        (filter.road_shape, MarkerColumn::RoadShape),
        (filter.separation, MarkerColumn::MultiLane),
        (filter.road_surface, MarkerColumn::RoadSurface),
    ] {
        if let Some(value) = value {
            markers.filter(Predicate::Eq(column, value));
        }
    }

    match filter.accident_type {
        AccidentTypeFilter::All => {}
        AccidentTypeFilter::Type(code) => {
            markers.filter(Predicate::Eq(MarkerColumn::AccidentType, code))
        }
        AccidentTypeFilter::Bike => markers.filter(Predicate::HasVehicleType(VEHICLE_TYPE_BIKE)),
    }

    for (value, column) in [
        (filter.control_measure, MarkerColumn::RoadControl),
        (filter.police_unit, MarkerColumn::PoliceUnit),
        (filter.case_type, MarkerColumn::ProviderCode),
    ] {
        if let Some(value) = value {
            markers.filter(Predicate::Eq(column, value));
        }
    }

    markers.thin = options.is_thin;

    if let Some(groups) = &filter.age_groups {
        markers.filter(Predicate::HasInvolvedAgeGroup(groups.clone()));
    }

    Ok(Composition::Both { primary: markers, rsa })
}

/// Child rows resolved together with one page of markers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateRows {
    pub markers: Vec<AccidentMarker>,
    pub vehicles: Vec<Vehicle>,
    pub involved: Vec<Involved>,
}

/// Primary result set: deferred, or materialised with its child rows.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerSet {
    Deferred(MarkerPlan),
    Aggregate(AggregateRows),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerResult {
    pub accident_markers: MarkerSet,
    pub rsa_markers: MarkerPlan,
    pub total_records: i64,
}

impl MarkerResult {
    fn nothing() -> Self {
        Self {
            accident_markers: MarkerSet::Deferred(MarkerPlan::empty()),
            rsa_markers: MarkerPlan::empty(),
            total_records: 0,
        }
    }
}

/// Markers inside the filter's bounding box and date window.
///
/// `total_records` counts the primary and alternate sets before paging; in
/// eager mode it is the number of resolved marker keys instead.
pub async fn bounding_box_query(
    pool: &PgPool,
    filter: &MarkerFilter,
    options: &FetchOptions,
) -> Result<MarkerResult, ApiError> {
    MARKER_QUERY_COUNTER.inc();
    let start = Instant::now();

    let result = match compose(filter, options)? {
        Composition::Nothing { reason } => {
            SHORT_CIRCUIT_COUNTER.with_label_values(&[reason]).inc();
            debug!(reason, "Marker query matches nothing");
            MarkerResult::nothing()
        }
        Composition::AlternateOnly { reason, rsa } => {
            SHORT_CIRCUIT_COUNTER.with_label_values(&[reason]).inc();
            let total_records = rsa.count(pool).await?;
            debug!(reason, total_records, "Primary marker set ruled out");
            MarkerResult {
                accident_markers: MarkerSet::Deferred(MarkerPlan::empty()),
                rsa_markers: rsa,
                total_records,
            }
        }
        Composition::Both { primary, rsa } => {
            let total_records = primary.count(pool).await? + rsa.count(pool).await?;
            let primary = match options.page {
                Some(page) => primary.paged(page),
                None => primary,
            };

            if options.involved_and_vehicles {
                let aggregate = fetch_aggregate(pool, &primary, options).await?;
                MarkerResult {
                    total_records: aggregate.1,
                    accident_markers: MarkerSet::Aggregate(aggregate.0),
                    rsa_markers: MarkerPlan::empty(),
                }
            } else {
                MarkerResult {
                    accident_markers: MarkerSet::Deferred(primary),
                    rsa_markers: rsa,
                    total_records,
                }
            }
        }
    };

    let elapsed = start.elapsed().as_secs_f64();
    MARKER_QUERY_HISTOGRAM.observe(elapsed);
    info!(
        total_records = result.total_records,
        duration_s = elapsed,
        "Marker query composed"
    );
    Ok(result)
}

/// Resolves `primary` to composite keys, then loads each requested
/// collection for exactly those keys concurrently. Returns the rows and the
/// key count.
async fn fetch_aggregate(
    pool: &PgPool,
    primary: &MarkerPlan,
    options: &FetchOptions,
) -> Result<(AggregateRows, i64), ApiError> {
    let keys = primary.fetch_keys(pool).await?;
    let key_count = keys.len() as i64;
    if keys.is_empty() {
        return Ok((AggregateRows::default(), 0));
    }

    let (markers, vehicles, involved) = futures::try_join!(
        async {
            if options.fetch_markers {
                db_utils::markers_by_keys(pool, &keys).await
            } else {
                Ok(Vec::new())
            }
        },
        async {
            if options.fetch_vehicles {
                db_utils::vehicles_for_keys(pool, &keys).await
            } else {
                Ok(Vec::new())
            }
        },
        async {
            if options.fetch_involved {
                db_utils::involved_for_keys(pool, &keys).await
            } else {
                Ok(Vec::new())
            }
        },
    )?;

    debug!(
        keys = key_count,
        markers = markers.len(),
        vehicles = vehicles.len(),
        involved = involved.len(),
        "Resolved markers with child rows"
    );
    Ok((AggregateRows { markers, vehicles, involved }, key_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{parse_date, BoundingBox};

    fn january() -> MarkerFilter {
        MarkerFilter::new(
            BoundingBox::new(29.4, 34.2, 33.4, 35.9).expect("bounds"),
            parse_date("2019-01-01").expect("date"),
            parse_date("2019-02-01").expect("date"),
        )
    }

    fn both(filter: &MarkerFilter) -> (MarkerPlan, MarkerPlan) {
        match compose(filter, &FetchOptions::default()).expect("composes") {
            Composition::Both { primary, rsa } => (primary, rsa),
            other => panic!("expected both plans, got {other:?}"),
        }
    }

    #[test]
    fn hidden_markers_match_nothing_whatever_else_is_set() {
        let filter = MarkerFilter {
            show_markers: false,
            bounds: None,
            show_urban: UrbanFilter::Neither,
            age_groups: Some(vec![1]),
            ..MarkerFilter::default()
        };
        let composed = compose(&filter, &FetchOptions::default()).expect("no validation");
        assert_eq!(composed, Composition::Nothing { reason: "show_markers" });
    }

    #[test]
    fn missing_bounds_are_invalid_when_markers_are_shown() {
        let err = compose(&MarkerFilter::default(), &FetchOptions::default()).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[test]
    fn baseline_partitions_by_provider() {
        let (primary, rsa) = both(&january());
        assert_eq!(primary.predicates().len(), 4);
        assert_eq!(
            primary.predicates()[3],
            Predicate::Ne(MarkerColumn::ProviderCode, RSA_PROVIDER_CODE)
        );
        assert_eq!(
            rsa.predicates()[3],
            Predicate::Eq(MarkerColumn::ProviderCode, RSA_PROVIDER_CODE)
        );
        assert_eq!(
            primary.predicates()[1],
            Predicate::CreatedAtOrAfter(parse_date("2019-01-01").expect("date"))
        );
        assert_eq!(
            primary.predicates()[2],
            Predicate::CreatedBefore(parse_date("2019-02-01").expect("date"))
        );
    }

    #[test]
    fn neither_encodings_keep_the_alternate_set() {
        for filter in [
            MarkerFilter { show_urban: UrbanFilter::Neither, ..january() },
            MarkerFilter { show_intersection: IntersectionFilter::Neither, ..january() },
            MarkerFilter { show_lane: LaneFilter::Neither, ..january() },
        ] {
            match compose(&filter, &FetchOptions::default()).expect("composes") {
                Composition::AlternateOnly { rsa, .. } => assert!(!rsa.is_empty()),
                other => panic!("expected alternate only, got {other:?}"),
            }
        }
    }

    #[test]
    fn neither_with_hidden_rsa_leaves_an_empty_alternate_plan() {
        let filter = MarkerFilter {
            show_rsa: false,
            show_lane: LaneFilter::Neither,
            ..january()
        };
        match compose(&filter, &FetchOptions::default()).expect("composes") {
            Composition::AlternateOnly { reason, rsa } => {
                assert_eq!(reason, "show_lane");
                assert!(rsa.is_empty());
            }
            other => panic!("expected alternate only, got {other:?}"),
        }
    }

    #[test]
    fn no_location_accuracy_matches_nothing() {
        let filter = MarkerFilter { accurate: false, approx: false, ..january() };
        assert_eq!(
            compose(&filter, &FetchOptions::default()).expect("composes"),
            Composition::Nothing { reason: "location_accuracy" }
        );
    }

    #[test]
    fn short_circuit_precedes_later_filters() {
        let filter = MarkerFilter {
            show_urban: UrbanFilter::Neither,
            weather: Some(2),
            ..january()
        };
        let composed = compose(&filter, &FetchOptions::default()).expect("composes");
        assert!(matches!(composed, Composition::AlternateOnly { reason: "show_urban", .. }));
    }

    #[test]
    fn hidden_severities_become_inequalities() {
        let (primary, _) = both(&MarkerFilter {
            show_fatal: false,
            show_light: false,
            ..january()
        });
        let tail = &primary.predicates()[4..];
        assert_eq!(
            tail,
            &[
                Predicate::Ne(MarkerColumn::AccidentSeverity, 1),
                Predicate::Ne(MarkerColumn::AccidentSeverity, 3),
            ]
        );
    }

    #[test]
    fn daylight_and_dark_render_complementary_hour_tests() {
        let (day, _) = both(&MarkerFilter { time: TimeFilter::Daylight, ..january() });
        assert_eq!(day.predicates().last(), Some(&Predicate::HourIn(6, 18)));
        let (night, _) = both(&MarkerFilter { time: TimeFilter::Dark, ..january() });
        assert_eq!(night.predicates().last(), Some(&Predicate::HourNotIn(6, 18)));
        let (window, _) = both(&MarkerFilter { time: TimeFilter::WindowFrom(20), ..january() });
        assert_eq!(window.predicates().last(), Some(&Predicate::HourIn(20, 26)));
    }

    #[test]
    fn bike_accidents_join_vehicles() {
        let (primary, _) = both(&MarkerFilter {
            accident_type: AccidentTypeFilter::Bike,
            ..january()
        });
        assert_eq!(
            primary.predicates().last(),
            Some(&Predicate::HasVehicleType(VEHICLE_TYPE_BIKE))
        );
        let sql = primary.select_query().into_sql();
        assert!(sql.contains("FROM cbs.vehicles v"));
        assert!(sql.contains("v.accident_year = m.accident_year"));
    }

    #[test]
    fn district_filters_police_unit() {
        let (primary, _) = both(&MarkerFilter { police_unit: Some(11), ..january() });
        assert_eq!(
            primary.predicates().last(),
            Some(&Predicate::Eq(MarkerColumn::PoliceUnit, 11))
        );
    }

    #[test]
    fn absent_age_groups_add_no_predicate() {
        let (primary, _) = both(&january());
        assert!(!primary.is_empty());
        assert!(!primary
            .predicates()
            .iter()
            .any(|p| matches!(p, Predicate::HasInvolvedAgeGroup(_))));

        let (primary, _) = both(&MarkerFilter {
            age_groups: Some(vec![1, 2]),
            ..january()
        });
        assert_eq!(
            primary.predicates().last(),
            Some(&Predicate::HasInvolvedAgeGroup(vec![1, 2]))
        );
    }

    #[test]
    fn select_sql_orders_newest_first_and_pages() {
        let (primary, _) = both(&january());
        let paged = primary.paged(Page::new(3, 20).expect("page"));
        let sql = paged.select_query().into_sql();
        assert!(sql.starts_with("SELECT id, provider_code"));
        assert!(sql.contains(
            "ORDER BY m.created DESC, m.id DESC, m.provider_code DESC, m.accident_year DESC"
        ));
        assert!(sql.ends_with("LIMIT $5 OFFSET $6"));

        let count = paged.count_query().into_sql();
        assert!(!count.contains("LIMIT"));
        assert!(count.contains("ST_Intersects(m.geom, ST_GeomFromText($1, 4326))"));
    }

    #[test]
    fn thin_projection_selects_only_the_pin() {
        let options = FetchOptions { is_thin: true, ..FetchOptions::default() };
        let Composition::Both { primary, rsa } = compose(&january(), &options).expect("composes")
        else {
            panic!("expected both plans");
        };
        assert!(primary.is_thin());
        assert!(!rsa.is_thin());
        assert!(primary
            .select_query()
            .into_sql()
            .starts_with("SELECT id, latitude, longitude FROM"));
    }

    #[test]
    fn eager_keys_carry_the_whole_composite_key() {
        let (primary, _) = both(&january());
        let paged = primary.paged(Page::new(1, 10).expect("page"));
        let sql = paged.key_query().into_sql();
        assert!(sql.starts_with(
            "SELECT m.id, m.provider_code, m.accident_year FROM cbs.markers AS m WHERE "
        ));
        assert!(sql.contains("m.provider_code <> $4"));
        assert!(sql.contains("m.created >= $2 AND m.created < $3"));
        assert!(sql.ends_with("LIMIT $5 OFFSET $6"));
    }

    #[test]
    fn empty_plans_render_false() {
        let sql = MarkerPlan::empty().count_query().into_sql();
        assert_eq!(sql, "SELECT COUNT(*) FROM cbs.markers AS m WHERE false");
    }

    #[test]
    fn composition_is_deterministic() {
        let filter = MarkerFilter {
            show_day: Some(5),
            road_surface: Some(2),
            age_groups: Some(vec![3]),
            ..january()
        };
        let first = compose(&filter, &FetchOptions::default()).expect("composes");
        let second = compose(&filter, &FetchOptions::default()).expect("composes");
        assert_eq!(first, second);
    }
}
