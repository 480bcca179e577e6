use chrono::NaiveDateTime;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use crate::config::Settings;
use crate::errors::ApiError;
use crate::filter::BoundingBox;
use crate::lookup::LookupTable;
use crate::models::{
    split_keys, AccidentMarker, Involved, LookupEntry, MarkerKey, NewsFlash, RoadSegment,
    Vehicle, WazeAlert, WazeTrafficJam, INVOLVED_COLUMNS, MARKER_COLUMNS, NEWS_FLASH_COLUMNS,
    VEHICLE_COLUMNS, WAZE_ALERT_COLUMNS, WAZE_TRAFFIC_JAM_COLUMNS,
};

/// Opens the Postgres pool every request borrows its connection from.
///
/// The pool is the only handle to storage; it is built once at startup and
/// passed explicitly to whoever needs it.
pub async fn connect(settings: &Settings) -> Result<PgPool, ApiError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(&settings.database_url)
        .await?;
    info!(max_connections = settings.max_connections, "Connected to Postgres");
    Ok(pool)
}

/// Retrieves every marker row carrying the given numeric id.
///
/// # Arguments
///
/// * `pool` - Reference to the Postgres connection pool.
/// * `marker_id` - The numeric accident id.
///
/// # Returns
///
/// * `Ok(Vec<AccidentMarker>)` - One row per provider/year sharing the id.
/// * `Err(ApiError::NotFound)` - If no marker has this id.
///
/// # Notes
///
/// Ids are only unique together with provider code and year, so more than
/// one row may come back.
pub async fn get_marker(pool: &PgPool, marker_id: i64) -> Result<Vec<AccidentMarker>, ApiError> {
    let markers = sqlx::query_as::<_, AccidentMarker>(&format!(
        "SELECT {MARKER_COLUMNS} FROM cbs.markers WHERE id = $1 \
         ORDER BY created DESC, provider_code DESC, accident_year DESC"
    ))
    .bind(marker_id)
    .fetch_all(pool)
    .await?;

    if markers.is_empty() {
        return Err(ApiError::NotFound(format!("marker {marker_id}")));
    }
    Ok(markers)
}

/// Matches `(id, provider_code, accident_year)`-shaped columns against the
/// three parallel key arrays bound as `$1`, `$2` and `$3`.
const KEYS_IN_UNNEST: &str =
    "IN (SELECT * FROM UNNEST($1::bigint[], $2::integer[], $3::integer[]))";

/// Retrieves the full marker rows for `keys`, newest first.
///
/// # Notes
///
/// Rows are matched on the whole composite key. Matching on the id alone
/// would pull in other providers' and years' accidents sharing the number.
pub async fn markers_by_keys(
    pool: &PgPool,
    keys: &[MarkerKey],
) -> Result<Vec<AccidentMarker>, ApiError> {
    let (ids, providers, years) = split_keys(keys);
    let markers = sqlx::query_as::<_, AccidentMarker>(&format!(
        "SELECT {MARKER_COLUMNS} FROM cbs.markers \
         WHERE (id, provider_code, accident_year) {KEYS_IN_UNNEST} \
         ORDER BY created DESC, id DESC, provider_code DESC, accident_year DESC"
    ))
    .bind(ids)
    .bind(providers)
    .bind(years)
    .fetch_all(pool)
    .await?;
    Ok(markers)
}

/// Retrieves the vehicles of the accidents identified by `keys`.
pub async fn vehicles_for_keys(
    pool: &PgPool,
    keys: &[MarkerKey],
) -> Result<Vec<Vehicle>, ApiError> {
    let (ids, providers, years) = split_keys(keys);
    let vehicles = sqlx::query_as::<_, Vehicle>(&format!(
        "SELECT {VEHICLE_COLUMNS} FROM cbs.vehicles \
         WHERE (accident_id, provider_code, accident_year) {KEYS_IN_UNNEST} \
         ORDER BY accident_id, id"
    ))
    .bind(ids)
    .bind(providers)
    .bind(years)
    .fetch_all(pool)
    .await?;
    Ok(vehicles)
}

/// Retrieves the persons involved in the accidents identified by `keys`.
pub async fn involved_for_keys(
    pool: &PgPool,
    keys: &[MarkerKey],
) -> Result<Vec<Involved>, ApiError> {
    let (ids, providers, years) = split_keys(keys);
    let involved = sqlx::query_as::<_, Involved>(&format!(
        "SELECT {INVOLVED_COLUMNS} FROM cbs.involved \
         WHERE (accident_id, provider_code, accident_year) {KEYS_IN_UNNEST} \
         ORDER BY accident_id, id"
    ))
    .bind(ids)
    .bind(providers)
    .bind(years)
    .fetch_all(pool)
    .await?;
    Ok(involved)
}

/// Retrieves the road-segment rows recorded for one locality.
///
/// # Arguments
///
/// * `pool` - Reference to the Postgres connection pool.
/// * `yishuv_name` - Locality name, compared for equality.
///
/// # Returns
///
/// * `Ok(Vec<RoadSegment>)` - Possibly empty.
/// * `Err` - If the database query fails.
pub async fn road_segments_by_yishuv(
    pool: &PgPool,
    yishuv_name: &str,
) -> Result<Vec<RoadSegment>, ApiError> {
    let rows = sqlx::query_as::<_, RoadSegment>(
        "SELECT * FROM public.road_segments WHERE yishuv_name = $1 ORDER BY id",
    )
    .bind(yishuv_name)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Retrieves the rows of one dimension table, optionally narrowed to a year
/// and provider.
///
/// # Notes
///
/// Year and provider narrowing is ignored for tables keyed by code alone.
pub async fn lookup_entries(
    pool: &PgPool,
    table: LookupTable,
    year: Option<i32>,
    provider_code: Option<i32>,
) -> Result<Vec<LookupEntry>, ApiError> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(table.select_sql());
    if table.is_versioned() {
        let mut first = true;
        for (column, value) in [("year", year), ("provider_code", provider_code)] {
            if let Some(value) = value {
                qb.push(if first { " WHERE " } else { " AND " });
                qb.push(column).push(" = ");
                qb.push_bind(value);
                first = false;
            }
        }
    }
    qb.push(" ORDER BY id");
    if table.is_versioned() {
        qb.push(", year, provider_code");
    }

    let rows = qb.build_query_as::<LookupEntry>().fetch_all(pool).await?;
    Ok(rows)
}

/// Retrieves the most recent news-flash items, newest first.
pub async fn latest_news_flash(pool: &PgPool, limit: i64) -> Result<Vec<NewsFlash>, ApiError> {
    let rows = sqlx::query_as::<_, NewsFlash>(&format!(
        "SELECT {NEWS_FLASH_COLUMNS} FROM news_flash.news_flash \
         ORDER BY date DESC NULLS LAST, id DESC LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Retrieves traffic alerts inside `bounds` created in `[start, end)`.
pub async fn waze_alerts(
    pool: &PgPool,
    bounds: &BoundingBox,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<WazeAlert>, ApiError> {
    let rows = sqlx::query_as::<_, WazeAlert>(&format!(
        "SELECT {WAZE_ALERT_COLUMNS} FROM waze.waze_alerts \
         WHERE ST_Intersects(geom, ST_GeomFromText($1, 4326)) \
         AND created_at >= $2 AND created_at < $3 \
         ORDER BY created_at DESC, id DESC"
    ))
    .bind(bounds.to_wkt())
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Retrieves traffic jams whose line crosses `bounds`, created in `[start, end)`.
pub async fn waze_traffic_jams(
    pool: &PgPool,
    bounds: &BoundingBox,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<WazeTrafficJam>, ApiError> {
    let rows = sqlx::query_as::<_, WazeTrafficJam>(&format!(
        "SELECT {WAZE_TRAFFIC_JAM_COLUMNS} FROM waze.waze_traffic_jams \
         WHERE ST_Intersects(geom, ST_GeomFromText($1, 4326)) \
         AND created_at >= $2 AND created_at < $3 \
         ORDER BY created_at DESC, id DESC"
    ))
    .bind(bounds.to_wkt())
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
