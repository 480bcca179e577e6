//! ingestor.rs
//!
//! News-flash CSV import: stream rows from disk, replace missing numeric
//! cells with `-1`, and bulk-insert fixed-size batches, one transaction per
//! batch. A failure mid-file leaves every earlier batch committed.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::constants::MISSING_NUMERIC;
use crate::errors::ApiError;
use crate::filter::parse_date;
use crate::metrics::NEWS_FLASH_ROWS_COUNTER;
use crate::models::{NewsFlash, NEWS_FLASH_COLUMNS};

/// Bind parameters each inserted row uses.
const BINDS_PER_ROW: usize = 22;

/// Largest batch whose insert stays under Postgres' 65535 bind parameters.
pub const MAX_BATCH_SIZE: usize = u16::MAX as usize / BINDS_PER_ROW;

/// One CSV line as exported by the news-flash scraper. Columns the export
/// does not carry are simply absent.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NewsFlashRecord {
    id: Option<i64>,
    accident: Option<String>,
    author: Option<String>,
    date: Option<String>,
    description: Option<String>,
    lat: Option<f64>,
    link: Option<String>,
    lon: Option<f64>,
    road1: Option<f64>,
    road2: Option<f64>,
    resolution: Option<String>,
    title: Option<String>,
    source: Option<String>,
    location: Option<String>,
    tweet_id: Option<i64>,
    region_hebrew: Option<String>,
    district_hebrew: Option<String>,
    yishuv_name: Option<String>,
    street1_hebrew: Option<String>,
    street2_hebrew: Option<String>,
    non_urban_intersection_hebrew: Option<String>,
    road_segment_name: Option<String>,
}

fn float_or_missing(value: Option<f64>) -> Option<f64> {
    Some(value.filter(|v| v.is_finite()).unwrap_or(MISSING_NUMERIC as f64))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "1.0" => Some(true),
        "false" | "0" | "0.0" => Some(false),
        _ => None,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<NewsFlashRecord> for NewsFlash {
    fn from(r: NewsFlashRecord) -> Self {
        NewsFlash {
            id: r.id.unwrap_or(MISSING_NUMERIC),
            accident: r.accident.as_deref().and_then(parse_flag),
            author: non_blank(r.author),
            date: r.date.as_deref().and_then(parse_date),
            description: non_blank(r.description),
            lat: float_or_missing(r.lat),
            link: non_blank(r.link),
            lon: float_or_missing(r.lon),
            road1: float_or_missing(r.road1),
            road2: float_or_missing(r.road2),
            resolution: non_blank(r.resolution),
            title: non_blank(r.title),
            source: non_blank(r.source),
            location: non_blank(r.location),
            tweet_id: Some(r.tweet_id.unwrap_or(MISSING_NUMERIC)),
            region_hebrew: non_blank(r.region_hebrew),
            district_hebrew: non_blank(r.district_hebrew),
            yishuv_name: non_blank(r.yishuv_name),
            street1_hebrew: non_blank(r.street1_hebrew),
            street2_hebrew: non_blank(r.street2_hebrew),
            non_urban_intersection_hebrew: non_blank(r.non_urban_intersection_hebrew),
            road_segment_name: non_blank(r.road_segment_name),
        }
    }
}

/// Lazily decodes news-flash rows from any CSV source with a header line.
pub fn read_news_flash<R: Read>(source: R) -> impl Iterator<Item = Result<NewsFlash, csv::Error>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(source)
        .into_deserialize::<NewsFlashRecord>()
        .map(|row| row.map(NewsFlash::from))
}

/// Pulls up to `size` rows; an empty batch means the source is exhausted.
pub fn next_batch<I>(rows: &mut I, size: usize) -> Result<Vec<NewsFlash>, csv::Error>
where
    I: Iterator<Item = Result<NewsFlash, csv::Error>>,
{
    rows.by_ref().take(size).collect()
}

/// Inserts `batch` inside a single transaction.
///
/// # Returns
///
/// * `Ok(u64)` - Number of rows written.
/// * `Err` - If the insert or the commit fails; nothing of this batch is kept.
pub async fn insert_batch(pool: &PgPool, batch: &[NewsFlash]) -> Result<u64, ApiError> {
    if batch.is_empty() {
        return Ok(0);
    }

    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("INSERT INTO news_flash.news_flash ({NEWS_FLASH_COLUMNS}) "));
    qb.push_values(batch, |mut row, item| {
        row.push_bind(item.id)
            .push_bind(item.accident)
            .push_bind(item.author.clone())
            .push_bind(item.date)
            .push_bind(item.description.clone())
            .push_bind(item.lat)
            .push_bind(item.link.clone())
            .push_bind(item.lon)
            .push_bind(item.road1)
            .push_bind(item.road2)
            .push_bind(item.resolution.clone())
            .push_bind(item.title.clone())
            .push_bind(item.source.clone())
            .push_bind(item.location.clone())
            .push_bind(item.tweet_id)
            .push_bind(item.region_hebrew.clone())
            .push_bind(item.district_hebrew.clone())
            .push_bind(item.yishuv_name.clone())
            .push_bind(item.street1_hebrew.clone())
            .push_bind(item.street2_hebrew.clone())
            .push_bind(item.non_urban_intersection_hebrew.clone())
            .push_bind(item.road_segment_name.clone());
    });

    let mut tx = pool.begin().await?;
    let written = qb.build().execute(&mut *tx).await?.rows_affected();
    tx.commit().await?;

    NEWS_FLASH_ROWS_COUNTER.inc_by(written);
    Ok(written)
}

/// Imports the CSV file at `path` into `news_flash.news_flash`.
///
/// Rows are committed `batch_size` at a time. Returns the number of rows
/// written.
pub async fn import_news_flash(
    pool: &PgPool,
    path: &Path,
    batch_size: usize,
) -> Result<u64, ApiError> {
    let started = Instant::now();
    let label = path.display().to_string();
    let file = File::open(path)?;
    let mut rows = read_news_flash(file);

    let mut total = 0_u64;
    let mut batches = 0_u64;
    loop {
        let batch = next_batch(&mut rows, batch_size.clamp(1, MAX_BATCH_SIZE))
            .map_err(|e| ApiError::Csv(label.clone(), e))?;
        if batch.is_empty() {
            break;
        }
        let written = insert_batch(pool, &batch).await?;
        total += written;
        batches += 1;
        debug!(file = %label, batch = batches, rows = written, "Committed news-flash batch");
    }

    info!(
        file = %label,
        rows = total,
        batches = batches,
        duration_s = started.elapsed().as_secs_f64(),
        "News-flash import complete"
    );
    Ok(total)
}
