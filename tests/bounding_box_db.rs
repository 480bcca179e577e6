//! Marker queries against a live PostGIS database named by `DATABASE_URL`.
//!
//! Every test seeds its own id range inside its own patch of open ocean, so
//! the tests can share one database. Without `DATABASE_URL` they return early.

use std::collections::HashSet;

use chrono::{NaiveDateTime, Timelike};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use accident_map_api::filter::{parse_date, FetchOptions, MarkerFilter, Page, QueryParams};
use accident_map_api::models::{AccidentMarker, MarkerKey};
use accident_map_api::query::{bounding_box_query, AggregateRows, MarkerSet};

const LATITUDE: f64 = -40.0;

async fn database() -> Option<PgPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL is not set; skipping database test");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connect to DATABASE_URL");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    Some(pool)
}

fn at(raw: &str) -> NaiveDateTime {
    parse_date(raw).expect("timestamp")
}

/// A private id range and map cell for one test.
struct Area {
    base: i64,
    longitude: f64,
}

impl Area {
    fn new(slot: i64) -> Self {
        Self {
            base: 9_000_000_000 + slot * 1_000,
            longitude: -150.0 + slot as f64 * 2.0,
        }
    }

    fn id(&self, n: i64) -> i64 {
        self.base + n
    }

    fn key(&self, n: i64, provider_code: i32, accident_year: i32) -> MarkerKey {
        MarkerKey { id: self.id(n), provider_code, accident_year }
    }

    /// January 2019 over this cell, plus `extra` query parameters.
    fn filter(&self, extra: &str) -> MarkerFilter {
        let query = format!(
            "sw_lat={}&sw_lng={}&ne_lat={}&ne_lng={}\
             &start_date=2019-01-01&end_date=2019-02-01{extra}",
            LATITUDE - 0.5,
            self.longitude - 0.5,
            LATITUDE + 0.5,
            self.longitude + 0.5,
        );
        QueryParams::parse(&query).marker_filter().expect("valid filter")
    }

    /// Child rows go with their markers through the cascading keys.
    async fn reset(&self, pool: &PgPool) {
        sqlx::query("DELETE FROM cbs.markers WHERE id BETWEEN $1 AND $2")
            .bind(self.base)
            .bind(self.base + 999)
            .execute(pool)
            .await
            .expect("clear markers");
    }

    async fn marker(&self, pool: &PgPool, key: MarkerKey, created: &str) {
        sqlx::query(
            "INSERT INTO cbs.markers \
             (id, provider_code, accident_year, created, latitude, longitude, geom, \
              location_accuracy, accident_severity) \
             VALUES ($1, $2, $3, $4, $5, $6, ST_SetSRID(ST_MakePoint($6, $5), 4326), 1, 3)",
        )
        .bind(key.id)
        .bind(key.provider_code)
        .bind(key.accident_year)
        .bind(at(created))
        .bind(LATITUDE)
        .bind(self.longitude)
        .execute(pool)
        .await
        .expect("insert marker");
    }

    async fn vehicle(&self, pool: &PgPool, key: MarkerKey, vehicle_type: i32) {
        sqlx::query(
            "INSERT INTO cbs.vehicles (accident_id, provider_code, accident_year, vehicle_type) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(key.id)
        .bind(key.provider_code)
        .bind(key.accident_year)
        .bind(vehicle_type)
        .execute(pool)
        .await
        .expect("insert vehicle");
    }

    async fn involved(&self, pool: &PgPool, key: MarkerKey, age_group: i32) {
        sqlx::query(
            "INSERT INTO cbs.involved (accident_id, provider_code, accident_year, age_group) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(key.id)
        .bind(key.provider_code)
        .bind(key.accident_year)
        .bind(age_group)
        .execute(pool)
        .await
        .expect("insert involved");
    }
}

fn key_of(marker: &AccidentMarker) -> MarkerKey {
    MarkerKey {
        id: marker.id,
        provider_code: marker.provider_code,
        accident_year: marker.accident_year,
    }
}

async fn deferred_rows(pool: &PgPool, set: &MarkerSet) -> Vec<AccidentMarker> {
    match set {
        MarkerSet::Deferred(plan) => plan.fetch_all(pool).await.expect("fetch markers"),
        MarkerSet::Aggregate(_) => panic!("expected a deferred marker set"),
    }
}

fn aggregate(set: MarkerSet) -> AggregateRows {
    match set {
        MarkerSet::Aggregate(rows) => rows,
        MarkerSet::Deferred(_) => panic!("expected an eager marker set"),
    }
}

#[test]
fn eager_fetch_stays_on_the_matched_composite_keys() {
    tokio_test::block_on(async {
        let Some(pool) = database().await else { return };
        let area = Area::new(1);
        area.reset(&pool).await;

        // Ids 1 and 2 recur in another provider or year outside the window.
        area.marker(&pool, area.key(1, 1, 2019), "2019-01-10 08:00:00").await;
        area.marker(&pool, area.key(1, 4, 2018), "2018-05-05 22:00:00").await;
        area.marker(&pool, area.key(2, 1, 2019), "2019-01-12 09:00:00").await;
        area.marker(&pool, area.key(2, 1, 2018), "2018-03-01 10:00:00").await;
        area.marker(&pool, area.key(3, 3, 2019), "2019-01-15 10:00:00").await;
        area.marker(&pool, area.key(4, 4, 2019), "2019-01-20 11:00:00").await;
        area.vehicle(&pool, area.key(1, 1, 2019), 1).await;
        area.vehicle(&pool, area.key(1, 4, 2018), 1).await;
        area.vehicle(&pool, area.key(2, 1, 2018), 1).await;
        area.involved(&pool, area.key(2, 1, 2019), 5).await;
        area.involved(&pool, area.key(2, 1, 2018), 5).await;

        let options = FetchOptions { involved_and_vehicles: true, ..FetchOptions::default() };
        let result = bounding_box_query(&pool, &area.filter(""), &options)
            .await
            .expect("query");
        assert!(result.rsa_markers.is_empty());
        assert_eq!(result.total_records, 3);

        let rows = aggregate(result.accident_markers);
        let keys: HashSet<MarkerKey> = rows.markers.iter().map(key_of).collect();
        let expected: HashSet<MarkerKey> =
            [area.key(1, 1, 2019), area.key(2, 1, 2019), area.key(3, 3, 2019)].into();
        assert_eq!(keys, expected);
        for marker in &rows.markers {
            assert_ne!(marker.provider_code, 4);
            let created = marker.created.expect("created");
            assert!(created >= at("2019-01-01") && created < at("2019-02-01"));
        }

        assert_eq!(rows.vehicles.len(), 1);
        for vehicle in &rows.vehicles {
            let key = MarkerKey {
                id: vehicle.accident_id.expect("accident id"),
                provider_code: vehicle.provider_code.expect("provider"),
                accident_year: vehicle.accident_year.expect("year"),
            };
            assert!(expected.contains(&key));
        }
        assert_eq!(rows.involved.len(), 1);
        assert_eq!(rows.involved[0].accident_year, Some(2019));

        area.reset(&pool).await;
    });
}

#[test]
fn eager_sub_flags_skip_their_collections() {
    tokio_test::block_on(async {
        let Some(pool) = database().await else { return };
        let area = Area::new(2);
        area.reset(&pool).await;

        area.marker(&pool, area.key(1, 1, 2019), "2019-01-10 08:00:00").await;
        area.vehicle(&pool, area.key(1, 1, 2019), 1).await;
        area.involved(&pool, area.key(1, 1, 2019), 3).await;

        let options = FetchOptions {
            involved_and_vehicles: true,
            fetch_markers: false,
            fetch_involved: false,
            ..FetchOptions::default()
        };
        let result = bounding_box_query(&pool, &area.filter(""), &options)
            .await
            .expect("query");
        assert_eq!(result.total_records, 1);
        let rows = aggregate(result.accident_markers);
        assert!(rows.markers.is_empty());
        assert_eq!(rows.vehicles.len(), 1);
        assert!(rows.involved.is_empty());

        area.reset(&pool).await;
    });
}

#[test]
fn totals_add_primary_and_alternate_sets() {
    tokio_test::block_on(async {
        let Some(pool) = database().await else { return };
        let area = Area::new(3);
        area.reset(&pool).await;

        area.marker(&pool, area.key(1, 1, 2019), "2019-01-03 08:00:00").await;
        area.marker(&pool, area.key(2, 3, 2019), "2019-01-04 08:00:00").await;
        area.marker(&pool, area.key(3, 4, 2019), "2019-01-05 08:00:00").await;

        let options = FetchOptions::default();
        let result = bounding_box_query(&pool, &area.filter(""), &options)
            .await
            .expect("query");
        assert_eq!(result.total_records, 3);
        assert_eq!(deferred_rows(&pool, &result.accident_markers).await.len(), 2);
        let rsa = result.rsa_markers.fetch_all(&pool).await.expect("rsa");
        assert_eq!(rsa.len(), 1);
        assert_eq!(rsa[0].provider_code, 4);

        let result = bounding_box_query(&pool, &area.filter("&show_urban=0"), &options)
            .await
            .expect("query");
        assert_eq!(result.total_records, 1);
        assert!(deferred_rows(&pool, &result.accident_markers).await.is_empty());

        area.reset(&pool).await;
    });
}

#[test]
fn pages_concatenate_to_the_unpaged_order() {
    tokio_test::block_on(async {
        let Some(pool) = database().await else { return };
        let area = Area::new(4);
        area.reset(&pool).await;

        for n in 1..=7 {
            // Two pairs share a timestamp so the tie-breakers decide.
            let day = (n + 1) / 2;
            let created = format!("2019-01-{day:02} 12:00:00");
            area.marker(&pool, area.key(n, 1, 2019), &created).await;
        }

        let filter = area.filter("");
        let unpaged = bounding_box_query(&pool, &filter, &FetchOptions::default())
            .await
            .expect("query");
        assert_eq!(unpaged.total_records, 7);
        let all: Vec<MarkerKey> = deferred_rows(&pool, &unpaged.accident_markers)
            .await
            .iter()
            .map(key_of)
            .collect();
        assert_eq!(all.len(), 7);

        let mut concatenated = Vec::new();
        for page in 1..=3 {
            let options = FetchOptions { page: Page::new(page, 3), ..FetchOptions::default() };
            let result = bounding_box_query(&pool, &filter, &options).await.expect("query");
            assert_eq!(result.total_records, 7);
            let rows = deferred_rows(&pool, &result.accident_markers).await;
            assert!(rows.len() <= 3);
            concatenated.extend(rows.iter().map(key_of));
        }
        assert_eq!(concatenated, all);

        area.reset(&pool).await;
    });
}

#[test]
fn daylight_keeps_hours_six_to_seventeen() {
    tokio_test::block_on(async {
        let Some(pool) = database().await else { return };
        let area = Area::new(5);
        area.reset(&pool).await;

        for (n, hour) in [(1, 3), (2, 6), (3, 12), (4, 17), (5, 18), (6, 22)] {
            let created = format!("2019-01-10 {hour:02}:30:00");
            area.marker(&pool, area.key(n, 1, 2019), &created).await;
        }

        let filter = area.filter("&show_time=25");
        let result = bounding_box_query(&pool, &filter, &FetchOptions::default())
            .await
            .expect("query");
        let rows = deferred_rows(&pool, &result.accident_markers).await;
        assert_eq!(rows.len(), 3);
        for marker in &rows {
            let hour = marker.created.expect("created").hour();
            assert!((6..18).contains(&hour), "hour {hour} outside daylight");
        }

        area.reset(&pool).await;
    });
}

#[test]
fn bike_filter_needs_a_bicycle_on_the_same_accident() {
    tokio_test::block_on(async {
        let Some(pool) = database().await else { return };
        let area = Area::new(6);
        area.reset(&pool).await;

        area.marker(&pool, area.key(1, 1, 2019), "2019-01-10 08:00:00").await;
        area.marker(&pool, area.key(2, 1, 2019), "2019-01-11 08:00:00").await;
        area.marker(&pool, area.key(2, 1, 2018), "2018-01-11 08:00:00").await;
        area.marker(&pool, area.key(3, 1, 2019), "2019-01-12 08:00:00").await;
        area.vehicle(&pool, area.key(1, 1, 2019), 15).await;
        area.vehicle(&pool, area.key(2, 1, 2019), 1).await;
        // A bicycle on the same id in another year must not count.
        area.vehicle(&pool, area.key(2, 1, 2018), 15).await;

        let filter = area.filter("&acctype=21");
        let result = bounding_box_query(&pool, &filter, &FetchOptions::default())
            .await
            .expect("query");
        assert_eq!(result.total_records, 1);
        let rows = deferred_rows(&pool, &result.accident_markers).await;
        let keys: Vec<MarkerKey> = rows.iter().map(key_of).collect();
        assert_eq!(keys, vec![area.key(1, 1, 2019)]);

        area.reset(&pool).await;
    });
}
