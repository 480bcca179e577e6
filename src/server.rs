//! HTTP facade: marker queries, lookups, road segments, news flash, traffic
//! alerts, plus `/metrics` and `/healthz`.
//!
//! Successful responses use the envelope `{"status_code": 200, "data": …}`;
//! failures use `{"status_code": <code>, "error": "…"}`.

use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server};
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::db_utils;
use crate::errors::ApiError;
use crate::filter::QueryParams;
use crate::lookup::LookupTable;
use crate::metrics::{self, HTTP_RESPONSES_COUNTER};
use crate::query::{self, MarkerSet};

const DEFAULT_NEWS_FLASH_LIMIT: i64 = 100;
const MAX_NEWS_FLASH_LIMIT: i64 = 1000;

/// Serves the API on `addr` until Ctrl-C.
pub async fn serve(addr: SocketAddr, pool: PgPool) -> Result<(), ApiError> {
    let make_svc = make_service_fn(move |_conn| {
        let pool = pool.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                handle(pool.clone(), req)
            }))
        }
    });

    info!(%addr, "Starting HTTP server");
    Server::try_bind(&addr)?
        .serve(make_svc)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down HTTP server");
        })
        .await?;
    Ok(())
}

/// Routes one request. Never fails: errors become JSON error responses.
pub async fn handle(pool: PgPool, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let params = QueryParams::parse(req.uri().query().unwrap_or(""));
    drop(req);

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let route = route_label(&segments);
    let response = match dispatch(&pool, &method, &segments, &params).await {
        Ok(response) => response,
        Err(e) => error_response(&e, &method, &path),
    };

    HTTP_RESPONSES_COUNTER
        .with_label_values(&[route, response.status().as_str()])
        .inc();
    Ok(response)
}

fn route_label(segments: &[&str]) -> &'static str {
    match segments {
        ["healthz"] => "healthz",
        ["metrics"] => "metrics",
        ["markers"] => "markers",
        ["markers", _] => "marker",
        ["road_segments", "get_road_segment"] => "road_segments",
        ["lookups"] => "lookup_tables",
        ["lookups", _] => "lookups",
        ["news_flash"] => "news_flash",
        ["waze", "alerts"] => "waze_alerts",
        ["waze", "traffic_jams"] => "waze_traffic_jams",
        _ => "unmatched",
    }
}

async fn dispatch(
    pool: &PgPool,
    method: &Method,
    segments: &[&str],
    params: &QueryParams,
) -> Result<Response<Body>, ApiError> {
    if *method != Method::GET {
        return Err(ApiError::NotFound(format!("no {method} route")));
    }

    match segments {
        ["healthz"] => Ok(Response::new(Body::from("OK"))),
        ["metrics"] => {
            // Prometheus rejects scrapes without the exposition MIME type.
            let encoder = TextEncoder::new();
            Ok(Response::builder()
                .header("Content-Type", encoder.format_type())
                .body(Body::from(metrics::gather_metrics()))?)
        }
        ["markers"] => markers(pool, params).await,
        ["markers", id] => {
            let id: i64 = id
                .parse()
                .map_err(|_| ApiError::InvalidArgument(format!("marker id {id:?}")))?;
            let rows = db_utils::get_marker(pool, id).await?;
            let data: Vec<Value> = rows.iter().map(|m| m.to_json(false)).collect();
            ok(json!(data))
        }
        ["road_segments", "get_road_segment"] => {
            let name = params
                .text("yishuv_name")
                .ok_or_else(|| ApiError::InvalidArgument("missing yishuv_name".into()))?;
            let rows = db_utils::road_segments_by_yishuv(pool, name).await?;
            ok(json!(rows))
        }
        ["lookups"] => {
            let names: Vec<&str> = LookupTable::all().map(|t| t.name()).collect();
            ok(json!(names))
        }
        ["lookups", table] => {
            let table = LookupTable::by_name(table)
                .ok_or_else(|| ApiError::NotFound(format!("lookup table {table:?}")))?;
            let year = params.int("year").and_then(|v| i32::try_from(v).ok());
            let provider = params.int("provider_code").and_then(|v| i32::try_from(v).ok());
            let rows = db_utils::lookup_entries(pool, table, year, provider).await?;
            ok(json!(rows))
        }
        ["news_flash"] => {
            let limit = params
                .int("limit")
                .unwrap_or(DEFAULT_NEWS_FLASH_LIMIT)
                .clamp(1, MAX_NEWS_FLASH_LIMIT);
            let rows = db_utils::latest_news_flash(pool, limit).await?;
            ok(json!(rows))
        }
        ["waze", "alerts"] => {
            let bounds = params.bounding_box()?;
            let (start, end) = params.date_window()?;
            let rows = db_utils::waze_alerts(pool, &bounds, start, end).await?;
            ok(json!(rows))
        }
        ["waze", "traffic_jams"] => {
            let bounds = params.bounding_box()?;
            let (start, end) = params.date_window()?;
            let rows = db_utils::waze_traffic_jams(pool, &bounds, start, end).await?;
            ok(json!(rows))
        }
        _ => Err(ApiError::NotFound(format!("no route for /{}", segments.join("/")))),
    }
}

/// `GET /markers`: bounding-box query over the map viewport.
async fn markers(pool: &PgPool, params: &QueryParams) -> Result<Response<Body>, ApiError> {
    let filter = params.marker_filter()?;
    let options = params.fetch_options();
    let result = query::bounding_box_query(pool, &filter, &options).await?;

    let data = match result.accident_markers {
        MarkerSet::Deferred(plan) => {
            let markers = plan.fetch_all(pool).await?;
            let rsa_markers = result.rsa_markers.fetch_all(pool).await?;
            json!({
                "markers": markers.iter().map(|m| m.to_json(plan.is_thin())).collect::<Vec<_>>(),
                "rsa_markers": rsa_markers.iter().map(|m| m.to_json(false)).collect::<Vec<_>>(),
                "total_records": result.total_records,
            })
        }
        MarkerSet::Aggregate(rows) => json!({
            "markers": rows.markers.iter().map(|m| m.to_json(false)).collect::<Vec<_>>(),
            "vehicles": rows.vehicles,
            "involved": rows.involved,
            "total_records": result.total_records,
        }),
    };
    ok(data)
}

fn ok(data: Value) -> Result<Response<Body>, ApiError> {
    json_response(200, &json!({ "status_code": 200, "data": data }))
}

fn json_response(status: u16, body: &Value) -> Result<Response<Body>, ApiError> {
    let bytes = serde_json::to_vec(body)?;
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(bytes))?)
}

fn error_response(err: &ApiError, method: &Method, path: &str) -> Response<Body> {
    let status = err.status_code();
    let message = if status >= 500 {
        error!(%method, path, error = %err, "Request failed");
        "internal server error".to_string()
    } else {
        warn!(%method, path, error = %err, "Request rejected");
        err.to_string()
    };

    let body = json!({ "status_code": status, "error": message });
    json_response(status, &body).unwrap_or_else(|_| {
        let mut fallback = Response::new(Body::from("internal server error"));
        *fallback.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}
