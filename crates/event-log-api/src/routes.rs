//! HTTP routes, §6 "External interfaces" and §4.6 "Event Endpoint".

use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{get, post, web, HttpResponse};
use event_log_db::{store, DbPool};
use event_log_types::StatusChangeEvent;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::consumer::{Consumer, ConsumerResult};
use crate::error::{ApiError, ErrorBody};
use crate::metrics;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(post_events).service(get_events).service(get_metrics);
}

/// Reads one multipart part fully into memory. §4.6's parts are small
/// (an event body and, at most, one payload blob) so buffering is fine.
async fn read_part(mut field: actix_multipart::Field) -> Result<Vec<u8>, actix_web::Error> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    Ok(bytes)
}

#[post("/events")]
pub async fn post_events(
    consumer: web::Data<Arc<Consumer>>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut event_part: Option<Vec<u8>> = None;
    let mut payload_part: Option<Vec<u8>> = None;

    loop {
        let field = match payload.next().await {
            Some(Ok(field)) => field,
            Some(Err(_)) => return Err(ApiError::BadRequest("Not multipart request".to_string())),
            None => break,
        };

        let name = field.name().map(|n| n.to_string()).unwrap_or_default();
        let bytes = read_part(field).await.map_err(|e| ApiError::BadRequest(e.to_string()))?;

        match name.as_str() {
            "event" => event_part = Some(bytes),
            "payload" => payload_part = Some(bytes),
            _ => {}
        }
    }

    let Some(event_bytes) = event_part else {
        metrics::record_ingress_outcome("missing_event_part");
        return Err(ApiError::BadRequest("Missing event part".to_string()));
    };

    let mut event: StatusChangeEvent = serde_json::from_slice(&event_bytes).map_err(|_| {
        metrics::record_ingress_outcome("malformed_event_body");
        ApiError::BadRequest("Malformed event body".to_string())
    })?;

    if let StatusChangeEvent::ToTriplesGenerated { payload: slot, .. } = &mut event {
        if let Some(bytes) = payload_part {
            *slot = bytes;
        }
    }

    match consumer.consume(event).await {
        ConsumerResult::Accepted => {
            metrics::record_ingress_outcome("accepted");
            Ok(HttpResponse::Accepted().finish())
        }
        ConsumerResult::Busy => {
            metrics::record_ingress_outcome("busy");
            Ok(HttpResponse::TooManyRequests().json(ErrorBody::info("Busy")))
        }
        ConsumerResult::UnsupportedEventType => {
            metrics::record_ingress_outcome("unsupported_event_type");
            Ok(HttpResponse::BadRequest().json(ErrorBody::error("Unsupported Event Type")))
        }
        ConsumerResult::BadRequest(reason) => {
            metrics::record_ingress_outcome("bad_request");
            Ok(HttpResponse::BadRequest().json(ErrorBody::error(reason)))
        }
        ConsumerResult::ServiceUnavailable(reason) => {
            metrics::record_ingress_outcome("service_unavailable");
            Ok(HttpResponse::ServiceUnavailable().json(ErrorBody::error(reason)))
        }
        ConsumerResult::SchedulingError => {
            metrics::record_ingress_outcome("scheduling_error");
            Ok(HttpResponse::InternalServerError().json(ErrorBody::error("scheduling error")))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProjectSlugQuery {
    #[serde(rename = "project-slug")]
    project_slug: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessingTimeEntry {
    status: String,
    #[serde(rename = "processingTime")]
    processing_time: i64,
}

#[derive(Debug, Serialize)]
pub struct EventListingEntry {
    id: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(rename = "processingTimes")]
    processing_times: Vec<ProcessingTimeEntry>,
}

#[get("/events")]
pub async fn get_events(
    pool: web::Data<DbPool>,
    query: web::Query<ProjectSlugQuery>,
) -> Result<HttpResponse, ApiError> {
    let pool = pool.get_ref().clone();
    let project_slug = query.project_slug.clone();

    let summaries = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|e| event_log_types::EventLogError::Database {
            message: format!("GET /events: failed to get connection: {e}"),
        })?;
        store::find_events_for_project_slug(&mut conn, &project_slug)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("GET /events task panicked: {e}")))?
    .map_err(ApiError::from)?;

    let entries: Vec<EventListingEntry> = summaries
        .into_iter()
        .map(|summary| EventListingEntry {
            id: summary.id.to_string(),
            status: summary.status.as_str().to_string(),
            message: summary.message,
            processing_times: summary
                .processing_times
                .into_iter()
                .map(|(status, processing_time)| ProcessingTimeEntry {
                    status: status.as_str().to_string(),
                    processing_time,
                })
                .collect(),
        })
        .collect();

    Ok(HttpResponse::Ok().json(entries))
}

#[get("/metrics")]
pub async fn get_metrics() -> HttpResponse {
    match metrics::export_metrics() {
        Ok(body) => HttpResponse::Ok().content_type("text/plain; version=0.0.4; charset=utf-8").body(body),
        Err(e) => HttpResponse::InternalServerError().body(format!("failed to export metrics: {e}")),
    }
}
