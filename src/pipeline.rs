//! Per-source ingestion pipeline (C3): fetch-with-retry → parse → validate
//! → emit raw + dead-letter rows, per spec §4.3.

use crate::config::SourceConfig;
use crate::errors::{Result, SeismotailError};
use crate::models::{
    self, NormalizedEvent, Source, PARSE_FAILURE_EXCERPT_LIMIT, VALIDATION_FAILURE_EXCERPT_LIMIT,
};
use crate::parsers::parser_for;
use crate::store::{AuditSink, DeadLetterSink, DeadLetterRow, PipelineRunAudit, RawEventSink};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Fixed ingestion lookback window (spec §4.3 step 2).
const WINDOW_MINUTES: i64 = 10;

/// Report echoed by `run_source_pipeline` and serialized as the
/// `POST /ingest` response body (spec §3.6).
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub source: Source,
    pub raw_events: usize,
    pub dead_letters: usize,
    pub duration_s: f64,
}

fn generate_run_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Fetch the source's feed with retry/backoff, per spec §4.3 steps 4-6.
async fn fetch_with_retry(client: &Client, config: &SourceConfig, window_end: DateTime<Utc>) -> Result<String> {
    let window_start = window_end - ChronoDuration::minutes(WINDOW_MINUTES);
    let time_fmt = "%Y-%m-%dT%H:%M:%S";

    let mut last_error: Option<SeismotailError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_base.powi(attempt as i32);
            tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
        }

        let result = client
            .get(&config.base_url)
            .query(&[
                ("format", config.format.as_str()),
                ("starttime", &window_start.format(time_fmt).to_string()),
                ("endtime", &window_end.format(time_fmt).to_string()),
                ("minmagnitude", "0.0"),
                ("orderby", "time"),
            ])
            .timeout(config.timeout)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                if status.as_u16() == 204 {
                    return Ok(String::new());
                }
                if status.is_success() {
                    match response.text().await {
                        Ok(body) => return Ok(body),
                        Err(e) => last_error = Some(SeismotailError::Http(e)),
                    }
                } else {
                    let body = response.text().await.unwrap_or_default();
                    last_error = Some(SeismotailError::Api {
                        status: status.as_u16(),
                        message: body,
                    });
                }
            }
            Err(e) => last_error = Some(SeismotailError::Http(e)),
        }
    }

    Err(SeismotailError::SourceExhausted {
        source: config.source.to_string(),
        attempts: config.max_retries + 1,
        last_error: last_error.map_or_else(|| "unknown error".to_string(), |e| e.to_string()),
    })
}

fn truncate(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

/// Run one ingestion cycle for `source` (spec §4.3).
///
/// # Errors
///
/// Returns an error only for fatal conditions: all fetch attempts
/// exhausted, or an unknown source. Per-payload and per-event malformation
/// are recoverable and surface as dead-letter rows, not an `Err`.
#[instrument(skip(client, raw_sink, dead_letter_sink, audit_sink), fields(source = %source))]
pub async fn run_source_pipeline(
    source: Source,
    client: &Client,
    config: &SourceConfig,
    raw_sink: &Arc<dyn RawEventSink>,
    dead_letter_sink: &Arc<dyn DeadLetterSink>,
    audit_sink: &Arc<dyn AuditSink>,
) -> Result<RunReport> {
    let start = Instant::now();
    let run_id = generate_run_id();
    let window_end = Utc::now();
    let fetched_at = window_end;

    let body = fetch_with_retry(client, config, window_end).await?;

    if body.trim().is_empty() {
        let report = RunReport {
            run_id: run_id.clone(),
            source,
            raw_events: 0,
            dead_letters: 0,
            duration_s: start.elapsed().as_secs_f64(),
        };
        audit_sink
            .log_pipeline_run(PipelineRunAudit {
                run_id,
                window_end,
                status: "ok".to_string(),
                source_name: source.to_string(),
                raw_count: 0,
                dead_letter_count: 0,
                duration_s: report.duration_s,
            })
            .await?;
        return Ok(report);
    }

    let parser = parser_for(config);
    let mut dead_letters = Vec::new();

    // Spec §4.3 step 9: a parse-wide failure emits a single dead-letter
    // carrying the truncated payload; the run otherwise succeeds with zero
    // accepted events rather than aborting.
    let events: Vec<NormalizedEvent> = match parser.parse(&body, fetched_at) {
        Ok(events) => events,
        Err(parse_error) => {
            warn!("source {source} parse-wide failure: {parse_error}");
            dead_letters.push(DeadLetterRow {
                source,
                source_event_id: String::new(),
                raw_payload: truncate(&body, PARSE_FAILURE_EXCERPT_LIMIT),
                errors: vec![parse_error],
            });
            Vec::new()
        }
    };

    let mut accepted = Vec::with_capacity(events.len());
    for event in events {
        let errors = models::validate(&event);
        if errors.is_empty() {
            accepted.push(event);
        } else {
            dead_letters.push(DeadLetterRow {
                source: event.source,
                source_event_id: event.source_event_id.clone(),
                raw_payload: event
                    .raw_payload
                    .as_deref()
                    .map(|p| truncate(p, VALIDATION_FAILURE_EXCERPT_LIMIT))
                    .unwrap_or_default(),
                errors,
            });
        }
    }

    let raw_count = raw_sink.insert_raw_events(&accepted).await?;
    if !dead_letters.is_empty() {
        dead_letter_sink.insert_dead_letters(&dead_letters).await?;
    }

    let duration_s = start.elapsed().as_secs_f64();
    info!(
        run_id,
        raw_count,
        dead_letter_count = dead_letters.len(),
        duration_s,
        "ingestion run complete"
    );

    audit_sink
        .log_pipeline_run(PipelineRunAudit {
            run_id: run_id.clone(),
            window_end,
            status: "ok".to_string(),
            source_name: source.to_string(),
            raw_count,
            dead_letter_count: dead_letters.len(),
            duration_s,
        })
        .await?;

    Ok(RunReport {
        run_id,
        source,
        raw_events: raw_count,
        dead_letters: dead_letters.len(),
        duration_s,
    })
}
