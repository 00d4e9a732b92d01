//! Notification log listing and bulk actions.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use db::models::{LogFilter, LogStatus, SortOrder};
use engine::log::{LogPage, LogQuery, NotificationLog, RescheduleReport};
use engine::EngineError;

use super::AppState;
use crate::error::{ok, ApiError, Envelope};
use crate::nonce::{verify_manager, ACTION_LOG};

/// Raw query-string filters.  Empty values mean "no filter".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogParams {
    pub post_id: Option<String>,
    pub workflow_id: Option<String>,
    pub event: Option<String>,
    pub channel: Option<String>,
    pub status: Option<String>,
    pub receiver: Option<String>,
    /// `YYYY-MM-DD` or RFC 3339; inclusive.
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub order: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_num<T: std::str::FromStr>(name: &str, value: &Option<String>) -> Result<Option<T>, ApiError> {
    present(value)
        .map(|raw| raw.parse::<T>().map_err(|_| ApiError::BadRequest(format!("invalid {name} '{raw}'"))))
        .transpose()
}

/// Dates without a time cover the whole day.
fn parse_date(name: &str, value: &Option<String>, end_of_day: bool) -> Result<Option<DateTime<Utc>>, ApiError> {
    let Some(raw) = present(value) else {
        return Ok(None);
    };
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("invalid {name} '{raw}'")))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        Some(NaiveTime::MIN)
    };
    Ok(time.map(|t| day.and_time(t).and_utc()))
}

impl LogParams {
    pub fn to_filter(&self) -> Result<LogFilter, ApiError> {
        let status = present(&self.status)
            .map(|raw| raw.parse::<LogStatus>().map_err(ApiError::BadRequest))
            .transpose()?;

        Ok(LogFilter {
            post_id: parse_num("post_id", &self.post_id)?,
            workflow_id: parse_num("workflow_id", &self.workflow_id)?,
            event: present(&self.event).map(str::to_owned),
            channel: present(&self.channel).map(str::to_owned),
            status,
            receiver: present(&self.receiver).map(str::to_owned),
            date_from: parse_date("date_from", &self.date_from, false)?,
            date_to: parse_date("date_to", &self.date_to, true)?,
        })
    }

    pub fn to_query(&self) -> Result<LogQuery, ApiError> {
        let order = match present(&self.order).map(str::to_ascii_lowercase).as_deref() {
            None | Some("desc") => SortOrder::Desc,
            Some("asc") => SortOrder::Asc,
            Some(other) => return Err(ApiError::BadRequest(format!("invalid order '{other}'"))),
        };
        Ok(LogQuery {
            filter: self.to_filter()?,
            order,
            page: parse_num("page", &self.page)?.unwrap_or(1),
            per_page: parse_num("per_page", &self.per_page)?,
        })
    }
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<LogParams>,
    headers: HeaderMap,
) -> Result<Json<Envelope<LogPage>>, ApiError> {
    verify_manager(&state, &headers, ACTION_LOG)?;
    let query = params.to_query()?;
    let page = NotificationLog::new(state.ctx.clone()).list(&query).await?;
    Ok(ok(page))
}

#[derive(Debug, Serialize)]
pub struct DeletedEntry {
    pub id: i64,
}

pub async fn delete(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Envelope<DeletedEntry>>, ApiError> {
    let actor = verify_manager(&state, &headers, ACTION_LOG)?;
    NotificationLog::new(state.ctx.clone()).delete(id).await?;
    info!(log_id = id, actor_id = actor.id, "log entry deleted");
    Ok(ok(DeletedEntry { id }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Delete,
    DeleteAll,
    Reschedule,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub action: BulkAction,
    #[serde(default)]
    pub ids: Vec<i64>,
    /// Used by `delete_all`.
    #[serde(default)]
    pub filter: LogParams,
}

#[derive(Debug, Default, Serialize)]
pub struct BulkOutcome {
    pub deleted: u64,
    /// Ids that did not exist.
    pub missing: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reschedule: Option<RescheduleReport>,
}

pub async fn bulk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BulkRequest>,
) -> Result<Json<Envelope<BulkOutcome>>, ApiError> {
    let actor = verify_manager(&state, &headers, ACTION_LOG)?;
    let log = NotificationLog::new(state.ctx.clone());
    let mut outcome = BulkOutcome::default();

    match request.action {
        BulkAction::Delete => {
            for &id in &request.ids {
                match log.delete(id).await {
                    Ok(()) => outcome.deleted += 1,
                    Err(EngineError::LogEntryNotFound(_)) => outcome.missing.push(id),
                    Err(e) => return Err(e.into()),
                }
            }
        }
        BulkAction::DeleteAll => {
            outcome.deleted = log.delete_all(&request.filter.to_filter()?).await?;
        }
        BulkAction::Reschedule => {
            let report = log.reschedule(&request.ids).await?;
            outcome.missing = report.missing.clone();
            outcome.reschedule = Some(report);
        }
    }

    info!(action = ?request.action, actor_id = actor.id, deleted = outcome.deleted, "bulk log action");
    Ok(ok(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> LogParams {
        let mut p = LogParams::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "post_id" => p.post_id = value,
                "status" => p.status = value,
                "date_from" => p.date_from = value,
                "date_to" => p.date_to = value,
                "order" => p.order = value,
                "page" => p.page = value,
                _ => unreachable!("unknown key {key}"),
            }
        }
        p
    }

    #[test]
    fn empty_values_are_ignored() {
        let query = params(&[("post_id", ""), ("status", " "), ("order", "")]).to_query().unwrap();
        assert_eq!(query.filter, LogFilter::default());
        assert_eq!(query.order, SortOrder::Desc);
        assert_eq!(query.page, 1);
    }

    #[test]
    fn day_ranges_are_inclusive() {
        let filter = params(&[("date_from", "2026-10-01"), ("date_to", "2026-10-02")]).to_filter().unwrap();
        assert_eq!(filter.date_from.unwrap().to_rfc3339(), "2026-10-01T00:00:00+00:00");
        assert_eq!(filter.date_to.unwrap().to_rfc3339(), "2026-10-02T23:59:59+00:00");
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(params(&[("post_id", "ten")]).to_filter().is_err());
        assert!(params(&[("status", "lost")]).to_filter().is_err());
        assert!(params(&[("date_to", "yesterday")]).to_filter().is_err());
        assert!(params(&[("order", "sideways")]).to_query().is_err());
    }

    #[test]
    fn filters_are_parsed() {
        let query = params(&[("post_id", "10"), ("status", "error"), ("order", "ASC"), ("page", "3")])
            .to_query()
            .unwrap();
        assert_eq!(query.filter.post_id, Some(10));
        assert_eq!(query.filter.status, Some(LogStatus::Error));
        assert_eq!(query.order, SortOrder::Asc);
        assert_eq!(query.page, 3);
    }
}
