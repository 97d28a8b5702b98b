//! Google Calendar API v3 client.
//!
//! Implements [`RemoteClient`] over the `events.watch`, `channels.stop` and
//! `events.list` endpoints. Each call is a single HTTP request; paging,
//! retries and token bookkeeping belong to the caller.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use crmsync_core::{Attendee, EventStatus, EventTime, ResponseStatus};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{BoxFuture, ChangePage, RemoteClient, WatchRequest, WatchResponse};
use crate::error::{RemoteError, RemoteResult};
use crate::remote_event::RemoteEvent;

use super::config::GoogleConfig;

const REMOTE_NAME: &str = "google";

/// Google Calendar API client.
#[derive(Debug)]
pub struct GoogleCalendarClient {
    config: GoogleConfig,
    http_client: reqwest::Client,
    access_token: RwLock<String>,
}

impl GoogleCalendarClient {
    /// Creates a client after validating the configuration.
    pub fn new(config: GoogleConfig) -> RemoteResult<Self> {
        config
            .validate()
            .map_err(|e| RemoteError::configuration(e).with_remote(REMOTE_NAME))?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                RemoteError::configuration("failed to create HTTP client")
                    .with_remote(REMOTE_NAME)
                    .with_source(e)
            })?;

        let access_token = RwLock::new(config.access_token.clone());
        Ok(Self {
            config,
            http_client,
            access_token,
        })
    }

    /// Replaces the bearer token (after an out-of-band refresh).
    pub fn set_access_token(&self, token: impl Into<String>) -> RemoteResult<()> {
        let mut guard = self
            .access_token
            .write()
            .map_err(|_| RemoteError::internal("access token lock poisoned"))?;
        *guard = token.into();
        Ok(())
    }

    fn bearer(&self) -> RemoteResult<String> {
        self.access_token
            .read()
            .map(|token| token.clone())
            .map_err(|_| RemoteError::internal("access token lock poisoned"))
    }

    fn events_url(&self, collection_id: &str) -> String {
        self.config.endpoint(&format!(
            "calendars/{}/events",
            urlencoding::encode(collection_id)
        ))
    }

    async fn watch_impl(&self, request: WatchRequest) -> RemoteResult<WatchResponse> {
        let url = format!("{}/watch", self.events_url(&request.collection_id));
        let body = ChannelRequest {
            id: &request.channel_id,
            kind: "web_hook",
            address: &request.address,
            token: request.token.as_deref(),
            params: request.ttl.map(|ttl| ChannelParams {
                ttl: ttl.as_secs().to_string(),
            }),
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(self.bearer()?)
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;
        let response = check_status(response).await?;
        let channel: ChannelResponse = parse_json(response).await?;

        let resource_id = channel
            .resource_id
            .ok_or_else(|| tagged(RemoteError::invalid_response("watch response has no resourceId")))?;
        let expiration = channel
            .expiration
            .as_deref()
            .ok_or_else(|| tagged(RemoteError::invalid_response("watch response has no expiration")))
            .and_then(parse_expiration)?;

        debug!(
            channel_id = %request.channel_id,
            resource_id = %resource_id,
            expiration = %expiration,
            "registered watch channel"
        );
        Ok(WatchResponse {
            resource_id,
            expiration,
        })
    }

    async fn stop_impl(&self, resource_id: &str, channel_id: &str) -> RemoteResult<()> {
        let url = self.config.endpoint("channels/stop");
        let body = StopRequest {
            id: channel_id,
            resource_id,
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(self.bearer()?)
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;
        check_status(response).await?;
        debug!(channel_id, resource_id, "stopped watch channel");
        Ok(())
    }

    async fn list_page(
        &self,
        collection_id: &str,
        mut query: Vec<(&'static str, String)>,
        page_token: Option<&str>,
    ) -> RemoteResult<ChangePage> {
        if let Some(size) = self.config.page_size {
            query.push(("maxResults", size.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .http_client
            .get(self.events_url(collection_id))
            .bearer_auth(self.bearer()?)
            .query(&query)
            .send()
            .await
            .map_err(send_error)?;
        let response = check_status(response).await?;
        let list: EventListResponse = parse_json(response).await?;

        let items: Vec<RemoteEvent> = list.items.into_iter().filter_map(convert_event).collect();
        debug!(
            collection_id,
            items = items.len(),
            has_more = list.next_page_token.is_some(),
            "fetched events page"
        );

        Ok(ChangePage {
            items,
            next_page_token: list.next_page_token,
            next_sync_token: list.next_sync_token,
        })
    }
}

impl RemoteClient for GoogleCalendarClient {
    fn name(&self) -> &str {
        REMOTE_NAME
    }

    fn watch(&self, request: WatchRequest) -> BoxFuture<'_, RemoteResult<WatchResponse>> {
        Box::pin(async move { self.watch_impl(request).await })
    }

    fn stop_channel<'a>(
        &'a self,
        resource_id: &'a str,
        channel_id: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move { self.stop_impl(resource_id, channel_id).await })
    }

    fn list_changes<'a>(
        &'a self,
        collection_id: &'a str,
        sync_token: &'a str,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, RemoteResult<ChangePage>> {
        Box::pin(async move {
            // Deleted events are always included when syncToken is present.
            let query = vec![("syncToken", sync_token.to_string())];
            self.list_page(collection_id, query, page_token).await
        })
    }

    fn list_all<'a>(
        &'a self,
        collection_id: &'a str,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, RemoteResult<ChangePage>> {
        Box::pin(async move {
            let query = vec![("showDeleted", "false".to_string())];
            self.list_page(collection_id, query, page_token).await
        })
    }
}

fn tagged(error: RemoteError) -> RemoteError {
    error.with_remote(REMOTE_NAME)
}

fn send_error(e: reqwest::Error) -> RemoteError {
    let error = if e.is_timeout() {
        RemoteError::network("request timeout")
    } else if e.is_connect() {
        RemoteError::network(format!("connection failed: {}", e))
    } else {
        RemoteError::network(format!("request failed: {}", e))
    };
    tagged(error.with_source(e))
}

/// Passes successful responses through and maps failures to error codes.
async fn check_status(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status, retry_after, &body))
}

/// Maps a non-success status (and its body) to a [`RemoteError`].
pub(crate) fn error_for_status(
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> RemoteError {
    let error = match status {
        StatusCode::GONE => {
            RemoteError::token_expired("sync token is no longer valid, a full sync is required")
        }
        StatusCode::TOO_MANY_REQUESTS => RemoteError::rate_limited(format!(
            "rate limit exceeded{}",
            retry_after
                .map(|s| format!(", retry after {} seconds", s))
                .unwrap_or_default()
        )),
        StatusCode::UNAUTHORIZED => RemoteError::authentication("access token expired or invalid"),
        // Calendar reports quota exhaustion as 403 with a rate limit reason.
        StatusCode::FORBIDDEN if body.contains("RateLimitExceeded") || body.contains("rateLimitExceeded") => {
            RemoteError::rate_limited("quota exceeded")
        }
        StatusCode::FORBIDDEN => RemoteError::authorization("access denied to calendar"),
        StatusCode::NOT_FOUND => RemoteError::not_found(format!("not found: {}", body.trim())),
        StatusCode::BAD_REQUEST => RemoteError::bad_request(format!("bad request: {}", body.trim())),
        _ => RemoteError::server(format!("API error ({}): {}", status, body.trim())),
    };
    tagged(error)
}

async fn parse_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> RemoteResult<T> {
    let body = response
        .text()
        .await
        .map_err(|e| tagged(RemoteError::network(format!("failed to read response: {}", e))))?;
    serde_json::from_str(&body).map_err(|e| {
        tagged(RemoteError::invalid_response(format!(
            "failed to parse response: {}",
            e
        )))
    })
}

/// Channel expirations are epoch milliseconds encoded as a string.
fn parse_expiration(raw: &str) -> RemoteResult<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| tagged(RemoteError::invalid_response(format!("invalid expiration: {raw}"))))
}

/// Converts an API event to a [`RemoteEvent`]; items without an id are dropped.
fn convert_event(event: ApiEvent) -> Option<RemoteEvent> {
    let Some(id) = event.id else {
        warn!("skipping event without id");
        return None;
    };

    let start = event.start.and_then(|t| convert_time(&id, "start", t));
    let end = event.end.and_then(|t| convert_time(&id, "end", t));

    let attendees = event
        .attendees
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| {
            Some(Attendee {
                email: a.email?,
                display_name: a.display_name,
                organizer: a.organizer.unwrap_or(false),
                optional: a.optional.unwrap_or(false),
                response_status: ResponseStatus::from_remote(a.response_status.as_deref()),
            })
        })
        .collect();

    let conference_uri = event
        .conference_data
        .and_then(|cd| cd.entry_points)
        .and_then(|points| {
            points
                .into_iter()
                .find(|ep| ep.entry_point_type == "video")
                .and_then(|ep| ep.uri)
        })
        .or(event.hangout_link);

    let updated = event.updated.as_deref().and_then(|raw| {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| warn!(event_id = %id, "invalid updated timestamp: {}", e))
            .ok()
    });

    Some(RemoteEvent {
        status: EventStatus::from_remote(event.status.as_deref()),
        summary: event.summary,
        description: event.description,
        location: event.location,
        start,
        end,
        attendees,
        html_link: event.html_link,
        conference_uri,
        recurring_event_id: event.recurring_event_id,
        etag: event.etag,
        updated,
        id,
    })
}

fn convert_time(id: &str, which: &str, time: ApiEventTime) -> Option<EventTime> {
    EventTime::parse(time.date_time.as_deref(), time.date.as_deref())
        .map_err(|e| warn!(event_id = %id, "ignoring {} time: {}", which, e))
        .ok()
}

/// Body of `events.watch`.
#[derive(Debug, Serialize)]
struct ChannelRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<ChannelParams>,
}

#[derive(Debug, Serialize)]
struct ChannelParams {
    ttl: String,
}

/// Body of `channels.stop`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopRequest<'a> {
    id: &'a str,
    resource_id: &'a str,
}

/// Response of `events.watch`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResponse {
    resource_id: Option<String>,
    expiration: Option<String>,
}

/// Response from the events.list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
    next_sync_token: Option<String>,
}

/// A single event from the Google Calendar API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    status: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<ApiEventTime>,
    end: Option<ApiEventTime>,
    html_link: Option<String>,
    hangout_link: Option<String>,
    recurring_event_id: Option<String>,
    attendees: Option<Vec<ApiAttendee>>,
    conference_data: Option<ApiConferenceData>,
    etag: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date: Option<String>,
    date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAttendee {
    email: Option<String>,
    display_name: Option<String>,
    organizer: Option<bool>,
    optional: Option<bool>,
    response_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiConferenceData {
    entry_points: Option<Vec<ApiEntryPoint>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEntryPoint {
    entry_point_type: String,
    uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteErrorCode;
    use chrono::TimeZone;

    #[test]
    fn parse_incremental_page_with_cancelled_item() {
        let json = r#"{
            "kind": "calendar#events",
            "items": [
                {
                    "id": "evt1",
                    "status": "confirmed",
                    "summary": "Pipeline review",
                    "updated": "2024-03-14T09:00:00.000Z",
                    "start": { "dateTime": "2024-03-15T10:00:00Z" },
                    "end": { "dateTime": "2024-03-15T11:00:00Z" }
                },
                { "id": "evt2", "status": "cancelled" }
            ],
            "nextSyncToken": "CPDAlvWDx70CEPDAlvWDx70CGAU="
        }"#;

        let response: EventListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.next_sync_token.as_deref(), Some("CPDAlvWDx70CEPDAlvWDx70CGAU="));
        assert!(response.next_page_token.is_none());

        let items: Vec<_> = response.items.into_iter().filter_map(convert_event).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].summary.as_deref(), Some("Pipeline review"));
        assert_eq!(
            items[0].updated,
            Some(Utc.with_ymd_and_hms(2024, 3, 14, 9, 0, 0).unwrap())
        );
        assert!(items[1].is_cancelled());
        assert!(items[1].start.is_none());
    }

    #[test]
    fn convert_maps_conference_and_attendees() {
        let json = r#"{
            "id": "evt3",
            "summary": "Call with Acme",
            "start": { "date": "2024-03-15" },
            "end": { "date": "2024-03-16" },
            "hangoutLink": "https://meet.google.com/aaa-bbbb-ccc",
            "conferenceData": {
                "entryPoints": [
                    { "entryPointType": "phone", "uri": "tel:+1-555-0100" },
                    { "entryPointType": "video", "uri": "https://meet.google.com/xyz-abcd-efg" }
                ]
            },
            "attendees": [
                { "email": "ana@example.com", "responseStatus": "accepted", "organizer": true },
                { "displayName": "No email" }
            ]
        }"#;

        let event: ApiEvent = serde_json::from_str(json).unwrap();
        let converted = convert_event(event).unwrap();
        assert_eq!(
            converted.conference_uri.as_deref(),
            Some("https://meet.google.com/xyz-abcd-efg")
        );
        assert!(converted.start.as_ref().unwrap().is_all_day());
        assert_eq!(converted.attendees.len(), 1);
        assert!(converted.attendees[0].organizer);
        assert_eq!(converted.attendees[0].response_status, ResponseStatus::Accepted);
        assert_eq!(converted.status, EventStatus::Confirmed);
    }

    #[test]
    fn convert_drops_event_without_id() {
        let event: ApiEvent = serde_json::from_str(r#"{ "status": "confirmed" }"#).unwrap();
        assert!(convert_event(event).is_none());
    }

    #[test]
    fn convert_keeps_event_with_bad_time() {
        let json = r#"{ "id": "evt4", "start": { "dateTime": "tomorrow" } }"#;
        let event: ApiEvent = serde_json::from_str(json).unwrap();
        let converted = convert_event(event).unwrap();
        assert!(converted.start.is_none());
    }

    #[test]
    fn watch_body_serialization() {
        let body = ChannelRequest {
            id: "chan-1",
            kind: "web_hook",
            address: "https://crm.example.com/hooks/calendar",
            token: None,
            params: Some(ChannelParams {
                ttl: "3600".to_string(),
            }),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["type"], "web_hook");
        assert_eq!(value["params"]["ttl"], "3600");
        assert!(value.get("token").is_none());

        let stop = serde_json::to_value(StopRequest {
            id: "chan-1",
            resource_id: "res-9",
        })
        .unwrap();
        assert_eq!(stop["resourceId"], "res-9");
    }

    #[test]
    fn watch_response_expiration() {
        let json = r#"{
            "kind": "api#channel",
            "id": "chan-1",
            "resourceId": "o3hgv1538sdjfh",
            "resourceUri": "https://www.googleapis.com/calendar/v3/calendars/primary/events",
            "expiration": "1426325213000"
        }"#;
        let response: ChannelResponse = serde_json::from_str(json).unwrap();
        let expiration = parse_expiration(response.expiration.as_deref().unwrap()).unwrap();
        assert_eq!(expiration.timestamp_millis(), 1_426_325_213_000);
        assert_eq!(response.resource_id.as_deref(), Some("o3hgv1538sdjfh"));
        assert!(parse_expiration("soon").is_err());
    }

    #[test]
    fn status_mapping() {
        let gone = error_for_status(StatusCode::GONE, None, "");
        assert!(gone.is_token_expired());
        assert_eq!(gone.remote(), Some("google"));

        let limited = error_for_status(StatusCode::TOO_MANY_REQUESTS, Some(7), "");
        assert_eq!(limited.code(), RemoteErrorCode::RateLimited);
        assert!(limited.message().contains("7 seconds"));

        let quota = error_for_status(
            StatusCode::FORBIDDEN,
            None,
            r#"{"error":{"errors":[{"reason":"userRateLimitExceeded"}]}}"#,
        );
        assert_eq!(quota.code(), RemoteErrorCode::RateLimited);

        let denied = error_for_status(StatusCode::FORBIDDEN, None, "{}");
        assert_eq!(denied.code(), RemoteErrorCode::AuthorizationFailed);

        let unauthorized = error_for_status(StatusCode::UNAUTHORIZED, None, "");
        assert_eq!(unauthorized.code(), RemoteErrorCode::AuthenticationFailed);

        let server = error_for_status(StatusCode::BAD_GATEWAY, None, "upstream");
        assert_eq!(server.code(), RemoteErrorCode::ServerError);
        assert!(server.is_retryable());

        let bad = error_for_status(StatusCode::BAD_REQUEST, None, "invalid syncToken");
        assert_eq!(bad.code(), RemoteErrorCode::BadRequest);
    }

    #[test]
    fn client_rejects_invalid_config() {
        let err = GoogleCalendarClient::new(GoogleConfig::new("")).unwrap_err();
        assert_eq!(err.code(), RemoteErrorCode::ConfigurationError);
    }

    #[test]
    fn client_token_rotation() {
        let client = GoogleCalendarClient::new(GoogleConfig::new("first")).unwrap();
        assert_eq!(client.bearer().unwrap(), "first");
        client.set_access_token("second").unwrap();
        assert_eq!(client.bearer().unwrap(), "second");
        assert_eq!(client.name(), "google");
    }

    #[test]
    fn events_url_encodes_collection() {
        let client = GoogleCalendarClient::new(GoogleConfig::new("t")).unwrap();
        assert_eq!(
            client.events_url("team@group.calendar.google.com"),
            "https://www.googleapis.com/calendar/v3/calendars/team%40group.calendar.google.com/events"
        );
    }
}
