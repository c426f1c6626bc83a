use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::handshake::SessionKey;
use crate::observability::{HTTP_REQUESTS, HTTP_REQUEST_DURATION, HTTP_REQUEST_ERRORS};

/// Channels requested per directory call.
pub const CHANNEL_PAGE_SIZE: u32 = 100;

/// Messages requested per history page.
pub const MESSAGE_PAGE_SIZE: u32 = 200;

/// Convert a transport-level reqwest failure into our error type.
pub(crate) fn map_request_error(e: reqwest::Error, timeout: Duration) -> Error {
    HTTP_REQUEST_ERRORS.click();
    if e.is_timeout() {
        Error::http_client(
            format!(
                "Request timed out after {}s: {}",
                timeout.as_secs_f64(),
                e
            ),
            Some(Box::new(e)),
        )
    } else if e.is_connect() {
        Error::http_client(format!("Connection error: {}", e), Some(Box::new(e)))
    } else {
        Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
    }
}

/// REST client for the chat backend, authenticated by a session key.
#[derive(Debug, Clone)]
pub struct ChatApi {
    session_key: SessionKey,
    client: ReqwestClient,
    api_url: Url,
    timeout: Duration,
}

impl ChatApi {
    /// Create a new client for the given backend and session key.
    pub fn new(config: &BackendConfig, session_key: SessionKey) -> Result<Self> {
        let api_url = Url::parse(&config.api_url)?;
        if api_url.cannot_be_a_base() {
            return Err(Error::configuration(
                format!("{} cannot be used as a base URL", config.api_url),
                Some("--api-url".to_string()),
            ));
        }
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self {
            session_key,
            client,
            api_url,
            timeout: config.timeout,
        })
    }

    /// The session key this client authenticates with.
    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let key = HeaderValue::from_str(self.session_key.as_str()).map_err(|_| {
            Error::configuration(
                "session key is not a valid header value",
                Some("--key".to_string()),
            )
        })?;
        headers.insert("Session-Key", key);
        Ok(headers)
    }

    /// Build `{api}/v3/group_channels[/<segments>...]`.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| Error::url("API URL cannot be a base", None))?;
            path.pop_if_empty().push("v3").push("group_channels");
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    /// Process a non-success response into an error.
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        #[derive(Deserialize)]
        struct ErrorResponse {
            message: Option<String>,
            code: Option<i64>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };
        let parsed = serde_json::from_str::<ErrorResponse>(&error_body).ok();
        let message = match parsed {
            Some(ErrorResponse {
                message: Some(message),
                code: Some(code),
            }) => format!("{message} (code {code})"),
            Some(ErrorResponse {
                message: Some(message),
                ..
            }) => message,
            _ => error_body,
        };

        match status_code {
            401 => Error::session_expired(message),
            _ => Error::api(status_code, message),
        }
    }

    /// GET `url` and decode the JSON body.
    async fn get_json(&self, url: Url, query: &[(&str, String)]) -> Result<Value> {
        HTTP_REQUESTS.click();
        let start = Instant::now();
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .headers(self.default_headers()?)
            .query(query)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.timeout))?;
        HTTP_REQUEST_DURATION.add(start.elapsed().as_secs_f64());

        if !response.status().is_success() {
            HTTP_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }

        response.json::<Value>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {}", e),
                Some(Box::new(e)),
            )
        })
    }

    /// Fetch one page of raw channel objects.
    pub async fn group_channels(&self) -> Result<Vec<Value>> {
        let url = self.endpoint(&[])?;
        let body = self
            .get_json(url, &[("limit", CHANNEL_PAGE_SIZE.to_string())])
            .await?;
        take_array(body, "channels")
    }

    /// Fetch one page of raw messages created after `message_ts`.
    pub async fn group_channel_messages(
        &self,
        channel_url: &str,
        message_ts: i64,
    ) -> Result<Vec<Value>> {
        let url = self.endpoint(&[channel_url, "messages"])?;
        let query = [
            ("is_sdk", "true".to_string()),
            ("prev_limit", "0".to_string()),
            ("next_limit", MESSAGE_PAGE_SIZE.to_string()),
            ("include", "false".to_string()),
            ("reverse", "false".to_string()),
            ("with_sorted_meta_array", "false".to_string()),
            ("include_reactions", "false".to_string()),
            ("message_ts", message_ts.to_string()),
            ("include_thread_info", "false".to_string()),
            ("include_replies", "false".to_string()),
            ("include_parent_message_text", "false".to_string()),
        ];
        let body = self.get_json(url, &query).await?;
        take_array(body, "messages")
    }
}

/// Pull the named top-level array out of a response body.
fn take_array(mut body: Value, field: &str) -> Result<Vec<Value>> {
    match body.get_mut(field).map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(Error::serialization(
            format!("response has no `{field}` array"),
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api(base: &str) -> ChatApi {
        let config = BackendConfig::new().with_api_url(base);
        ChatApi::new(&config, SessionKey::new("key")).unwrap()
    }

    #[test]
    fn endpoint_paths() {
        let api = api("https://chat.example.com");
        assert_eq!(
            api.endpoint(&[]).unwrap().as_str(),
            "https://chat.example.com/v3/group_channels"
        );
        assert_eq!(
            api.endpoint(&["sendbird_group_channel_1_ab", "messages"])
                .unwrap()
                .as_str(),
            "https://chat.example.com/v3/group_channels/sendbird_group_channel_1_ab/messages"
        );
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let api = api("http://127.0.0.1:8080/proxy/");
        assert_eq!(
            api.endpoint(&[]).unwrap().as_str(),
            "http://127.0.0.1:8080/proxy/v3/group_channels"
        );
    }

    #[test]
    fn rejects_non_base_url() {
        let config = BackendConfig::new().with_api_url("mailto:someone@example.com");
        assert!(ChatApi::new(&config, SessionKey::new("key")).is_err());
    }

    #[test]
    fn take_array_requires_field() {
        let items = take_array(json!({"channels": [1, 2]}), "channels").unwrap();
        assert_eq!(items.len(), 2);
        assert!(take_array(json!({"channels": null}), "channels").is_err());
        assert!(take_array(json!({}), "messages").is_err());
    }
}
