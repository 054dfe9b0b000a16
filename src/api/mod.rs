//! HTTP client for the remote histogram computation service.
//!
//! Wraps the transport with typed failure handling and implements the
//! token polling protocol: submit a request, then drive the returned token
//! to a terminal state with a saturating backoff schedule.

pub mod backoff;

use futures::stream::Stream;
use futures::StreamExt;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::ClientError;
use crate::models::{
    HistogramRequest, HistogramResult, ProcessMetadata, RequestStatus, StatusSnapshot,
    SubmitResponse, Token, TokenStatusResponse,
};
use backoff::BackoffSchedule;

/// Where to obtain an access token when the server rejects ours.
const AUTH_HINT: &str = "https://histea.readthedocs.io/en/latest/authentication.html";

/// Client for the histogram computation API.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct Api {
    http: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
    schedule: BackoffSchedule,
}

impl Api {
    /// Create a client from configuration. The endpoint is normalized to
    /// end with a slash.
    pub fn new(config: &ApiConfig) -> Result<Self, ClientError> {
        let mut endpoint = config.endpoint.clone();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Api {
            http,
            endpoint,
            auth_token: config.auth_token.clone(),
            schedule: BackoffSchedule::from_seconds(&config.ramp_seconds),
        })
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path.trim_start_matches('/'))
    }

    /// Issue one request, retrying exactly once when the transport reports
    /// the benign "connection aborted after accept" race. Every other
    /// failure propagates immediately; in particular submissions are never
    /// blindly retried, since that would create a duplicate job.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ClientError> {
        let url = self.build_url(path);
        let mut builder = self.http.request(method, &url);
        if let Some(ref token) = self.auth_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(json) = body {
            builder = builder.json(json);
        }

        let retry = builder.try_clone();
        let response = match builder.send().await {
            Ok(resp) => resp,
            Err(e) if is_benign_disconnect(&e) => {
                warn!("connection aborted after accept on {}; retrying once", url);
                match retry {
                    Some(b) => b.send().await?,
                    None => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        Self::check_status(response).await
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Auth {
                hint: AUTH_HINT.to_string(),
            });
        }
        let message = response.text().await.unwrap_or_default();
        let body = serde_json::from_str(&message).ok();
        Err(ClientError::Server {
            status: status.as_u16(),
            message,
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self.send(Method::GET, path, None).await?;
        Ok(resp.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ClientError> {
        let resp = self.send(Method::POST, path, Some(body)).await?;
        Ok(resp.json().await?)
    }

    /// List the process tags available on the server.
    pub async fn list_processes(&self) -> Result<Vec<String>, ClientError> {
        self.get_json("processes").await
    }

    /// List the PDF sets available for central value computations.
    pub async fn list_pdfs(&self) -> Result<Vec<String>, ClientError> {
        self.get_json("available_pdfs").await
    }

    /// Fetch the metadata of one process.
    pub async fn process_metadata(&self, process: &str) -> Result<ProcessMetadata, ClientError> {
        self.get_json(&format!("processes/{}", process)).await
    }

    /// Submit one histogram computation and return the assigned token.
    pub async fn submit_histogram(
        &self,
        process: &str,
        request: &HistogramRequest,
    ) -> Result<Token, ClientError> {
        let body = serde_json::to_value(request)?;
        let resp: SubmitResponse = self
            .post_json(&format!("processes/{}/hist", process), &body)
            .await?;
        debug!("submitted histogram request, token {}", resp.token);
        Ok(resp.token)
    }

    /// Check a token once, decoding the result payload when completed.
    ///
    /// The result arrives double-encoded: the status envelope carries a
    /// JSON string that is itself parsed into [`HistogramResult`].
    pub async fn poll_once(&self, token: &Token) -> Result<StatusSnapshot, ClientError> {
        let raw: TokenStatusResponse = self.get_json(&format!("token/{}", token)).await?;
        let result = match (raw.status, raw.result) {
            (RequestStatus::Completed, Some(inner)) => Some(serde_json::from_str(&inner)?),
            _ => None,
        };
        Ok(StatusSnapshot {
            status: raw.status,
            result,
            error_string: raw.error_string,
        })
    }

    /// Observe a token until it reaches a terminal state.
    ///
    /// Yields one snapshot per poll. Between yields the stream sleeps for
    /// the next backoff duration, but only while the status is pending or
    /// running; the terminal snapshot is yielded without a trailing sleep.
    /// All higher-level waiting is built on this stream.
    pub fn observe(
        &self,
        token: Token,
    ) -> impl Stream<Item = Result<StatusSnapshot, ClientError>> {
        struct ObserveState {
            api: Api,
            token: Token,
            schedule: BackoffSchedule,
            sleep: Option<Duration>,
            done: bool,
        }

        let state = ObserveState {
            api: self.clone(),
            token,
            schedule: self.schedule.clone(),
            sleep: None,
            done: false,
        };

        futures::stream::unfold(state, |mut st| async move {
            if st.done {
                return None;
            }
            if let Some(wait) = st.sleep.take() {
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }
            let snapshot = match st.api.poll_once(&st.token).await {
                Ok(s) => s,
                Err(e) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
            };
            if snapshot.status.is_terminal() {
                st.done = true;
            } else {
                st.sleep = st.schedule.next();
            }
            Some((Ok(snapshot), st))
        })
    }

    /// Block until the token completes and return the decoded result.
    ///
    /// Fails with [`ClientError::JobErrored`] when the server reports the
    /// computation itself as failed.
    pub async fn wait_for(&self, token: &Token) -> Result<HistogramResult, ClientError> {
        let stream = self.observe(token.clone());
        futures::pin_mut!(stream);

        while let Some(snapshot) = stream.next().await {
            let snapshot = snapshot?;
            match snapshot.status {
                RequestStatus::Errored => {
                    return Err(ClientError::JobErrored(
                        snapshot
                            .error_string
                            .unwrap_or_else(|| "no error detail reported".to_string()),
                    ));
                }
                RequestStatus::Completed => {
                    return snapshot.result.ok_or_else(|| {
                        ClientError::JobErrored(
                            "completed without a result payload".to_string(),
                        )
                    });
                }
                _ => {}
            }
        }
        Err(ClientError::JobErrored(
            "status stream ended before a terminal state".to_string(),
        ))
    }

    /// Fetch the rendered plot (PNG bytes) of a completed token.
    pub async fn get_plot(&self, token: &Token) -> Result<Vec<u8>, ClientError> {
        let resp = self
            .send(Method::GET, &format!("token/{}/plot", token), None)
            .await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Detect the one transient failure class that is safe to retry: a
/// connection reset reported immediately after the peer accepted the
/// request. Anything else is surfaced to the caller.
fn is_benign_disconnect(error: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = source {
        let text = err.to_string();
        if text.contains("connection closed before message completed")
            || text.contains("Connection aborted")
        {
            return true;
        }
        source = err.source();
    }
    false
}
