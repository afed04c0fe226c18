use milagro_core::{AppError, AppResult};
use url::Url;

/// Base URL and service key shared by the hosted-backend HTTP adapters.
#[derive(Clone)]
pub struct RemoteEndpoint {
    http_client: reqwest::Client,
    base_url: Url,
    service_key: String,
}

impl RemoteEndpoint {
    /// Parses the backend base URL.
    pub fn new(
        http_client: reqwest::Client,
        base_url: &str,
        service_key: impl Into<String>,
    ) -> AppResult<Self> {
        let base_url = Url::parse(base_url).map_err(|error| {
            AppError::Validation(format!("invalid remote base url '{base_url}': {error}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Validation(format!(
                "remote base url '{base_url}' cannot carry a path"
            )));
        }

        Ok(Self {
            http_client,
            base_url,
            service_key: service_key.into(),
        })
    }

    /// Appends path segments to the base URL, percent-encoding each one.
    #[must_use]
    pub fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Returns a request carrying the service key as both api key and bearer.
    pub fn service_request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, url)
            .header("apikey", self.service_key.as_str())
            .bearer_auth(self.service_key.as_str())
    }

    /// Returns a request that acts on behalf of a signed-in user.
    pub fn user_request(
        &self,
        method: reqwest::Method,
        url: Url,
        access_token: &str,
    ) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, url)
            .header("apikey", self.service_key.as_str())
            .bearer_auth(access_token)
    }
}

/// Sends a request, mapping transport failures and non-success statuses.
pub(crate) async fn send(
    builder: reqwest::RequestBuilder,
    operation: &str,
) -> AppResult<reqwest::Response> {
    let response = builder.send().await.map_err(|error| {
        if error.is_timeout() {
            AppError::Timeout(format!("{operation} timed out: {error}"))
        } else {
            AppError::Unavailable(format!("{operation} transport error: {error}"))
        }
    })?;

    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<response body unavailable>".to_owned());
    Err(AppError::from_remote_status(
        status.as_u16(),
        format!("{operation} failed with status {status}: {}", error_message(&body)),
    ))
}

/// Decodes a JSON success body.
pub(crate) async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation: &str,
) -> AppResult<T> {
    response.json::<T>().await.map_err(|error| {
        AppError::Internal(format!("{operation} returned an unexpected body: {error}"))
    })
}

/// Extracts the human-readable part of an error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["msg", "message", "error_description", "error"]
                .iter()
                .find_map(|key| value.get(key).and_then(serde_json::Value::as_str).map(str::to_owned))
        })
        .unwrap_or_else(|| body.trim().to_owned())
}
