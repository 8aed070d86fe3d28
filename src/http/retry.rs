//! Retry policy for catalog, download and system-image requests.

use reqwest::StatusCode;

/// Maximum number of attempts for a network operation.
pub const MAX_RETRIES: usize = 3;

/// Delay between attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Responses that will not change if the request is repeated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonRetryableError {
    /// HTTP 404 / 410
    NotFound(String),
    /// HTTP 401 / 403
    Forbidden(String),
    /// HTTP 429
    RateLimited(String),
    /// Any other 4xx
    ClientError(String),
}

impl std::fmt::Display for NonRetryableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NonRetryableError::NotFound(msg) => write!(f, "Not found: {}", msg),
            NonRetryableError::Forbidden(msg) => write!(f, "Access forbidden: {}", msg),
            NonRetryableError::RateLimited(msg) => {
                write!(f, "Rate limit exceeded: {}. Try again later.", msg)
            }
            NonRetryableError::ClientError(msg) => write!(f, "Request error: {}", msg),
        }
    }
}

impl std::error::Error for NonRetryableError {}

/// Classifies an HTTP status. `Ok(())` means a retry may succeed.
pub fn classify_status(status: StatusCode, url: &str) -> Result<(), NonRetryableError> {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            Err(NonRetryableError::NotFound(format!("{} ({})", url, status)))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(NonRetryableError::Forbidden(format!("{} ({})", url, status)))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            Err(NonRetryableError::RateLimited(format!("{} ({})", url, status)))
        }
        s if s.is_client_error() => Err(NonRetryableError::ClientError(format!(
            "HTTP {} from {}",
            s.as_u16(),
            url
        ))),
        // 5xx and anything unexpected may be transient
        _ => Ok(()),
    }
}

/// Classifies a reqwest error. Errors without a status (connection resets,
/// timeouts) are retryable.
pub fn classify_error(error: &reqwest::Error) -> Result<(), NonRetryableError> {
    match error.status() {
        Some(status) => {
            let url = error.url().map(|u| u.as_str()).unwrap_or("<unknown>");
            classify_status(status, url)
        }
        None => Ok(()),
    }
}

/// Converts an `error_for_status()` failure into an `anyhow::Error`, replacing
/// it with a [`NonRetryableError`] when retrying is pointless.
pub fn check_retryable(error: reqwest::Error) -> anyhow::Error {
    match classify_error(&error) {
        Ok(()) => anyhow::Error::from(error),
        Err(non_retryable) => anyhow::Error::from(non_retryable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        let url = "http://catalog/details/foo";
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, url),
            Err(NonRetryableError::NotFound(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::GONE, url),
            Err(NonRetryableError::NotFound(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, url),
            Err(NonRetryableError::Forbidden(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, url),
            Err(NonRetryableError::RateLimited(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, url),
            Err(NonRetryableError::ClientError(_))
        ));
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, url).is_ok());
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, url).is_ok());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = NonRetryableError::NotFound("http://x/y (404 Not Found)".to_string());
        assert!(err.to_string().starts_with("Not found"));
        assert!(err.to_string().ends_with("http://x/y (404 Not Found)"));

        let err = NonRetryableError::RateLimited("slow down".to_string());
        assert!(err.to_string().contains("Try again later"));
    }

    #[tokio::test]
    async fn test_check_retryable_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(404)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let response = client.get(server.url()).send().await.unwrap();
        let err = response.error_for_status().unwrap_err();

        let result = check_retryable(err);
        assert!(matches!(
            result.downcast_ref::<NonRetryableError>(),
            Some(NonRetryableError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_check_retryable_server_error_stays_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(503)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let response = client.get(server.url()).send().await.unwrap();
        let err = response.error_for_status().unwrap_err();

        let result = check_retryable(err);
        assert!(result.downcast_ref::<NonRetryableError>().is_none());
    }
}
