//! Blocking page fetch with a bounded timeout.
//!
//! Uses async reqwest internally with `tokio::time::timeout`, but presents a
//! sync interface for the rayon worker threads.

use std::sync::LazyLock;
use std::time::Duration;

use crate::error::FetchError;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("listharvest/", env!("CARGO_PKG_VERSION"));

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(8)
        .user_agent(USER_AGENT)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// HTTP GET → body text, failing with [`FetchError::Timeout`] once `timeout`
/// elapses (connect + headers + body).
pub fn fetch_text(url: &str, timeout: Duration) -> Result<String, FetchError> {
    SHARED_RUNTIME.handle().block_on(async {
        let request = async {
            let response = SHARED_CLIENT
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(&e))?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::status(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("unexpected status"),
                ));
            }
            response
                .text()
                .await
                .map_err(|e| FetchError::from_reqwest(&e))
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    })
}
