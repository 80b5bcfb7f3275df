use std::path::Path;
use std::time::Duration;

use crate::safety::error::SafetyError;

/// Capability over the network: fetch a small resource into memory, or
/// download a large one to disk with byte-count progress reporting.
pub trait RemoteFetch {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, SafetyError>;

    /// Download `url` to `dest`, returning the number of bytes written. A
    /// partial file may be left behind on failure; cleanup is the caller's
    /// responsibility (it owns the destination path).
    fn download(&self, url: &str, dest: &Path) -> Result<u64, SafetyError>;
}

/// Bounded retry with explicit classification of retryable responses, instead
/// of nested error handling at every call site.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Server-side and throttling responses are worth retrying; other client
    /// errors are not going to change.
    pub fn is_retryable_status(status: u16) -> bool {
        status == 429 || status >= 500
    }
}

#[cfg(feature = "http")]
pub use blocking::HttpFetcher;

#[cfg(feature = "http")]
mod blocking {
    use std::fs::File;
    use std::io::{BufWriter, Read, Write};
    use std::path::Path;
    use std::time::Duration;

    use tracing::{info, warn};

    use super::{RemoteFetch, RetryPolicy};
    use crate::safety::error::SafetyError;

    const PROGRESS_LOG_INTERVAL: u64 = 50 * 1024 * 1024;

    /// Blocking reqwest implementation. No total request timeout: region
    /// extracts can take minutes on slow links, only the connect phase is
    /// bounded.
    pub struct HttpFetcher {
        client: reqwest::blocking::Client,
        retry: RetryPolicy,
    }

    impl HttpFetcher {
        pub fn new(retry: RetryPolicy) -> Result<Self, SafetyError> {
            let client = reqwest::blocking::Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| SafetyError::Fetch {
                    url: String::new(),
                    message: e.to_string(),
                })?;
            Ok(HttpFetcher { client, retry })
        }

        /// Issue the request, retrying per policy, and hand the successful
        /// response to `consume`.
        fn get_with_retry<T>(
            &self,
            url: &str,
            mut consume: impl FnMut(reqwest::blocking::Response) -> Result<T, SafetyError>,
        ) -> Result<T, SafetyError> {
            let mut last_error = String::new();
            for attempt in 1..=self.retry.max_attempts {
                if attempt > 1 {
                    warn!(
                        "Retrying {url} (attempt {attempt}/{}): {last_error}",
                        self.retry.max_attempts
                    );
                    std::thread::sleep(self.retry.backoff);
                }
                match self.client.get(url).send() {
                    Ok(response) => {
                        let status = response.status();
                        if status.is_success() {
                            return consume(response);
                        }
                        last_error = format!("server answered {status}");
                        if !RetryPolicy::is_retryable_status(status.as_u16()) {
                            break;
                        }
                    }
                    // connection-level failures are always worth a retry
                    Err(e) => last_error = e.to_string(),
                }
            }
            Err(SafetyError::Fetch {
                url: url.to_string(),
                message: last_error,
            })
        }
    }

    impl RemoteFetch for HttpFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, SafetyError> {
            self.get_with_retry(url, |response| {
                response
                    .bytes()
                    .map(|b| b.to_vec())
                    .map_err(|e| SafetyError::Fetch {
                        url: url.to_string(),
                        message: e.to_string(),
                    })
            })
        }

        fn download(&self, url: &str, dest: &Path) -> Result<u64, SafetyError> {
            self.get_with_retry(url, |mut response| {
                let total = response.content_length();
                let file = File::create(dest).map_err(|e| SafetyError::io(dest, e))?;
                let mut writer = BufWriter::new(file);
                let mut buffer = [0_u8; 64 * 1024];
                let mut written = 0_u64;
                let mut next_report = PROGRESS_LOG_INTERVAL;
                loop {
                    let n = response.read(&mut buffer).map_err(|e| SafetyError::Download {
                        url: url.to_string(),
                        message: e.to_string(),
                    })?;
                    if n == 0 {
                        break;
                    }
                    writer
                        .write_all(&buffer[..n])
                        .map_err(|e| SafetyError::io(dest, e))?;
                    written += n as u64;
                    if written >= next_report {
                        match total {
                            Some(total) => info!(
                                "Progress: {:.1}/{:.1} MB",
                                written as f64 / 1e6,
                                total as f64 / 1e6
                            ),
                            None => info!("Progress: {:.1} MB", written as f64 / 1e6),
                        }
                        next_report += PROGRESS_LOG_INTERVAL;
                    }
                }
                writer.flush().map_err(|e| SafetyError::io(dest, e))?;
                Ok(written)
            })
        }
    }
}
