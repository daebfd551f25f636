use quizpipe_core::{Error, FetchBackend, FetchRequest, FetchResponse, Result};
use std::time::Duration;

pub mod locator;
pub mod payload;
pub mod pipeline;
pub mod render;
pub mod submit;
pub mod table;
pub mod tabular;

/// Bounded text excerpt for diagnostic traces.
pub(crate) fn excerpt(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// HTTP + `data:` URI fetcher backed by reqwest.
///
/// Non-2xx statuses are fetch failures; the caller decides whether that is
/// fatal to the current heuristic branch or to the whole run.
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    client: reqwest::Client,
}

impl LocalFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("quizpipe-local/0.1")
            .redirect(reqwest::redirect::Policy::limited(10))
            // Safety defaults: avoid "hang forever" on DNS/TLS/body stalls.
            // Per-request timeouts (FetchRequest.timeout_ms) can still override.
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Fetch(e.to_string()))?;
        Ok(Self { client })
    }

    /// Decode a `data:` URI locally (no network).
    ///
    /// Base64-flagged payloads are decoded; anything else is taken as literal
    /// bytes. The synthetic filename carries the mime subtype as its
    /// extension so suffix-based asset dispatch still works downstream.
    fn fetch_data_uri(url: &str) -> Result<FetchResponse> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| Error::InvalidUrl("data: URI without a comma".to_string()))?;

        let mime = header.split(';').next().unwrap_or("").trim();
        let bytes = if header
            .split(';')
            .any(|p| p.trim().eq_ignore_ascii_case("base64"))
        {
            payload::decode_base64_bytes(data)
                .ok_or_else(|| Error::Fetch("undecodable base64 data: URI".to_string()))?
        } else {
            data.as_bytes().to_vec()
        };

        let ext = mime
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("bin");
        Ok(FetchResponse {
            url: url.to_string(),
            final_url: url.to_string(),
            status: 200,
            content_type: (!mime.is_empty()).then(|| mime.to_string()),
            filename: Some(format!("downloaded.{ext}")),
            bytes,
            truncated: false,
        })
    }

    fn filename_from_headers(url: &str, content_disposition: Option<&str>) -> Option<String> {
        if let Some(cd) = content_disposition {
            let Ok(re) = regex::Regex::new(r#"filename="?([^";]+)"?"#) else {
                return None;
            };
            if let Some(c) = re.captures(cd) {
                return Some(c[1].trim().to_string());
            }
        }
        let path = url::Url::parse(url).ok()?.path().to_string();
        path.rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    }
}

#[async_trait::async_trait]
impl FetchBackend for LocalFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse> {
        if req.url.starts_with("data:") {
            return Self::fetch_data_uri(&req.url);
        }

        let url = url::Url::parse(&req.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let mut rb = self.client.get(url);
        if let Some(to) = req.timeout() {
            rb = rb.timeout(to);
        }
        let resp = rb.send().await.map_err(|e| Error::Fetch(e.to_string()))?;
        let final_url = resp.url().to_string();
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(Error::Fetch(format!("status {status} for {}", req.url)));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_disposition = resp
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let filename = Self::filename_from_headers(&final_url, content_disposition.as_deref());

        let max_bytes = req.max_bytes.unwrap_or(u64::MAX) as usize;
        let mut truncated = false;
        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Fetch(e.to_string()))?;
            if bytes.len().saturating_add(chunk.len()) > max_bytes {
                let can_take = max_bytes.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..can_take]);
                truncated = true;
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchResponse {
            url: req.url.clone(),
            final_url,
            status,
            content_type,
            filename,
            bytes,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, http::StatusCode, routing::get, Router};
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn fetches_bytes_and_filename_from_content_disposition() {
        let app = Router::new().route(
            "/dl",
            get(|| async {
                (
                    [
                        (header::CONTENT_TYPE, "text/csv"),
                        (
                            header::CONTENT_DISPOSITION,
                            "attachment; filename=\"report.csv\"",
                        ),
                    ],
                    "id,value\n1,10\n",
                )
            }),
        );
        let addr = serve(app).await;

        let fetcher = LocalFetcher::new().unwrap();
        let mut req = FetchRequest::new(format!("http://{addr}/dl"));
        req.timeout_ms = Some(2_000);
        let resp = fetcher.fetch(&req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.filename.as_deref(), Some("report.csv"));
        assert_eq!(resp.text_lossy(), "id,value\n1,10\n");
    }

    #[tokio::test]
    async fn filename_falls_back_to_url_path_tail() {
        let app = Router::new().route("/files/data.csv", get(|| async { "a,b\n1,2\n" }));
        let addr = serve(app).await;

        let fetcher = LocalFetcher::new().unwrap();
        let req = FetchRequest::new(format!("http://{addr}/files/data.csv"));
        let resp = fetcher.fetch(&req).await.unwrap();
        assert_eq!(resp.filename.as_deref(), Some("data.csv"));
    }

    #[tokio::test]
    async fn non_2xx_status_is_a_fetch_error() {
        let app = Router::new().route("/missing", get(|| async { (StatusCode::NOT_FOUND, "nope") }));
        let addr = serve(app).await;

        let fetcher = LocalFetcher::new().unwrap();
        let req = FetchRequest::new(format!("http://{addr}/missing"));
        let err = fetcher.fetch(&req).await.unwrap_err();
        assert!(matches!(err, Error::Fetch(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn max_bytes_truncates_the_body() {
        let app = Router::new().route("/big", get(|| async { "x".repeat(10_000) }));
        let addr = serve(app).await;

        let fetcher = LocalFetcher::new().unwrap();
        let mut req = FetchRequest::new(format!("http://{addr}/big"));
        req.max_bytes = Some(100);
        let resp = fetcher.fetch(&req).await.unwrap();
        assert!(resp.truncated);
        assert_eq!(resp.bytes.len(), 100);
    }

    #[tokio::test]
    async fn decodes_base64_data_uris_without_network() {
        let fetcher = LocalFetcher::new().unwrap();
        // "id,value\n1,5\n" base64-encoded.
        let req = FetchRequest::new("data:text/csv;base64,aWQsdmFsdWUKMSw1Cg==");
        let resp = fetcher.fetch(&req).await.unwrap();
        assert_eq!(resp.text_lossy(), "id,value\n1,5\n");
        assert_eq!(resp.filename.as_deref(), Some("downloaded.csv"));
    }

    #[tokio::test]
    async fn plain_data_uris_are_literal_bytes() {
        let fetcher = LocalFetcher::new().unwrap();
        let req = FetchRequest::new("data:text/plain,hello");
        let resp = fetcher.fetch(&req).await.unwrap();
        assert_eq!(resp.text_lossy(), "hello");
    }
}
