//! Minimal HTTP plumbing for pushing emissions to a dashboard.

mod basic;
mod bearer;
mod client;

pub use basic::BasicClient;
pub use bearer::Bearer;
pub use client::HttpClient;

use anyhow::{Context, Result};
use serde::Serialize;

/// POSTs `body` as JSON to `url`; any non-2xx status is an error.
pub async fn post_json<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    body: &impl Serialize,
) -> Result<()> {
    let mut req = reqwest::Request::new(reqwest::Method::POST, url.parse()?);
    req.headers_mut().insert(
        reqwest::header::CONTENT_TYPE,
        reqwest::header::HeaderValue::from_static("application/json"),
    );
    *req.body_mut() = Some(serde_json::to_vec(body)?.into());

    let resp = client
        .execute(req)
        .await
        .with_context(|| format!("POST {url} failed"))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!("POST {url} returned status {status}: {text}"));
    }

    Ok(())
}
