use crate::notify::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderValue};

/// An [`HttpClient`] wrapper that sends `Authorization: Bearer <token>` with
/// every request, for dashboards that sit behind a token.
pub struct Bearer<C> {
    inner: C,
    value: HeaderValue,
}

impl<C> Bearer<C> {
    /// Fails if the token contains bytes not allowed in a header value.
    pub fn new(inner: C, token: &str) -> anyhow::Result<Self> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        value.set_sensitive(true);
        Ok(Self { inner, value })
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for Bearer<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut().insert(AUTHORIZATION, self.value.clone());
        self.inner.execute(req).await
    }
}
