use crate::fetch::client::HttpClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that injects API key headers into every request.
///
/// Header names and values are validated once, at construction.
pub struct ApiKey<C> {
    inner: C,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl<C> ApiKey<C> {
    /// Supabase expects the anon key both as `apikey` and as a bearer token.
    pub fn supabase(inner: C, key: &str) -> Result<Self> {
        Ok(Self {
            inner,
            headers: vec![
                header_pair("apikey", key)?,
                header_pair("Authorization", &format!("Bearer {key}"))?,
            ],
        })
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .with_context(|| format!("invalid header name '{name}'"))?;
    let mut value = HeaderValue::from_str(value).context("API key is not a valid header value")?;
    value.set_sensitive(true);
    Ok((name, value))
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        for (name, value) in &self.headers {
            req.headers_mut().insert(name.clone(), value.clone());
        }
        self.inner.execute(req).await
    }
}
