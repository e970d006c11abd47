// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use reqwest::header;
use snafu::ResultExt;

use crate::{
    config::DownloadConfig,
    error::{DownloadError, NetworkSnafu},
};

/// Build the shared HTTP client from download configuration.
///
/// # Panics
///
/// Panics if the client fails to build (should never happen with a valid
/// config)
#[must_use]
pub fn build_client(config: &DownloadConfig) -> reqwest::Client {
    let connect_timeout: std::time::Duration = config
        .connect_timeout
        .try_into()
        .expect("connect timeout must be non-negative");

    let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);

    if let Some(ref ua) = config.user_agent {
        builder = builder.user_agent(ua);
    }
    if let Some(ref proxy) = config.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy).expect("proxy URL must be valid"));
    }

    builder.build().expect("Failed to build HTTP client")
}

/// Produces configured outbound requests for one URL.
///
/// The builder is cheap to clone (the client is an `Arc` internally), so
/// every chunk task holds its own copy.
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    client:  reqwest::Client,
    url:     String,
    cookies: Option<String>,
    headers: Vec<(String, String)>,
}

impl RequestBuilder {
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>, config: &DownloadConfig) -> Self {
        Self {
            client,
            url: url.into(),
            cookies: config.cookies.clone(),
            headers: config.headers.clone(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str { &self.url }

    /// Issues a GET, restricted to `range` (inclusive byte bounds) when
    /// given.
    pub async fn send(
        &self,
        range: Option<(i64, i64)>,
    ) -> Result<reqwest::Response, DownloadError> {
        let mut request = self.client.get(&self.url);

        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(ref cookies) = self.cookies {
            request = request.header(header::COOKIE, cookies);
        }
        if let Some((from, to)) = range {
            request = request.header(header::RANGE, format!("bytes={from}-{to}"));
        }

        request.send().await.context(NetworkSnafu)
    }
}
