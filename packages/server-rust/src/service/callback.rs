//! `reqwest`-backed callback client.

use std::time::Duration;

use async_trait::async_trait;
use restgate_core::{CallbackRegistration, NotificationBatch};

use crate::traits::CallbackClient;

/// Delivers notification batches with `PUT <url>` and the registered headers.
#[derive(Debug, Clone)]
pub struct ReqwestCallbackClient {
    client: reqwest::Client,
}

impl ReqwestCallbackClient {
    /// Builds a client whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be initialised.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackClient for ReqwestCallbackClient {
    async fn deliver(
        &self,
        callback: &CallbackRegistration,
        batch: &NotificationBatch,
    ) -> anyhow::Result<u16> {
        let mut request = self.client.put(&callback.url).json(batch);
        for (name, value) in &callback.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?;
        Ok(response.status().as_u16())
    }
}
