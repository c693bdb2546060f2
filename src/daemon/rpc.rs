//! HTTP/JSON client for daemon admin endpoints

use super::{BrickOpRequest, BrickOpResponse, DaemonRpc};
use crate::common::Result;
use async_trait::async_trait;
use std::time::Duration;

pub struct HttpDaemonClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDaemonClient {
    /// `addr` is `host:port`; `timeout` bounds connect and call
    pub fn new(addr: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: format!("http://{}", addr),
        })
    }
}

#[async_trait]
impl DaemonRpc for HttpDaemonClient {
    async fn call(&self, method: &str, req: &BrickOpRequest) -> Result<BrickOpResponse> {
        let url = format!("{}/rpc/{}", self.base_url, method);
        let response = self.client.post(&url).json(req).send().await?;
        if !response.status().is_success() {
            return Err(crate::Error::Rpc(format!(
                "{} returned {}",
                method,
                response.status()
            )));
        }
        Ok(response.json::<BrickOpResponse>().await?)
    }
}
