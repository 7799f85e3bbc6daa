//! HTTP binding of the signal transport.
//!
//! `GET {base}/v1/keys/{addr}[/{device}]` fetches pre-key bundles;
//! `PUT {base}/v1/messages/{addr}` submits a ciphertext bundle. Requests
//! carry a bearer token from the configured credential source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use openrelay_wire::addrs::{Address, DeviceId};
use openrelay_wire::keys::PreKeyResponse;
use openrelay_wire::messages::{EncryptedDeviceMessage, OutgoingMessageBundle};

use crate::config::ClientConfig;
use crate::credentials::CredentialSource;
use crate::error::TransportError;

use super::SignalTransport;

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpTransport {
    pub fn new(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn keys_url(&self, addr: &Address, device_id: Option<DeviceId>) -> String {
        match device_id {
            Some(device_id) => format!("{}/v1/keys/{}/{}", self.base_url, addr, device_id),
            None => format!("{}/v1/keys/{}", self.base_url, addr),
        }
    }

    fn messages_url(&self, addr: &Address) -> String {
        format!("{}/v1/messages/{}", self.base_url, addr)
    }

    async fn bearer(&self) -> Result<String, TransportError> {
        self.credentials
            .current()
            .await
            .map_err(|e| TransportError::Credential(e.to_string()))
    }

    /// Map a non-2xx response to a protocol error, keeping the JSON body
    /// when the server sent one.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let code = response.status().as_u16();
        let body = response.json::<serde_json::Value>().await.ok();
        Err(TransportError::Protocol {
            code,
            response: body,
        })
    }
}

fn classify_request_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Network("request timed out".into())
    } else if e.is_connect() {
        TransportError::Network("could not connect to server".into())
    } else {
        TransportError::Network(e.to_string())
    }
}

#[async_trait]
impl SignalTransport for HttpTransport {
    async fn get_keys_for_addr(
        &self,
        addr: &Address,
        device_id: Option<DeviceId>,
    ) -> Result<PreKeyResponse, TransportError> {
        let token = self.bearer().await?;
        let response = self
            .client
            .get(self.keys_url(addr, device_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_request_error)?;
        let response = Self::check(response).await?;
        response
            .json::<PreKeyResponse>()
            .await
            .map_err(|e| TransportError::Network(format!("undecodable key response: {e}")))
    }

    async fn send_messages(
        &self,
        addr: &Address,
        messages: &[EncryptedDeviceMessage],
        timestamp: u64,
    ) -> Result<(), TransportError> {
        let token = self.bearer().await?;
        let bundle = OutgoingMessageBundle {
            messages: messages.to_vec(),
            timestamp,
        };
        let response = self
            .client
            .put(self.messages_url(addr))
            .bearer_auth(token)
            .json(&bundle)
            .send()
            .await
            .map_err(classify_request_error)?;
        Self::check(response).await?;
        Ok(())
    }
}
