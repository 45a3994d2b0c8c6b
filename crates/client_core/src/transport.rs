use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use shared::{
    domain::{CounterMode, CounterRange, NodeId, NodeStateEntry, StateKey, StateValue},
    error::ApiError,
    protocol::{
        CounterResponse, TextResponse, TextWriteRequest, WriteResponse, COUNTER_ADVANCE_ROUTE,
        COUNTER_ROUTE, TEXT_ROUTE,
    },
};
use url::Url;

use crate::error::TransportError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Request/response channel to the state store.
#[async_trait]
pub trait StateTransport: Send + Sync {
    async fn get(&self, node_id: &NodeId, state_key: StateKey)
        -> Result<NodeStateEntry, TransportError>;

    /// Returns the version assigned to the write.
    async fn set(&self, node_id: &NodeId, value: &StateValue) -> Result<u64, TransportError>;

    async fn advance_counter(
        &self,
        node_id: &NodeId,
        mode: CounterMode,
        range: Option<CounterRange>,
    ) -> Result<NodeStateEntry, TransportError>;
}

#[derive(Clone)]
pub struct HttpStateTransport {
    http: Client,
    base: Url,
}

impl HttpStateTransport {
    pub fn new(server_url: &str) -> Result<Self, TransportError> {
        let base = Url::parse(server_url.trim_end_matches('/'))
            .map_err(|_| TransportError::InvalidUrl(server_url.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(TransportError::InvalidUrl(server_url.to_string()));
        }
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, route: &str) -> Result<Url, TransportError> {
        self.base
            .join(route)
            .map_err(|_| TransportError::InvalidUrl(format!("{}{route}", self.base)))
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, TransportError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ApiError>().await {
                Ok(body) => body.message,
                Err(_) => status.canonical_reason().unwrap_or("error").to_string(),
            };
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response.json::<T>().await.map_err(TransportError::Decode)
    }
}

#[async_trait]
impl StateTransport for HttpStateTransport {
    async fn get(
        &self,
        node_id: &NodeId,
        state_key: StateKey,
    ) -> Result<NodeStateEntry, TransportError> {
        let (value, version) = match state_key {
            StateKey::Counter => {
                let request = self
                    .http
                    .get(self.endpoint(COUNTER_ROUTE)?)
                    .query(&[("id", node_id.as_str())]);
                let body: CounterResponse = Self::send(request).await?;
                (StateValue::Counter(body.value), body.version)
            }
            StateKey::CacheText => {
                let request = self
                    .http
                    .get(self.endpoint(TEXT_ROUTE)?)
                    .query(&[("id", node_id.as_str())]);
                let body: TextResponse = Self::send(request).await?;
                (StateValue::Text(body.text), body.version)
            }
        };
        Ok(NodeStateEntry {
            node_id: node_id.clone(),
            state_key,
            value,
            version,
        })
    }

    async fn set(&self, node_id: &NodeId, value: &StateValue) -> Result<u64, TransportError> {
        let request = match value {
            StateValue::Counter(counter) => {
                let counter = counter.to_string();
                self.http
                    .post(self.endpoint(COUNTER_ROUTE)?)
                    .query(&[("id", node_id.as_str()), ("value", counter.as_str())])
            }
            StateValue::Text(text) => self
                .http
                .post(self.endpoint(TEXT_ROUTE)?)
                .query(&[("id", node_id.as_str())])
                .json(&TextWriteRequest { text: text.clone() }),
        };
        let body: WriteResponse = Self::send(request).await?;
        if !body.success {
            return Err(TransportError::Status {
                status: 200,
                message: "write was not acknowledged".into(),
            });
        }
        Ok(body.version)
    }

    async fn advance_counter(
        &self,
        node_id: &NodeId,
        mode: CounterMode,
        range: Option<CounterRange>,
    ) -> Result<NodeStateEntry, TransportError> {
        let mut query = vec![
            ("id", node_id.as_str().to_string()),
            ("mode", mode.as_str().to_string()),
        ];
        if let Some(range) = range {
            query.push(("min", range.min().to_string()));
            query.push(("max", range.max().to_string()));
        }
        let request = self
            .http
            .post(self.endpoint(COUNTER_ADVANCE_ROUTE)?)
            .query(&query);
        let body: CounterResponse = Self::send(request).await?;
        Ok(NodeStateEntry {
            node_id: node_id.clone(),
            state_key: StateKey::Counter,
            value: StateValue::Counter(body.value),
            version: body.version,
        })
    }
}
