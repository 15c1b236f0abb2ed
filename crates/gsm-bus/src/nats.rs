use std::sync::Mutex;
use std::time::Duration;

use async_nats::{Client, Subscriber};
use async_trait::async_trait;
use futures::StreamExt;
use gsm_core::{
    CorrelatedMessage, CorrelationError, ErrorData, InboundRouter, SendOptions, TransportAdapter,
    TransportKind,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::BusError;
use crate::subjects::{
    DEFAULT_PREFIX, broadcast_subject, broadcast_wildcard, request_subject, request_wildcard,
};

const URL_ENV: &str = "NATS_URL";
const PREFIX_ENV: &str = "GSM_SUBJECT_PREFIX";
const REQUEST_TIMEOUT_ENV: &str = "GSM_REQUEST_TIMEOUT_MS";
const UNKNOWN_FIELD: &str = "unknown";

/// Send option overriding the derived request subject.
pub const SUBJECT_OPTION: &str = "subject";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NatsTransportConfig {
    pub url: String,
    pub subject_prefix: String,
    /// Used when a send carries no explicit timeout.
    pub request_timeout: Duration,
}

impl Default for NatsTransportConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".into(),
            subject_prefix: DEFAULT_PREFIX.into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl NatsTransportConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = std::env::var(URL_ENV) {
            if !url.trim().is_empty() {
                cfg.url = url.trim().to_string();
            }
        }
        if let Ok(prefix) = std::env::var(PREFIX_ENV) {
            let prefix = prefix.trim().trim_end_matches('.');
            if !prefix.is_empty() {
                cfg.subject_prefix = prefix.to_string();
            }
        }
        if let Some(ms) = std::env::var(REQUEST_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            cfg.request_timeout = Duration::from_millis(ms.max(1));
        }
        cfg
    }
}

/// Request/reply and broadcast over NATS.
///
/// Without a router the transport is outbound only. With one, [`init`]
/// subscribes to every request and broadcast subject under the prefix and
/// feeds inbound traffic to the router.
///
/// [`init`]: TransportAdapter::init
pub struct NatsTransport {
    client: Client,
    config: NatsTransportConfig,
    router: Option<InboundRouter>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl NatsTransport {
    pub fn new(client: Client, config: NatsTransportConfig) -> Self {
        Self {
            client,
            config,
            router: None,
            loops: Mutex::new(Vec::new()),
        }
    }

    pub async fn connect(config: NatsTransportConfig) -> anyhow::Result<Self> {
        let client = async_nats::connect(config.url.clone()).await?;
        info!(url = %config.url, prefix = %config.subject_prefix, "connected to NATS");
        Ok(Self::new(client, config))
    }

    pub fn with_router(mut self, router: InboundRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn config(&self) -> &NatsTransportConfig {
        &self.config
    }

    async fn subscribe(&self, subject: String) -> Result<Subscriber, BusError> {
        self.client
            .subscribe(subject.clone())
            .await
            .map_err(|err| BusError::Subscribe {
                subject,
                source: anyhow::Error::new(err),
            })
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.loops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }
}

#[async_trait]
impl TransportAdapter for NatsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Nats
    }

    async fn send(
        &self,
        message: CorrelatedMessage,
        options: &SendOptions,
        timeout: Option<Duration>,
    ) -> anyhow::Result<CorrelatedMessage> {
        let subject = match options.get(SUBJECT_OPTION).and_then(Value::as_str) {
            Some(subject) => subject.to_string(),
            None => request_subject(&self.config.subject_prefix, &message.action)?,
        };
        let timeout = timeout.unwrap_or(self.config.request_timeout);
        debug!(
            subject = %subject,
            correlation_id = %message.correlation_id,
            "sending NATS request"
        );

        let reply = tokio::time::timeout(
            timeout,
            self.client.request(subject.clone(), message.to_bytes().into()),
        )
        .await
        .map_err(|_| BusError::Timeout {
            subject: subject.clone(),
            timeout,
        })?
        .map_err(|err| BusError::Request {
            subject: subject.clone(),
            source: anyhow::Error::new(err),
        })?;

        Ok(CorrelatedMessage::parse(&reply.payload)?)
    }

    async fn broadcast(&self, message: CorrelatedMessage) -> anyhow::Result<()> {
        let subject = broadcast_subject(&self.config.subject_prefix, &message.action)?;
        self.client
            .publish(subject.clone(), message.to_bytes().into())
            .await
            .map_err(|err| BusError::Publish {
                subject,
                source: anyhow::Error::new(err),
            })?;
        Ok(())
    }

    async fn init(&self) -> anyhow::Result<()> {
        let Some(router) = self.router.clone() else {
            return Ok(());
        };
        let requests = self
            .subscribe(request_wildcard(&self.config.subject_prefix))
            .await?;
        let broadcasts = self
            .subscribe(broadcast_wildcard(&self.config.subject_prefix))
            .await?;

        self.track(tokio::spawn(serve_requests(
            self.client.clone(),
            requests,
            router.clone(),
        )));
        self.track(tokio::spawn(serve_broadcasts(broadcasts, router)));
        info!(prefix = %self.config.subject_prefix, "NATS receive loops started");
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        let loops: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .loops
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in &loops {
            handle.abort();
        }
        self.client.flush().await?;
        Ok(())
    }
}

async fn serve_requests(client: Client, mut requests: Subscriber, router: InboundRouter) {
    while let Some(msg) = requests.next().await {
        let Some(reply_subject) = msg.reply.clone() else {
            warn!(subject = %msg.subject, "request without reply subject, dropping");
            continue;
        };
        let client = client.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let reply = match router.on_request(&msg.payload).await {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(subject = %msg.subject, error = %err, "rejecting unparseable request");
                    rejection_reply(&msg.payload, err)
                }
            };
            if let Err(err) = client
                .publish(reply_subject.clone(), reply.to_bytes().into())
                .await
            {
                warn!(subject = %reply_subject, error = %err, "failed to publish reply");
            }
        });
    }
    debug!("NATS request subscription closed");
}

/// Error reply for a request the router could not parse. Correlation id and
/// action are salvaged from the raw payload when present.
fn rejection_reply(payload: &[u8], err: CorrelationError) -> CorrelatedMessage {
    let raw: Value = serde_json::from_slice(payload).unwrap_or(Value::Null);
    let field = |name: &str| {
        raw.get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(UNKNOWN_FIELD)
            .to_string()
    };
    CorrelatedMessage::failure(
        field("correlation_id"),
        field("action"),
        TransportKind::Nats.as_str(),
        ErrorData::classify(&anyhow::Error::new(err)),
    )
}

async fn serve_broadcasts(mut broadcasts: Subscriber, router: InboundRouter) {
    while let Some(msg) = broadcasts.next().await {
        let router = router.clone();
        tokio::spawn(async move {
            let _ = router.on_broadcast(&msg.payload).await;
        });
    }
    debug!("NATS broadcast subscription closed");
}
