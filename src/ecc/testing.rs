//! Canned-reply ECC client for the test suites
use super::client::{EccClient, EccClientFactory, EccOperationResponse, EccStatusResponse};
use super::error::EccError;
use super::operation::EccOperation;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// What a fake client was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum FakeCall {
    GetState,
    GetConfigIds,
    Transition {
        op: EccOperation,
        config_xml: String,
        datalink_xml: String,
    },
}

/// An EccClient that replays configured replies and records every call
#[derive(Default)]
pub struct FakeEccClient {
    pub status: Mutex<EccStatusResponse>,
    pub configs: Mutex<EccOperationResponse>,
    pub transition_reply: Mutex<EccOperationResponse>,
    /// When set, every call sleeps this long before answering; pairs with
    /// paused tokio time in deadline tests
    pub delay: Mutex<Option<Duration>>,
    /// When set, the next call fails with this error instead of replying
    pub fail_next: Mutex<Option<EccError>>,
    pub calls: Mutex<Vec<FakeCall>>,
}

impl FakeEccClient {
    pub fn with_status(state: i32, transition: i32) -> Arc<Self> {
        let fake = Self::default();
        *fake.status.lock() = EccStatusResponse {
            error_code: 0,
            error_message: String::new(),
            state,
            transition,
        };
        Arc::new(fake)
    }

    pub fn with_config_list(list_xml: &str) -> Arc<Self> {
        let fake = Self::default();
        *fake.configs.lock() = EccOperationResponse {
            error_code: 0,
            error_message: String::new(),
            text: list_xml.to_string(),
        };
        Arc::new(fake)
    }

    async fn before_reply(&self) -> Result<(), EccError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl EccClient for FakeEccClient {
    async fn get_state(&self) -> Result<EccStatusResponse, EccError> {
        self.calls.lock().push(FakeCall::GetState);
        self.before_reply().await?;
        Ok(self.status.lock().clone())
    }

    async fn get_config_ids(&self) -> Result<EccOperationResponse, EccError> {
        self.calls.lock().push(FakeCall::GetConfigIds);
        self.before_reply().await?;
        Ok(self.configs.lock().clone())
    }

    async fn transition(
        &self,
        op: EccOperation,
        config_xml: &str,
        datalink_xml: &str,
    ) -> Result<EccOperationResponse, EccError> {
        self.calls.lock().push(FakeCall::Transition {
            op,
            config_xml: config_xml.to_string(),
            datalink_xml: datalink_xml.to_string(),
        });
        self.before_reply().await?;
        Ok(self.transition_reply.lock().clone())
    }
}

/// Hands the same fake client to every endpoint and records the URLs
/// that were requested
#[derive(Default)]
pub struct FakeClientFactory {
    pub client: Arc<FakeEccClient>,
    pub urls: Mutex<Vec<String>>,
}

impl FakeClientFactory {
    pub fn wrapping(client: Arc<FakeEccClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            urls: Mutex::new(Vec::new()),
        })
    }
}

impl EccClientFactory for FakeClientFactory {
    fn client(&self, url: &str) -> Result<Arc<dyn EccClient>, EccError> {
        self.urls.lock().push(url.to_string());
        Ok(self.client.clone())
    }
}
