//! Shared utilities for integration tests.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jwt_sign::api::{SignatureService, SigningError};
use jwt_sign::config::AppConfig;
use jwt_sign::lifecycle::{start_with_signer, ShutdownOrchestrator, TaskKind, TaskTracker};

/// Config bound to an ephemeral localhost port with short shutdown bounds.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.development = true;
    config.listener.host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.listener.port = 0;
    config.listener.grace_secs = 5;
    config.shutdown.timeout_secs = Some(10);
    config
}

/// Signer with configurable latency that counts finished onboardings.
#[derive(Clone, Default)]
pub struct ScriptedSigner {
    pub sign_delay: Duration,
    pub onboard_delay: Duration,
    pub onboarded: Arc<AtomicUsize>,
}

impl ScriptedSigner {
    pub fn onboarded(&self) -> usize {
        self.onboarded.load(Ordering::SeqCst)
    }
}

impl SignatureService for ScriptedSigner {
    async fn sign_answers(&self, _: &[String], answers: &[String]) -> Result<String, SigningError> {
        tokio::time::sleep(self.sign_delay).await;
        Ok(format!("signature-{}", answers.join("-")))
    }

    async fn verify(&self, user: &str, signature: &str) -> Result<bool, SigningError> {
        Ok(signature.contains(user))
    }

    fn onboard(
        &self,
        _signature: String,
    ) -> impl Future<Output = Result<(), SigningError>> + Send + 'static {
        let delay = self.onboard_delay;
        let onboarded = self.onboarded.clone();
        async move {
            tokio::time::sleep(delay).await;
            onboarded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

/// Start the full service and return it with its bound address.
pub async fn start_service(
    config: AppConfig,
    signer: ScriptedSigner,
) -> (ShutdownOrchestrator, SocketAddr) {
    let orchestrator = start_with_signer(config, Arc::new(signer))
        .await
        .expect("service should start");
    let addr = orchestrator.local_addr().expect("listener should be bound");
    (orchestrator, addr)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap()
}

/// Body accepted by `/v1/validate-jwt`.
pub fn jwt_body(answer: &str) -> serde_json::Value {
    serde_json::json!({
        "jwt": "header.payload.signature",
        "questions": ["favourite colour"],
        "answers": [answer],
    })
}

/// Wait until `count` tasks of `kind` are registered.
#[allow(dead_code)]
pub async fn wait_for_registered(tracker: &TaskTracker, kind: TaskKind, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while tracker.outstanding().get(kind) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("requests should reach the handler");
}
