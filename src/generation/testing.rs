// In-process adapters and a loopback vendor server for tests

use super::{AdapterError, GeneratedImage, GenerationRequest, ImageAdapter, ImageBatch};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Succeed,
    /// Returns this many images regardless of the request
    SucceedWith(usize),
    FailHttp(u16),
    FailTimeout,
    Hang,
}

pub struct ScriptedAdapter {
    id: String,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl ScriptedAdapter {
    pub fn always(id: &str, outcome: Outcome) -> Self {
        Self {
            id: id.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: outcome,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
        }
    }

    /// Plays `script` in order, then keeps returning `then`
    pub fn scripted(id: &str, script: Vec<Outcome>, then: Outcome) -> Self {
        let adapter = Self::always(id, then);
        *adapter.script.lock().unwrap() = script.into();
        adapter
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl ImageAdapter for ScriptedAdapter {
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageBatch, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let count = match outcome {
            Outcome::Succeed => request.num_images as usize,
            Outcome::SucceedWith(n) => n,
            Outcome::FailHttp(status) => {
                return Err(AdapterError::from_status(status, format!("{} error", self.id)))
            }
            Outcome::FailTimeout => return Err(AdapterError::Timeout),
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Err(AdapterError::Timeout);
            }
        };

        Ok(ImageBatch {
            images: (0..count)
                .map(|idx| GeneratedImage {
                    id: format!("{}-img-{}", self.id, idx + 1),
                    url: format!("https://img.test/{}/{}.png", self.id, idx + 1),
                    width: request.width,
                    height: request.height,
                })
                .collect(),
            cost: Some(0.0),
        })
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        match self.fallback {
            Outcome::Succeed | Outcome::SucceedWith(_) => Ok(()),
            _ => Err(AdapterError::Network("unreachable".to_string())),
        }
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Serve `router` on an ephemeral loopback port and return its base URL
pub async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}
