use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InferenceJob {
    AnalyzeNode { node_id: String },
    AnalyzeDocument { document_id: String },
    AnalyzeAllDocuments,
    ApplyThresholdRules,
}

#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: InferenceJob) -> anyhow::Result<()>;
}

/// Simple in-memory queue using Tokio channels
#[derive(Clone)]
pub struct ChannelJobQueue {
    sender: mpsc::Sender<InferenceJob>,
}

impl ChannelJobQueue {
    pub fn new(sender: mpsc::Sender<InferenceJob>) -> Self {
        Self { sender }
    }

    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<InferenceJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(sender), receiver)
    }

    /// False once the worker side has gone away.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[async_trait::async_trait]
impl JobQueue for ChannelJobQueue {
    async fn enqueue(&self, job: InferenceJob) -> anyhow::Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|e| anyhow::anyhow!("Queue send error: {}", e))
    }
}
