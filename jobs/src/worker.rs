use crate::queue::InferenceJob;
use graph::{InferenceError, InferenceReport, SimilarityInferenceEngine};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

pub struct Worker {
    receiver: mpsc::Receiver<InferenceJob>,
    inference: Arc<SimilarityInferenceEngine>,
}

impl Worker {
    pub fn new(receiver: mpsc::Receiver<InferenceJob>, inference: Arc<SimilarityInferenceEngine>) -> Self {
        Self {
            receiver,
            inference,
        }
    }

    /// Drains the queue until every sender is dropped. A failed job is logged
    /// and the worker moves on to the next one.
    pub async fn run(mut self) -> usize {
        info!("Worker started");
        let mut processed = 0;
        while let Some(job) = self.receiver.recv().await {
            match self.process(&job).await {
                Ok(report) => info!(
                    ?job,
                    edges_created = report.edges_created,
                    edges_skipped = report.edges_skipped,
                    "Inference job finished"
                ),
                Err(e) => error!(?job, error = %e, "Inference job failed"),
            }
            processed += 1;
        }
        info!(processed, "Worker stopped");
        processed
    }

    async fn process(&self, job: &InferenceJob) -> Result<InferenceReport, InferenceError> {
        match job {
            InferenceJob::AnalyzeNode { node_id } => self.inference.analyze_node_id(node_id).await,
            InferenceJob::AnalyzeDocument { document_id } => {
                self.inference.analyze_document(document_id).await
            }
            InferenceJob::AnalyzeAllDocuments => self.inference.analyze_all_documents().await,
            InferenceJob::ApplyThresholdRules => self.inference.apply_threshold_rules().await,
        }
    }
}
