//! Fixed-order stage composition.
//!
//! Stages run sequentially, each receiving the previous stage's output. A failed
//! stage does not stop the pipeline: later stages continue with the last good
//! document set and the terminal stage is reported as `Fallback`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::stage::{self, Stage, StageContext};
use crate::types::{Document, StageMetrics, StageType};

/// Documents and diagnostics from one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub documents: Vec<Document>,
    /// Furthest stage reached, or `Fallback` once any executed stage failed.
    pub stage: StageType,
    pub metrics: Vec<StageMetrics>,
}

pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages: Vec<_> = self.stages.iter().map(|s| s.stage_type()).collect();
        f.debug_struct("Pipeline").field("stages", &stages).finish()
    }
}

impl Pipeline {
    /// Stages run in the given order.
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stage_types(&self) -> Vec<StageType> {
        self.stages.iter().map(|s| s.stage_type()).collect()
    }

    /// The stage at `position` in run order.
    pub fn stage_at(&self, position: usize) -> Option<StageType> {
        self.stages.get(position).map(|s| s.stage_type())
    }

    /// Run every stage. `seed` is handed to the first stage; an empty seed makes
    /// recall query the vector store.
    ///
    /// Fails only when recall failed (nothing to rank) or when every stage that
    /// executed failed.
    pub async fn run(
        &self,
        query: &str,
        seed: Vec<Document>,
        ctx: &StageContext,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut metrics = Vec::with_capacity(self.stages.len());
        let (documents, stage) = self.run_recorded(query, seed, ctx, &mut metrics).await?;
        Ok(PipelineOutcome {
            documents,
            stage,
            metrics,
        })
    }

    /// Same as [`Pipeline::run`], but each stage's metrics are appended to
    /// `metrics` as soon as the stage returns. A caller that drops the future
    /// early still holds the records of every stage that finished.
    pub async fn run_recorded(
        &self,
        query: &str,
        seed: Vec<Document>,
        ctx: &StageContext,
        metrics: &mut Vec<StageMetrics>,
    ) -> Result<(Vec<Document>, StageType), PipelineError> {
        let mut documents = seed;
        let mut terminal = StageType::Recall;
        let mut executed = 0usize;
        let mut failed = 0usize;
        let mut recall_error = None;

        for stage in &self.stages {
            let stage_type = stage.stage_type();
            let outcome = stage::run(stage.as_ref(), query, documents, ctx).await;
            documents = outcome.documents;

            if outcome.executed {
                executed += 1;
                if outcome.metrics.success {
                    if terminal != StageType::Fallback {
                        terminal = stage_type;
                    }
                } else {
                    failed += 1;
                    terminal = StageType::Fallback;
                    warn!(
                        stage = %stage_type,
                        "Stage failed, continuing with last good documents"
                    );
                    if stage_type == StageType::Recall {
                        recall_error = outcome.metrics.error_message.clone();
                    }
                }
            }
            metrics.push(outcome.metrics);
        }

        if executed > 0 && failed == executed {
            return Err(PipelineError::AllStagesFailed {
                attempted: executed,
            });
        }
        if let Some(message) = recall_error {
            return Err(PipelineError::RecallFailed { message });
        }

        debug!(stage = %terminal, documents = documents.len(), "Pipeline finished");
        Ok((documents, terminal))
    }
}
