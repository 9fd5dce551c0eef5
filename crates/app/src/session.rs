//! The receipt scanning session: one open-to-close cycle that takes an image
//! through crop, binarization and extraction and writes the resulting items to
//! an expense.
//!
//! With [`CommitPolicy::OnProceed`] the items are written when the crop is
//! confirmed, before the preview is shown. Cancelling after that point closes
//! the session but leaves the written items in place.

use std::fmt;

use chrono::{DateTime, Utc};
use divvy_core::{CommitPolicy, ItemTuple, Money, PipelineConfig};
use divvy_ocr::{
    normalize, AcquireError, BinarizedImage, CropRect, CroppedRegion, ExtractionError,
    InvalidRegion, ItemExtractor, PreprocessError, RawImage,
};
use divvy_storage::{
    FailedOp, ItemCollection, ReconcileReport, ReconciliationEngine, ReconciliationFailure,
};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Closed,
    AwaitingFile,
    Cropping,
    /// A commit started and was abandoned before it settled.
    Committing,
    Previewing,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Closed => write!(f, "closed"),
            StageKind::AwaitingFile => write!(f, "awaiting a file"),
            StageKind::Cropping => write!(f, "cropping"),
            StageKind::Committing => write!(f, "committing"),
            StageKind::Previewing => write!(f, "previewing"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Cannot {action} while {stage}")]
    InvalidTransition { action: &'static str, stage: StageKind },
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    #[error(transparent)]
    InvalidRegion(#[from] InvalidRegion),
    #[error("Failed to encode binarized image: {0}")]
    Encode(String),
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("Items were only partly written: {0}")]
    Reconciliation(#[from] ReconciliationFailure),
}

impl From<PreprocessError> for SessionError {
    fn from(e: PreprocessError) -> Self {
        match e {
            PreprocessError::InvalidRegion(r) => SessionError::InvalidRegion(r),
            PreprocessError::Encode(msg) => SessionError::Encode(msg),
        }
    }
}

/// What a commit wrote to the expense.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitSummary {
    pub items: Vec<ItemTuple>,
    pub report: ReconcileReport,
    /// Empty when every write confirmed.
    pub failed: Vec<FailedOp>,
    /// Set when the existing items could not be listed; nothing was written.
    pub listing_error: Option<String>,
    pub committed_at: DateTime<Utc>,
}

impl CommitSummary {
    /// Sum of the extracted prices, whether or not every insert confirmed.
    pub fn total(&self) -> Money {
        self.items.iter().map(|item| item.price).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.listing_error.is_none()
    }
}

/// Session state captured at open and put back when a cycle is abandoned
/// before anything was written.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    last_commit: Option<CommitSummary>,
}

#[derive(Debug)]
enum Commit {
    Applied(CommitSummary),
    /// Held back until finish.
    Staged(Vec<ItemTuple>),
}

#[derive(Debug)]
enum Stage {
    Closed,
    AwaitingFile {
        snapshot: SessionSnapshot,
    },
    Cropping {
        snapshot: SessionSnapshot,
        image: RawImage,
    },
    Committing,
    Previewing {
        snapshot: SessionSnapshot,
        preview: BinarizedImage,
        commit: Commit,
    },
}

impl Stage {
    fn kind(&self) -> StageKind {
        match self {
            Stage::Closed => StageKind::Closed,
            Stage::AwaitingFile { .. } => StageKind::AwaitingFile,
            Stage::Cropping { .. } => StageKind::Cropping,
            Stage::Committing => StageKind::Committing,
            Stage::Previewing { .. } => StageKind::Previewing,
        }
    }
}

/// How a cancel left the expense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancelled {
    /// Nothing had been written; prior session state restored.
    Discarded,
    /// Items were already written and stay written.
    AlreadyCommitted,
}

/// Drives one receipt through the pipeline and owns all in-flight state.
///
/// Every stage-changing call takes `&mut self`, so a session can never have
/// two extractions or commits outstanding at once.
pub struct PipelineController<E, C> {
    extractor: E,
    collection: C,
    config: PipelineConfig,
    stage: Stage,
    last_commit: Option<CommitSummary>,
}

impl<E: ItemExtractor, C: ItemCollection> PipelineController<E, C> {
    pub fn new(extractor: E, collection: C, config: PipelineConfig) -> Self {
        Self {
            extractor,
            collection,
            config,
            stage: Stage::Closed,
            last_commit: None,
        }
    }

    pub fn stage(&self) -> StageKind {
        self.stage.kind()
    }

    pub fn collection(&self) -> &C {
        &self.collection
    }

    /// The most recent commit made through this controller, if any.
    pub fn last_commit(&self) -> Option<&CommitSummary> {
        self.last_commit.as_ref()
    }

    pub fn preview(&self) -> Option<&BinarizedImage> {
        match &self.stage {
            Stage::Previewing { preview, .. } => Some(preview),
            _ => None,
        }
    }

    /// Items shown in the preview, written or staged.
    pub fn previewed_items(&self) -> Option<&[ItemTuple]> {
        match &self.stage {
            Stage::Previewing { commit: Commit::Applied(summary), .. } => Some(&summary.items),
            Stage::Previewing { commit: Commit::Staged(items), .. } => Some(items),
            _ => None,
        }
    }

    pub fn open(&mut self) -> Result<(), SessionError> {
        if !matches!(self.stage, Stage::Closed) {
            return Err(self.invalid("open"));
        }
        let snapshot = SessionSnapshot { last_commit: self.last_commit.clone() };
        self.stage = Stage::AwaitingFile { snapshot };
        tracing::info!("receipt session opened");
        Ok(())
    }

    /// Load the chosen image, replacing any earlier one. `None` means the
    /// picker was cleared: the image is dropped and the session keeps waiting
    /// for a file.
    pub fn select_file(&mut self, bytes: Option<&[u8]>) -> Result<(), SessionError> {
        let snapshot = match &self.stage {
            Stage::AwaitingFile { snapshot } | Stage::Cropping { snapshot, .. } => snapshot.clone(),
            _ => return Err(self.invalid("select a file")),
        };

        match bytes {
            None => {
                self.stage = Stage::AwaitingFile { snapshot };
                tracing::debug!("file selection cleared");
            }
            Some(bytes) => {
                let image = RawImage::decode(bytes)?;
                let (width, height) = image.dimensions();
                tracing::info!(width, height, format = ?image.format(), "receipt image loaded");
                self.stage = Stage::Cropping { snapshot, image };
            }
        }
        Ok(())
    }

    /// Confirm the crop: binarize, extract, and (under `OnProceed`) write the
    /// items, then show the preview.
    ///
    /// `InvalidRegion` and `Extraction` errors leave the session in
    /// `Cropping` with the image intact. A `Reconciliation` error still
    /// moves to `Previewing`, since some writes may have landed.
    pub async fn proceed(&mut self, crop: Option<CropRect>) -> Result<(), SessionError> {
        let region = match &self.stage {
            Stage::Cropping { image, .. } => CroppedRegion::new(image, crop).inspect_err(|e| {
                tracing::warn!(error = %e, "crop rejected");
            })?,
            _ => return Err(self.invalid("proceed")),
        };

        let preview = normalize(&region)?;
        drop(region);
        let png = preview.to_png()?;

        let items = self.extract_items(&png).await.inspect_err(|e| {
            tracing::warn!(error = %e, "extraction failed; back to cropping");
        })?;
        tracing::info!(items = items.len(), threshold = preview.threshold(), "items extracted");

        let snapshot = match std::mem::replace(&mut self.stage, Stage::Committing) {
            Stage::Cropping { snapshot, .. } => snapshot,
            other => {
                self.stage = other;
                return Err(self.invalid("proceed"));
            }
        };

        match self.config.commit {
            CommitPolicy::OnProceed => {
                let (summary, outcome) = self.apply(items).await;
                self.last_commit = Some(summary.clone());
                self.stage = Stage::Previewing { snapshot, preview, commit: Commit::Applied(summary) };
                outcome?;
            }
            CommitPolicy::OnFinish => {
                self.stage = Stage::Previewing { snapshot, preview, commit: Commit::Staged(items) };
            }
        }
        tracing::info!("previewing");
        Ok(())
    }

    /// Accept the preview and close. Writes a staged batch first.
    pub async fn finish(&mut self) -> Result<(), SessionError> {
        match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Previewing { commit: Commit::Applied(_), .. } | Stage::Committing => {}
            Stage::Previewing { commit: Commit::Staged(items), .. } => {
                self.stage = Stage::Committing;
                let (summary, outcome) = self.apply(items).await;
                self.last_commit = Some(summary);
                self.stage = Stage::Closed;
                outcome?;
            }
            other => {
                self.stage = other;
                return Err(self.invalid("finish"));
            }
        }
        tracing::info!("receipt session finished");
        Ok(())
    }

    /// Close the session. Before anything is written this restores the state
    /// captured at open; afterwards it only closes.
    pub fn cancel(&mut self) -> Result<Cancelled, SessionError> {
        let outcome = match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Closed => return Err(self.invalid("cancel")),
            Stage::AwaitingFile { snapshot }
            | Stage::Cropping { snapshot, .. }
            | Stage::Previewing { snapshot, commit: Commit::Staged(_), .. } => {
                self.last_commit = snapshot.last_commit;
                Cancelled::Discarded
            }
            Stage::Previewing { commit: Commit::Applied(_), .. } | Stage::Committing => {
                Cancelled::AlreadyCommitted
            }
        };
        tracing::info!(?outcome, "receipt session cancelled");
        Ok(outcome)
    }

    async fn extract_items(&self, png: &[u8]) -> Result<Vec<ItemTuple>, ExtractionError> {
        match self.config.extraction_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.extractor.extract(png))
                .await
                .map_err(|_| ExtractionError::TimedOut(limit))?,
            None => self.extractor.extract(png).await,
        }
    }

    async fn apply(&self, items: Vec<ItemTuple>) -> (CommitSummary, Result<(), ReconciliationFailure>) {
        let outcome = ReconciliationEngine::reconcile(&self.collection, &items).await;
        let (report, failed, listing_error) = match &outcome {
            Ok(report) => (*report, Vec::new(), None),
            Err(failure @ ReconciliationFailure::List(_)) => {
                (failure.report(), Vec::new(), Some(failure.to_string()))
            }
            Err(failure) => (failure.report(), failure.failed_ops(), None),
        };
        let summary = CommitSummary {
            items,
            report,
            failed,
            listing_error,
            committed_at: Utc::now(),
        };
        (summary, outcome.map(|_| ()))
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition { action, stage: self.stage.kind() }
    }
}
