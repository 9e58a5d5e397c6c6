//! Retrieval and delivery of one content item to one requester.
//!
//! Cache lookup first; on a miss the object is fetched in chunks with bounded
//! retry, delivered with progress reporting and only then written to the
//! cache. Progress messages are always removed at the end.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::chat::{RequesterContext, RequesterId};
use crate::domain::content::{ContentId, OutboundArtifact, RetrievalTarget};
use crate::domain::notice::Notice;
use crate::domain::task::{CancelReason, OperationKind, TaskId, TaskOutcome};
use crate::errors::{FetchError, ProgressError, SessionError};
use crate::ports::{ConnectionSession, DeliveryCache, NoProgress, ObjectFetcher, SessionDirectory};
use crate::progress::{ProgressLabels, ProgressReporter, ProgressSettings};
use crate::tasks::{ScheduleError, TaskHandle, TaskRegistry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineSettings {
    pub fetch_attempts: u32,
    pub fetch_retry_delay: Duration,
    pub progress: ProgressSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch_attempts: 3,
            fetch_retry_delay: Duration::from_secs(5),
            progress: ProgressSettings::default(),
        }
    }
}

/// Why a fetch or delivery stopped short of success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stop {
    Cancelled(CancelReason),
    NotFound,
    Failed,
}

impl From<Stop> for TaskOutcome {
    fn from(stop: Stop) -> Self {
        match stop {
            Stop::Cancelled(reason) => Self::Cancelled(reason),
            Stop::NotFound => Self::NotFound,
            Stop::Failed => Self::Failed,
        }
    }
}

enum AttemptError {
    Stop(Stop),
    Transient(FetchError),
}

impl AttemptError {
    fn cancelled() -> Self {
        Self::Stop(Stop::Cancelled(CancelReason::Requested))
    }
}

pub struct RetrievalPipeline {
    sessions: Arc<dyn SessionDirectory>,
    fetcher: Arc<dyn ObjectFetcher>,
    cache: Arc<dyn DeliveryCache>,
    settings: PipelineSettings,
}

impl RetrievalPipeline {
    pub fn new(
        sessions: Arc<dyn SessionDirectory>,
        fetcher: Arc<dyn ObjectFetcher>,
        cache: Arc<dyn DeliveryCache>,
        settings: PipelineSettings,
    ) -> Self {
        Self { sessions, fetcher, cache, settings }
    }

    pub async fn run(
        &self,
        target: RetrievalTarget,
        context: RequesterContext,
        cancel: CancellationToken,
    ) -> TaskOutcome {
        info!(
            event_name = "tasks.retrieval.started",
            correlation_id = %context.request_id,
            tenant_id = %context.tenant_id,
            requester_id = %context.requester_id,
            content_id = %target.content_id,
            "retrieval started"
        );

        let Some(session) = self.sessions.session(&context.tenant_id) else {
            warn!(
                event_name = "tasks.retrieval.no_session",
                correlation_id = %context.request_id,
                tenant_id = %context.tenant_id,
                content_id = %target.content_id,
                "no live session for tenant; retrieval dropped"
            );
            return TaskOutcome::Failed;
        };

        let outcome = match self.deliver_cached(&session, &target, &context, &cancel).await {
            Some(outcome) => outcome,
            None => self.fetch_and_deliver(&session, &target, &context, &cancel).await,
        };

        self.notify(&session, &target, &context, outcome).await;
        info!(
            event_name = "tasks.retrieval.finished",
            correlation_id = %context.request_id,
            tenant_id = %context.tenant_id,
            requester_id = %context.requester_id,
            content_id = %target.content_id,
            outcome = outcome.as_str(),
            "retrieval finished"
        );
        outcome
    }

    /// Returns `None` when there is no usable cache entry and the caller
    /// should fetch.
    async fn deliver_cached(
        &self,
        session: &Arc<dyn ConnectionSession>,
        target: &RetrievalTarget,
        context: &RequesterContext,
        cancel: &CancellationToken,
    ) -> Option<TaskOutcome> {
        let handle = match self.cache.get(&context.tenant_id, &target.content_id).await {
            Ok(Some(handle)) => handle,
            Ok(None) => return None,
            Err(error) => {
                warn!(
                    event_name = "tasks.cache.lookup_failed",
                    correlation_id = %context.request_id,
                    content_id = %target.content_id,
                    error = %error,
                    "delivery cache lookup failed; fetching instead"
                );
                return None;
            }
        };

        let mut no_progress = NoProgress;
        let delivery = session.deliver(
            &context.chat_id,
            OutboundArtifact::Cached(handle.clone()),
            &mut no_progress,
        );
        match cancel.run_until_cancelled(delivery).await {
            None => Some(TaskOutcome::Cancelled(CancelReason::Requested)),
            Some(Ok(_)) => {
                debug!(
                    event_name = "tasks.cache.hit",
                    correlation_id = %context.request_id,
                    content_id = %target.content_id,
                    handle = %handle.0,
                    "delivered cached artifact"
                );
                Some(TaskOutcome::Delivered { from_cache: true })
            }
            Some(Err(error)) => {
                warn!(
                    event_name = "tasks.cache.delivery_failed",
                    correlation_id = %context.request_id,
                    content_id = %target.content_id,
                    error = %error,
                    "cached artifact could not be delivered; fetching instead"
                );
                None
            }
        }
    }

    async fn fetch_and_deliver(
        &self,
        session: &Arc<dyn ConnectionSession>,
        target: &RetrievalTarget,
        context: &RequesterContext,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        let mut reporter = ProgressReporter::new(
            Arc::clone(session),
            context.chat_id.clone(),
            ProgressLabels::fetching(&target.title),
            self.settings.progress,
        );

        let (outcome, message) =
            match self.fetch_with_retry(target, context, cancel, &mut reporter).await {
                Ok(data) => {
                    let mut uploader = reporter.hand_over(ProgressLabels::uploading(&target.title));
                    let outcome = self
                        .deliver_fresh(session, target, context, cancel, &mut uploader, data)
                        .await;
                    (outcome, uploader.into_message())
                }
                Err(stop) => (stop.into(), reporter.into_message()),
            };

        if let Some(message) = message {
            if let Err(error) = session.delete(std::slice::from_ref(&message)).await {
                debug!(
                    event_name = "tasks.progress.cleanup_failed",
                    correlation_id = %context.request_id,
                    message_id = %message.message_id,
                    error = %error,
                    "could not remove progress message"
                );
            }
        }
        outcome
    }

    async fn fetch_with_retry(
        &self,
        target: &RetrievalTarget,
        context: &RequesterContext,
        cancel: &CancellationToken,
        reporter: &mut ProgressReporter,
    ) -> Result<Bytes, Stop> {
        let attempts = self.settings.fetch_attempts.max(1);
        for attempt in 1..=attempts {
            match reporter.show_banner().await {
                Ok(()) => {}
                Err(ProgressError::LostTarget) => {
                    return Err(Stop::Cancelled(CancelReason::LostTarget));
                }
                Err(error) => {
                    debug!(
                        event_name = "tasks.progress.banner_failed",
                        correlation_id = %context.request_id,
                        error = %error,
                        "banner update failed"
                    );
                }
            }

            let error = match self.fetch_once(target, context, cancel, reporter).await {
                Ok(data) => return Ok(data),
                Err(AttemptError::Stop(stop)) => return Err(stop),
                Err(AttemptError::Transient(error)) => error,
            };

            if attempt == attempts {
                error!(
                    event_name = "tasks.fetch.exhausted",
                    correlation_id = %context.request_id,
                    content_id = %target.content_id,
                    attempts,
                    error = %error,
                    "fetch retries exhausted"
                );
                return Err(Stop::Failed);
            }

            warn!(
                event_name = "tasks.fetch.retrying",
                correlation_id = %context.request_id,
                content_id = %target.content_id,
                attempt,
                error = %error,
                "transient fetch failure; retrying"
            );
            let pause = tokio::time::sleep(self.settings.fetch_retry_delay);
            if cancel.run_until_cancelled(pause).await.is_none() {
                return Err(Stop::Cancelled(CancelReason::Requested));
            }
        }
        Err(Stop::Failed)
    }

    async fn fetch_once(
        &self,
        target: &RetrievalTarget,
        context: &RequesterContext,
        cancel: &CancellationToken,
        reporter: &mut ProgressReporter,
    ) -> Result<Bytes, AttemptError> {
        let opening = self.fetcher.fetch_chunks(&target.content_id);
        let mut chunks = match cancel.run_until_cancelled(opening).await {
            None => return Err(AttemptError::cancelled()),
            Some(Ok(chunks)) => chunks,
            Some(Err(error)) => return Err(classify(error, target, context)),
        };

        let mut buffer = BytesMut::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AttemptError::cancelled()),
                next = chunks.next() => next,
            };
            match next {
                None => break,
                Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                Some(Err(error)) => return Err(classify(error, target, context)),
            }

            match reporter.callback(buffer.len() as u64, target.size_hint).await {
                Ok(()) => {}
                Err(ProgressError::LostTarget) => {
                    return Err(AttemptError::Stop(Stop::Cancelled(CancelReason::LostTarget)));
                }
                Err(error) => {
                    debug!(
                        event_name = "tasks.progress.update_failed",
                        correlation_id = %context.request_id,
                        error = %error,
                        "progress update failed"
                    );
                }
            }
        }

        if buffer.is_empty() {
            return Err(AttemptError::Stop(Stop::NotFound));
        }
        Ok(buffer.freeze())
    }

    async fn deliver_fresh(
        &self,
        session: &Arc<dyn ConnectionSession>,
        target: &RetrievalTarget,
        context: &RequesterContext,
        cancel: &CancellationToken,
        reporter: &mut ProgressReporter,
        data: Bytes,
    ) -> TaskOutcome {
        let artifact = OutboundArtifact::Fresh { filename: target.filename.clone(), data };
        let delivery = session.deliver(&context.chat_id, artifact, reporter);
        let delivered = match cancel.run_until_cancelled(delivery).await {
            None => return TaskOutcome::Cancelled(CancelReason::Requested),
            Some(Ok(delivered)) => delivered,
            Some(Err(SessionError::MessageNotFound))
            | Some(Err(SessionError::Progress(ProgressError::LostTarget))) => {
                return TaskOutcome::Cancelled(CancelReason::LostTarget);
            }
            Some(Err(error)) => {
                error!(
                    event_name = "tasks.delivery.failed",
                    correlation_id = %context.request_id,
                    tenant_id = %context.tenant_id,
                    content_id = %target.content_id,
                    error = %error,
                    "artifact delivery failed"
                );
                return TaskOutcome::Failed;
            }
        };

        if let Err(error) =
            self.cache.put(&context.tenant_id, &target.content_id, &delivered.handle).await
        {
            warn!(
                event_name = "tasks.cache.write_failed",
                correlation_id = %context.request_id,
                content_id = %target.content_id,
                error = %error,
                "delivered artifact could not be cached"
            );
        }
        TaskOutcome::Delivered { from_cache: false }
    }

    async fn notify(
        &self,
        session: &Arc<dyn ConnectionSession>,
        target: &RetrievalTarget,
        context: &RequesterContext,
        outcome: TaskOutcome,
    ) {
        let notice = match outcome {
            TaskOutcome::Delivered { .. } | TaskOutcome::Cancelled(CancelReason::LostTarget) => {
                return;
            }
            TaskOutcome::Failed => Notice::TryLater,
            TaskOutcome::NotFound => Notice::Unavailable { title: target.title.clone() },
            TaskOutcome::Cancelled(CancelReason::Requested) => {
                Notice::Cancelled { title: target.title.clone() }
            }
        };

        if let Err(error) = session.send(&context.chat_id, &notice.text()).await {
            warn!(
                event_name = "tasks.retrieval.notify_failed",
                correlation_id = %context.request_id,
                tenant_id = %context.tenant_id,
                error = %error,
                "could not notify requester"
            );
        }
    }
}

fn classify(
    error: FetchError,
    target: &RetrievalTarget,
    context: &RequesterContext,
) -> AttemptError {
    match error {
        FetchError::Transient(_) => AttemptError::Transient(error),
        FetchError::NotFound => AttemptError::Stop(Stop::NotFound),
        FetchError::Fatal(_) => {
            error!(
                event_name = "tasks.fetch.fatal",
                correlation_id = %context.request_id,
                content_id = %target.content_id,
                error = %error,
                "fetch failed permanently"
            );
            AttemptError::Stop(Stop::Failed)
        }
    }
}

/// Entry point used by inbound handlers: deduplicates and schedules retrieval
/// pipelines into the task registry.
#[derive(Clone)]
pub struct RetrievalService {
    registry: Arc<TaskRegistry>,
    pipeline: Arc<RetrievalPipeline>,
}

impl RetrievalService {
    pub fn new(registry: Arc<TaskRegistry>, pipeline: Arc<RetrievalPipeline>) -> Self {
        Self { registry, pipeline }
    }

    pub fn task_id(content_id: &ContentId) -> TaskId {
        TaskId::derive(OperationKind::Retrieval, &content_id.0)
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn schedule_retrieval(
        &self,
        target: RetrievalTarget,
        context: RequesterContext,
    ) -> Result<TaskHandle, ScheduleError> {
        let requester = context.requester_id.clone();
        let task_id = Self::task_id(&target.content_id);

        if self.registry.has_task(&requester, &task_id) {
            return Err(ScheduleError::AlreadyRunning { requester, task_id });
        }
        if self.registry.hit_limits(&requester) {
            return Err(ScheduleError::LimitReached(requester));
        }

        let pipeline = Arc::clone(&self.pipeline);
        self.registry.schedule(requester, task_id, move |cancel| async move {
            pipeline.run(target, context, cancel).await
        })
    }

    pub fn has_task(&self, requester: &RequesterId, content_id: &ContentId) -> bool {
        self.registry.has_task(requester, &Self::task_id(content_id))
    }

    pub fn hit_limits(&self, requester: &RequesterId) -> bool {
        self.registry.hit_limits(requester)
    }

    pub fn external_cancel(&self, requester: &RequesterId, content_id: &ContentId) -> bool {
        self.registry.external_cancel(requester, &Self::task_id(content_id))
    }
}
