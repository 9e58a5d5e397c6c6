//! Inbound command routing for live sessions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use botfleet_core::domain::chat::{InboundEvent, RequesterContext};
use botfleet_core::domain::content::ContentId;
use botfleet_core::domain::notice::Notice;
use botfleet_core::limits::RequestVerdict;
use botfleet_core::pipeline::RetrievalService;
use botfleet_core::ports::{
    ConnectionSession, DeliveryCache, HandlerResult, InboundHandler, TargetResolver,
};
use botfleet_core::tasks::ScheduleError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundCommand {
    Download(ContentId),
    Cancel(ContentId),
    Report(ContentId),
    Search(String),
}

/// Parses `/d_<id>`, `/x_<id>` and `/r_<id>`. A trailing `@botname` is
/// ignored. Any other non-empty text is a search query.
pub fn parse_command(text: &str) -> Option<InboundCommand> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let prefixed = [
        ("/d_", InboundCommand::Download as fn(ContentId) -> InboundCommand),
        ("/x_", InboundCommand::Cancel),
        ("/r_", InboundCommand::Report),
    ];
    for (prefix, build) in prefixed {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            let id = rest.split(['@', ' ']).next().unwrap_or_default();
            if id.is_empty() {
                return None;
            }
            return Some(build(ContentId(id.to_owned())));
        }
    }

    if trimmed.starts_with('/') {
        return None;
    }
    Some(InboundCommand::Search(trimmed.to_owned()))
}

fn whole_seconds(duration: Duration) -> u64 {
    let seconds = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    seconds.max(1)
}

pub struct CommandHandler {
    retrievals: RetrievalService,
    resolver: Arc<dyn TargetResolver>,
    cache: Arc<dyn DeliveryCache>,
}

impl CommandHandler {
    pub fn new(
        retrievals: RetrievalService,
        resolver: Arc<dyn TargetResolver>,
        cache: Arc<dyn DeliveryCache>,
    ) -> Self {
        Self { retrievals, resolver, cache }
    }

    async fn reply(&self, session: &dyn ConnectionSession, event: &InboundEvent, notice: Notice) {
        if let Err(error) = session.send(&event.chat_id, &notice.text()).await {
            warn!(
                event_name = "chat.command.reply_failed",
                correlation_id = %event.requester_id,
                tenant_id = %event.tenant_id,
                error = %error,
                "could not reply to requester"
            );
        }
    }

    async fn download(
        &self,
        session: &dyn ConnectionSession,
        event: &InboundEvent,
        content_id: ContentId,
    ) {
        let requester = &event.requester_id;
        if self.retrievals.has_task(requester, &content_id) {
            return self.reply(session, event, Notice::AlreadyInProgress).await;
        }
        if self.retrievals.hit_limits(requester) {
            return self.reply(session, event, Notice::TooManyTasks).await;
        }

        let resolved = self.resolver.resolve(&content_id).await;
        let target = match resolved {
            Ok(Some(target)) => target,
            Ok(None) => {
                let notice = Notice::Unavailable { title: content_id.0 };
                return self.reply(session, event, notice).await;
            }
            Err(error) => {
                warn!(
                    event_name = "chat.command.resolve_failed",
                    correlation_id = %requester,
                    content_id = %content_id,
                    error = %error,
                    "content lookup failed"
                );
                return self.reply(session, event, Notice::TryLater).await;
            }
        };

        let context = RequesterContext::from_event(event);
        match self.retrievals.schedule_retrieval(target, context) {
            Ok(_) => {}
            Err(ScheduleError::AlreadyRunning { .. }) => {
                self.reply(session, event, Notice::AlreadyInProgress).await;
            }
            Err(ScheduleError::LimitReached(_)) => {
                self.reply(session, event, Notice::TooManyTasks).await;
            }
            Err(ScheduleError::ShuttingDown) => {
                self.reply(session, event, Notice::TryLater).await;
            }
        }
    }

    async fn cancel(
        &self,
        session: &dyn ConnectionSession,
        event: &InboundEvent,
        content_id: ContentId,
    ) {
        if !self.retrievals.external_cancel(&event.requester_id, &content_id) {
            self.reply(session, event, Notice::NothingToCancel).await;
        }
    }

    async fn report(
        &self,
        session: &dyn ConnectionSession,
        event: &InboundEvent,
        content_id: ContentId,
    ) {
        match self.cache.invalidate(&content_id).await {
            Ok(removed) => {
                info!(
                    event_name = "chat.command.cache_invalidated",
                    correlation_id = %event.requester_id,
                    content_id = %content_id,
                    removed,
                    "delivery cache entries invalidated"
                );
                self.reply(session, event, Notice::CacheInvalidated).await;
            }
            Err(error) => {
                warn!(
                    event_name = "chat.command.invalidate_failed",
                    correlation_id = %event.requester_id,
                    content_id = %content_id,
                    error = %error,
                    "delivery cache invalidation failed"
                );
                self.reply(session, event, Notice::TryLater).await;
            }
        }
    }

    async fn search(&self, session: &dyn ConnectionSession, event: &InboundEvent) {
        let limits = self.retrievals.registry().limits();
        let notice = match limits.record_request(&event.requester_id) {
            RequestVerdict::Allowed => Notice::SearchAccepted,
            RequestVerdict::Banned { retry_after } => {
                Notice::SlowDown { retry_after_secs: whole_seconds(retry_after) }
            }
        };
        self.reply(session, event, notice).await;
    }
}

#[async_trait]
impl InboundHandler for CommandHandler {
    async fn handle(
        &self,
        session: &dyn ConnectionSession,
        event: &InboundEvent,
    ) -> HandlerResult {
        let Some(command) = parse_command(&event.text) else {
            return HandlerResult::Ignored;
        };

        match command {
            InboundCommand::Download(content) => self.download(session, event, content).await,
            InboundCommand::Cancel(content) => self.cancel(session, event, content).await,
            InboundCommand::Report(content) => self.report(session, event, content).await,
            InboundCommand::Search(_) => self.search(session, event).await,
        }
        HandlerResult::Handled
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use botfleet_core::domain::content::ContentId;

    use super::{parse_command, whole_seconds, InboundCommand};

    fn id(value: &str) -> ContentId {
        ContentId(value.to_owned())
    }

    #[test]
    fn parses_prefixed_commands() {
        assert_eq!(parse_command("/d_bafy1"), Some(InboundCommand::Download(id("bafy1"))));
        let cancel = parse_command(" /x_bafy1@fleet_bot ");
        assert_eq!(cancel, Some(InboundCommand::Cancel(id("bafy1"))));
        assert_eq!(parse_command("/r_bafy1"), Some(InboundCommand::Report(id("bafy1"))));
    }

    #[test]
    fn other_text_is_search_and_malformed_commands_are_ignored() {
        assert_eq!(
            parse_command("attention is all you need"),
            Some(InboundCommand::Search("attention is all you need".to_owned()))
        );
        assert_eq!(parse_command("/d_"), None);
        assert_eq!(parse_command("/start"), None);
        assert_eq!(parse_command("   "), None);
    }

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        assert_eq!(whole_seconds(Duration::from_millis(59_200)), 60);
        assert_eq!(whole_seconds(Duration::from_secs(120)), 120);
        assert_eq!(whole_seconds(Duration::ZERO), 1);
    }
}
