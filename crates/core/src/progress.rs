//! Throttled progress message for a single transfer.
//!
//! The first render sends a new message; later renders edit it in place.
//! Updates are rate limited: slow transfers refresh after the soft threshold,
//! fast ones only after the hard ceiling, and an unchanged text is never
//! re-sent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::chat::{ChatId, MessageRef};
use crate::errors::{ProgressError, SessionError};
use crate::ports::{ConnectionSession, ProgressObserver};

const TOTAL_BARS: usize = 20;
const BAR_FILLED: char = '█';
const BAR_EMPTY: char = ' ';
const MIB: f64 = 1024.0 * 1024.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressSettings {
    pub soft_throttle: Duration,
    pub hard_throttle: Duration,
    pub done_threshold_bytes: u64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            soft_throttle: Duration::from_secs(3),
            hard_throttle: Duration::from_secs(10),
            done_threshold_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Static texts of one progress message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressLabels {
    pub header: String,
    pub banner: String,
    pub tail: String,
}

impl ProgressLabels {
    pub fn fetching(title: &str) -> Self {
        Self {
            header: format!("⬇️ {title}"),
            banner: "Looking for the file...".to_owned(),
            tail: "fetched from storage".to_owned(),
        }
    }

    pub fn uploading(title: &str) -> Self {
        Self {
            header: format!("⬇️ {title}"),
            banner: "Looking for the file...".to_owned(),
            tail: "uploaded to chat".to_owned(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProgressState {
    pub done_bytes: u64,
    pub total_bytes: Option<u64>,
    pub previous_done: u64,
    pub last_render_text: Option<String>,
    pub last_update_time: Instant,
}

pub struct ProgressReporter {
    session: Arc<dyn ConnectionSession>,
    chat_id: ChatId,
    labels: ProgressLabels,
    settings: ProgressSettings,
    message: Option<MessageRef>,
    state: ProgressState,
}

impl ProgressReporter {
    /// Starts with `last_update_time = now`, so the first throttled update
    /// waits for the soft threshold.
    pub fn new(
        session: Arc<dyn ConnectionSession>,
        chat_id: ChatId,
        labels: ProgressLabels,
        settings: ProgressSettings,
    ) -> Self {
        Self {
            session,
            chat_id,
            labels,
            settings,
            message: None,
            state: ProgressState {
                done_bytes: 0,
                total_bytes: None,
                previous_done: 0,
                last_render_text: None,
                last_update_time: Instant::now(),
            },
        }
    }

    /// Builds the reporter for the next phase of the same transfer. It takes
    /// over the already-sent message, its last text and its throttle clock.
    /// Byte counters start from zero.
    pub fn hand_over(self, labels: ProgressLabels) -> Self {
        Self {
            session: self.session,
            chat_id: self.chat_id,
            labels,
            settings: self.settings,
            message: self.message,
            state: ProgressState {
                done_bytes: 0,
                total_bytes: None,
                previous_done: 0,
                last_render_text: self.state.last_render_text,
                last_update_time: self.state.last_update_time,
            },
        }
    }

    pub fn message(&self) -> Option<&MessageRef> {
        self.message.as_ref()
    }

    pub fn into_message(self) -> Option<MessageRef> {
        self.message
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Renders the banner unconditionally.
    pub async fn show_banner(&mut self) -> Result<(), ProgressError> {
        let text = self.render_banner();
        self.publish(text, Instant::now()).await
    }

    pub async fn callback(&mut self, done: u64, total: Option<u64>) -> Result<(), ProgressError> {
        self.state.previous_done = self.state.done_bytes;
        self.state.done_bytes = done;
        self.state.total_bytes = total.filter(|total| *total > 0);

        let now = Instant::now();
        if !self.should_send(now) {
            return Ok(());
        }
        let text = self.render_progress();
        self.publish(text, now).await
    }

    fn should_send(&self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.state.last_update_time);
        if elapsed > self.settings.hard_throttle {
            return true;
        }
        let delta = self.state.done_bytes.saturating_sub(self.state.previous_done);
        elapsed > self.settings.soft_throttle && delta < self.settings.done_threshold_bytes
    }

    async fn publish(&mut self, text: String, now: Instant) -> Result<(), ProgressError> {
        match &self.message {
            None => {
                let message =
                    self.session.send(&self.chat_id, &text).await.map_err(progress_error)?;
                self.message = Some(message);
            }
            Some(message) => {
                if self.state.last_render_text.as_deref() != Some(text.as_str()) {
                    self.session.edit(message, &text).await.map_err(progress_error)?;
                } else {
                    debug!(
                        event_name = "tasks.progress.unchanged",
                        correlation_id = %message.message_id,
                        "progress text unchanged; edit skipped"
                    );
                }
            }
        }
        self.state.last_render_text = Some(text);
        self.state.last_update_time = now;
        Ok(())
    }

    fn render_banner(&self) -> String {
        format!("`{}\n{}`", self.labels.header, self.labels.banner)
    }

    fn render_progress(&self) -> String {
        let done = self.state.done_bytes;
        let (bar, share) = match self.state.total_bytes {
            Some(total) => {
                let fraction = (done as f64 / total as f64).min(1.0);
                let filled = ((TOTAL_BARS as f64) * fraction) as usize;
                let bar = format!(
                    "|{}{}| ",
                    BAR_FILLED.to_string().repeat(filled),
                    BAR_EMPTY.to_string().repeat(TOTAL_BARS - filled)
                );
                (bar, format!("{:.1}%", fraction * 100.0))
            }
            None => (String::new(), format!("{:.1}Mb", done as f64 / MIB)),
        };
        format!("`{}\n{bar}{share:<8} {}`", self.labels.header, self.labels.tail)
    }
}

fn progress_error(error: SessionError) -> ProgressError {
    match error {
        SessionError::MessageNotFound | SessionError::Progress(ProgressError::LostTarget) => {
            ProgressError::LostTarget
        }
        other => ProgressError::Send(other.to_string()),
    }
}

#[async_trait]
impl ProgressObserver for ProgressReporter {
    async fn on_progress(&mut self, done: u64, total: Option<u64>) -> Result<(), ProgressError> {
        self.callback(done, total).await
    }
}
