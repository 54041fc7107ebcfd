//! Approval actions for medium videos.
//!
//! A medium video waits in the origin chat as an interactive message. Each
//! button press arrives as an [`ActionEvent`] and is resolved here:
//!
//! | Token    | Result                                                        |
//! |----------|---------------------------------------------------------------|
//! | `send`   | forward the media to the destination, delete the message      |
//! | `delete` | delete the message                                            |
//! | `trim`   | send a centered clip to the trim destinations                 |
//! | other    | acknowledge as not recognized, nothing else                   |
//!
//! The [`ActionLedger`] gives first-wins semantics when the same message is
//! actioned twice: the first press claims it, later or concurrent presses
//! are acknowledged without side effects. The ledger lives in memory only,
//! so after a restart deletes still tolerate messages that are already gone.

use crate::config::Config;
use crate::error::DispositionError;
use crate::gateway::{delete_tolerant, CallbackId, MessagingGateway};
use crate::trim::TrimPipeline;
use crate::video::{MessageRef, VideoDescriptor};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

pub const ACK_SENT: &str = "Video enviado al chat de destino!";
pub const ACK_DELETED: &str = "Video borrado!";
pub const ACK_TRIMMING: &str = "Procesando video... ⏳";
pub const ACK_UNRECOGNIZED: &str = "❌ Acción no reconocida";
pub const ACK_ALREADY_HANDLED: &str = "⏳ Esta acción ya fue procesada";
pub const TRIM_FAILED_NOTICE: &str = "❌ Error al recortar el video";

/// Finished entries kept to reject late duplicates
const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

/// Action carried by an inline button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionToken {
    Send,
    Delete,
    Trim,
}

impl ActionToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionToken::Send => "send",
            ActionToken::Delete => "delete",
            ActionToken::Trim => "trim",
        }
    }
}

impl fmt::Display for ActionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token not in the known set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Action not recognized: {0:?}")]
pub struct UnrecognizedAction(pub String);

impl FromStr for ActionToken {
    type Err = UnrecognizedAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "send" => Ok(ActionToken::Send),
            "delete" => Ok(ActionToken::Delete),
            "trim" => Ok(ActionToken::Trim),
            other => Err(UnrecognizedAction(other.to_string())),
        }
    }
}

/// An inline button press on an interactive message
#[derive(Debug, Clone)]
pub struct ActionEvent {
    /// Raw token from the button
    pub token: String,
    /// Used to acknowledge the press
    pub callback: CallbackId,
    /// The interactive message the button belongs to
    pub message: MessageRef,
    /// The video attached to that message, if the gateway could read it
    pub video: Option<VideoDescriptor>,
}

/// How an action event was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Forwarded,
    Deleted,
    Trimmed,
    AlreadyHandled,
    Unrecognized,
}

/// State of one interactive message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Pending,
    InFlight(ActionToken),
    Done(ActionToken),
}

/// In-memory record of interactive messages and the action that claimed them
pub struct ActionLedger {
    entries: Mutex<LedgerEntries>,
    capacity: usize,
}

#[derive(Default)]
struct LedgerEntries {
    states: HashMap<MessageRef, ActionState>,
    registered: VecDeque<MessageRef>,
    finished: VecDeque<MessageRef>,
}

impl ActionLedger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LEDGER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LedgerEntries::default()),
            capacity: capacity.max(1),
        }
    }

    /// Record a freshly posted interactive message.
    ///
    /// Past `capacity` registrations the oldest message nobody acted on is
    /// forgotten; a late press on it is then treated like an unknown message.
    pub fn register_pending(&self, message: MessageRef) {
        let mut entries = self.entries.lock();
        entries.states.insert(message, ActionState::Pending);
        entries.registered.push_back(message);

        while entries.registered.len() > self.capacity {
            if let Some(oldest) = entries.registered.pop_front() {
                if matches!(entries.states.get(&oldest), Some(ActionState::Pending)) {
                    entries.states.remove(&oldest);
                }
            }
        }
    }

    /// Claim a message for `token`.
    ///
    /// Unknown messages count as pending. Fails with the current state when
    /// another action already claimed or finished the message.
    pub fn try_claim(&self, message: MessageRef, token: ActionToken) -> Result<(), ActionState> {
        let mut entries = self.entries.lock();
        match entries.states.get(&message).copied() {
            None | Some(ActionState::Pending) => {
                entries
                    .states
                    .insert(message, ActionState::InFlight(token));
                Ok(())
            }
            Some(state) => Err(state),
        }
    }

    /// Mark a claimed message as finished
    pub fn complete(&self, message: MessageRef, token: ActionToken) {
        let mut entries = self.entries.lock();
        entries.states.insert(message, ActionState::Done(token));
        entries.finished.push_back(message);

        while entries.finished.len() > self.capacity {
            if let Some(oldest) = entries.finished.pop_front() {
                if matches!(entries.states.get(&oldest), Some(ActionState::Done(_))) {
                    entries.states.remove(&oldest);
                }
            }
        }
    }

    /// Return a claimed message to pending after a failed action
    pub fn release(&self, message: MessageRef) {
        let mut entries = self.entries.lock();
        if matches!(entries.states.get(&message), Some(ActionState::InFlight(_))) {
            entries.states.insert(message, ActionState::Pending);
        }
    }

    pub fn state(&self, message: MessageRef) -> Option<ActionState> {
        self.entries.lock().states.get(&message).copied()
    }

    /// Interactive messages still waiting for a decision
    pub fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .states
            .values()
            .filter(|s| matches!(s, ActionState::Pending))
            .count()
    }
}

impl Default for ActionLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves action events against the gateway
pub struct ApprovalProcessor {
    gateway: Arc<dyn MessagingGateway>,
    trim: Arc<TrimPipeline>,
    ledger: Arc<ActionLedger>,
    destination_chat_id: i64,
    trim_destinations: Vec<i64>,
    clip_secs: u32,
    delete_after_trim: bool,
}

impl ApprovalProcessor {
    pub fn new(
        config: &Config,
        gateway: Arc<dyn MessagingGateway>,
        trim: Arc<TrimPipeline>,
        ledger: Arc<ActionLedger>,
    ) -> Self {
        let destination_chat_id = config.telegram.destination_chat_id;
        Self {
            gateway,
            trim,
            ledger,
            destination_chat_id,
            trim_destinations: config.trim.destinations(destination_chat_id),
            clip_secs: config.trim.clip_seconds,
            delete_after_trim: config.trim.delete_after_trim,
        }
    }

    /// Resolve one action event.
    ///
    /// Unrecognized tokens and duplicates are acknowledged and return `Ok`.
    /// A failed action releases its claim so the user can press again.
    #[instrument(skip(self, event), fields(token = %event.token, message = %event.message))]
    pub async fn handle_action(&self, event: &ActionEvent) -> Result<ActionOutcome, DispositionError> {
        debug!("Handling approval action");

        let token = match event.token.parse::<ActionToken>() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Unknown action token");
                self.acknowledge(event, ACK_UNRECOGNIZED).await;
                return Ok(ActionOutcome::Unrecognized);
            }
        };

        if let Err(state) = self.ledger.try_claim(event.message, token) {
            info!(state = ?state, "Message already actioned, ignoring duplicate");
            self.acknowledge(event, ACK_ALREADY_HANDLED).await;
            return Ok(ActionOutcome::AlreadyHandled);
        }

        metrics::counter!("triage.actions", "token" => token.as_str()).increment(1);

        let result = match token {
            ActionToken::Send => self.send(event).await,
            ActionToken::Delete => self.delete(event).await,
            ActionToken::Trim => self.trim(event).await,
        };

        match &result {
            Ok(outcome) => {
                self.ledger.complete(event.message, token);
                info!(outcome = ?outcome, "Approval action completed");
            }
            Err(e) => {
                self.ledger.release(event.message);
                error!(error = %e, "Approval action failed");
            }
        }

        result
    }

    async fn send(&self, event: &ActionEvent) -> Result<ActionOutcome, DispositionError> {
        let video = event.video.as_ref().ok_or(DispositionError::MissingVideo)?;

        self.gateway.forward(video, self.destination_chat_id).await?;
        info!(
            destination = self.destination_chat_id,
            video = %video.display_name(),
            "Approved video forwarded"
        );

        // The video is already out, so the action is done even if the
        // interactive message stays behind
        if let Err(e) = delete_tolerant(self.gateway.as_ref(), event.message).await {
            warn!(error = %e, "Failed to delete interactive message after forwarding");
        }
        self.acknowledge(event, ACK_SENT).await;

        Ok(ActionOutcome::Forwarded)
    }

    async fn delete(&self, event: &ActionEvent) -> Result<ActionOutcome, DispositionError> {
        let removed = delete_tolerant(self.gateway.as_ref(), event.message).await?;
        info!(removed, "Interactive message deleted");
        self.acknowledge(event, ACK_DELETED).await;

        Ok(ActionOutcome::Deleted)
    }

    async fn trim(&self, event: &ActionEvent) -> Result<ActionOutcome, DispositionError> {
        let video = event.video.as_ref().ok_or(DispositionError::MissingVideo)?;

        // The trim outlives the callback's answer window, so answer first
        self.acknowledge(event, ACK_TRIMMING).await;

        if let Err(e) = self
            .trim
            .trim_and_forward(video, &self.trim_destinations, self.clip_secs)
            .await
        {
            if let Err(notify_err) = self
                .gateway
                .send_reply(event.message.chat_id, TRIM_FAILED_NOTICE, event.message.message_id)
                .await
            {
                warn!(error = %notify_err, "Failed to report trim failure");
            }
            return Err(e);
        }

        if self.delete_after_trim {
            if let Err(e) = delete_tolerant(self.gateway.as_ref(), event.message).await {
                warn!(error = %e, "Failed to delete interactive message after trimming");
            }
        } else {
            let caption = format!("✅ Recorte de {}s enviado", self.clip_secs);
            if let Err(e) = self.gateway.edit_caption(event.message, &caption).await {
                warn!(error = %e, "Failed to mark interactive message as trimmed");
            }
        }

        Ok(ActionOutcome::Trimmed)
    }

    async fn acknowledge(&self, event: &ActionEvent, text: &str) {
        if let Err(e) = self.gateway.acknowledge(&event.callback, text).await {
            warn!(error = %e, "Failed to acknowledge action");
        }
    }
}
