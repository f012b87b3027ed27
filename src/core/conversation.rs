//! Client-side conversation state machine.
//!
//! [`ConversationController`] owns the transcript and at most one in-flight
//! assistant turn. Generations run on background tasks via
//! [`ChatStreamService`]; their events come back tagged with a stream id and
//! are applied through [`ConversationController::handle_stream_event`], which
//! drops anything that does not belong to the active turn.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::backend::{GenerationBackend, GenerationRequest};
use crate::core::catalog::ModelCatalog;
use crate::core::chat_stream::{ChatStreamService, FailureReason, StreamEvent, StreamParams};
use crate::core::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    AwaitingFirstDelta,
    Streaming,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed(FailureReason),
}

/// What one applied stream event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationUpdate {
    Delta(String),
    Settled(TurnOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidInput {
    #[error("message is empty")]
    EmptyMessage,

    #[error("a response is still being generated")]
    Busy,

    #[error("there is no finished assistant reply to regenerate")]
    NothingToRegenerate,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),

    #[error("unknown model: {0}")]
    UnknownModel(String),
}

struct ActiveTurn {
    stream_id: u64,
    cancel_token: CancellationToken,
    message_index: usize,
}

pub struct ConversationController {
    transcript: Vec<Message>,
    model: String,
    catalog: Arc<ModelCatalog>,
    backend: Arc<dyn GenerationBackend>,
    streams: ChatStreamService,
    events: mpsc::UnboundedReceiver<(StreamEvent, u64)>,
    active: Option<ActiveTurn>,
    phase: TurnPhase,
    current_stream_id: u64,
    revision: watch::Sender<u64>,
}

impl ConversationController {
    /// Starts idle with an empty transcript and the catalog's default model.
    pub fn new(backend: Arc<dyn GenerationBackend>, catalog: Arc<ModelCatalog>) -> Self {
        let (streams, events) = ChatStreamService::new();
        let (revision, _) = watch::channel(0);
        Self {
            transcript: Vec::new(),
            model: catalog.default_model().id.clone(),
            catalog,
            backend,
            streams,
            events,
            active: None,
            phase: TurnPhase::Idle,
            current_stream_id: 0,
            revision,
        }
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Revision counter bumped on every transcript change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Takes effect on the next submit or regenerate.
    pub fn select_model(&mut self, id: &str) -> Result<(), ConversationError> {
        self.catalog
            .resolve(id)
            .map_err(|_| ConversationError::UnknownModel(id.to_string()))?;
        self.model = id.to_string();
        Ok(())
    }

    /// Append a user message plus a pending assistant reply and start
    /// generating. Returns the new stream id.
    pub fn submit(&mut self, text: &str) -> Result<u64, ConversationError> {
        if self.is_busy() {
            return Err(InvalidInput::Busy.into());
        }
        if text.trim().is_empty() {
            return Err(InvalidInput::EmptyMessage.into());
        }

        self.transcript.push(Message::user(text));
        Ok(self.start_turn())
    }

    /// Drop the last finished assistant reply and generate a new one from the
    /// same context.
    pub fn regenerate(&mut self) -> Result<u64, ConversationError> {
        if self.is_busy() {
            return Err(InvalidInput::Busy.into());
        }

        let replaceable = self.transcript.len() >= 2
            && self.transcript.last().is_some_and(|message| {
                message.role().is_assistant() && message.status().is_terminal()
            });
        if !replaceable {
            return Err(InvalidInput::NothingToRegenerate.into());
        }

        self.transcript.pop();
        Ok(self.start_turn())
    }

    /// Stop the in-flight turn, keeping its partial text marked as cancelled.
    /// Returns false when nothing was in flight.
    pub fn cancel(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };

        active.cancel_token.cancel();
        if let Some(message) = self.transcript.get_mut(active.message_index) {
            message.fail(FailureReason::Cancelled);
        }
        debug!(stream_id = active.stream_id, "turn cancelled");
        self.phase = TurnPhase::Finalized;
        self.bump_revision();
        true
    }

    /// Abandon any in-flight turn and clear the transcript.
    pub fn reset(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel_token.cancel();
            debug!(stream_id = active.stream_id, "turn abandoned by reset");
        }
        self.transcript.clear();
        self.phase = TurnPhase::Idle;
        self.bump_revision();
    }

    /// Apply one event from the stream service. Events from any stream other
    /// than the active one are ignored.
    pub fn handle_stream_event(
        &mut self,
        event: StreamEvent,
        stream_id: u64,
    ) -> Option<ConversationUpdate> {
        let Some(active) = self.active.as_ref() else {
            debug!(stream_id, "dropping event with no active turn");
            return None;
        };
        if active.stream_id != stream_id {
            debug!(
                stream_id,
                active = active.stream_id,
                "dropping stale stream event"
            );
            return None;
        }
        let index = active.message_index;
        let message = self.transcript.get_mut(index)?;

        let update = match event {
            StreamEvent::Delta(text) => {
                if text.is_empty() || !message.append(&text) {
                    return None;
                }
                self.phase = TurnPhase::Streaming;
                ConversationUpdate::Delta(text)
            }
            StreamEvent::Done => {
                message.complete();
                info!(stream_id, chars = message.content().len(), "turn completed");
                self.finish_turn();
                ConversationUpdate::Settled(TurnOutcome::Completed)
            }
            StreamEvent::Failed(reason) => {
                message.fail(reason.clone());
                info!(stream_id, kind = reason.kind(), %reason, "turn failed");
                self.finish_turn();
                ConversationUpdate::Settled(TurnOutcome::Failed(reason))
            }
        };

        self.bump_revision();
        Some(update)
    }

    /// Wait for the next change to the active turn. `None` when idle.
    pub async fn next_update(&mut self) -> Option<ConversationUpdate> {
        while self.active.is_some() {
            let (event, stream_id) = self.events.recv().await?;
            if let Some(update) = self.handle_stream_event(event, stream_id) {
                return Some(update);
            }
        }
        None
    }

    /// Drive the active turn until it settles.
    pub async fn next_outcome(&mut self) -> Option<TurnOutcome> {
        while let Some(update) = self.next_update().await {
            if let ConversationUpdate::Settled(outcome) = update {
                return Some(outcome);
            }
        }
        None
    }

    fn start_turn(&mut self) -> u64 {
        let request = GenerationRequest {
            messages: self.transcript.iter().map(Message::to_api).collect(),
            model: self.model.clone(),
        };

        self.transcript.push(Message::assistant_pending());
        let message_index = self.transcript.len() - 1;

        self.current_stream_id += 1;
        let stream_id = self.current_stream_id;
        let cancel_token = CancellationToken::new();

        info!(
            stream_id,
            model = %self.model,
            messages = request.messages.len(),
            "starting turn"
        );
        self.streams.spawn_stream(StreamParams {
            backend: Arc::clone(&self.backend),
            request,
            cancel_token: cancel_token.clone(),
            stream_id,
        });

        self.active = Some(ActiveTurn {
            stream_id,
            cancel_token,
            message_index,
        });
        self.phase = TurnPhase::AwaitingFirstDelta;
        self.bump_revision();
        stream_id
    }

    fn finish_turn(&mut self) {
        self.active = None;
        self.phase = TurnPhase::Finalized;
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}
