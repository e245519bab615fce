//! Confirmation gateway: request/response over channels.
//!
//! The conversation loop sends one [`ConfirmationRequest`] per call and waits on
//! its reply. Whoever owns the receiving end (a terminal prompt, a test) answers
//! with [`ConfirmationRequest::respond`].

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use helm_tools::RiskLevel;
use helm_types::ToolCall;

/// Answer to a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationDecision {
    Approve,
    /// Approve, and stop asking about this tool for the rest of the session.
    AlwaysAllow,
    /// Refuse this call and skip the rest of the batch.
    Decline,
    /// Refuse this call only.
    Skip,
}

#[derive(Debug)]
pub struct ConfirmationRequest {
    pub call: ToolCall,
    pub risk: RiskLevel,
    reply: oneshot::Sender<ConfirmationDecision>,
}

impl ConfirmationRequest {
    /// Returns false if the conversation stopped waiting.
    pub fn respond(self, decision: ConfirmationDecision) -> bool {
        self.reply.send(decision).is_ok()
    }
}

/// How a confirmation wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Decided(ConfirmationDecision),
    Cancelled,
    /// Nobody is listening on the other end.
    Unavailable,
}

/// Sending half held by the conversation.
#[derive(Debug, Clone)]
pub struct ConfirmationGateway {
    tx: mpsc::Sender<ConfirmationRequest>,
}

impl ConfirmationGateway {
    /// Ask about one call, resolving early if `cancel` fires.
    pub async fn request(
        &self,
        call: &ToolCall,
        risk: RiskLevel,
        cancel: &CancellationToken,
    ) -> ConfirmationOutcome {
        let (reply, answer) = oneshot::channel();
        let request = ConfirmationRequest {
            call: call.clone(),
            risk,
            reply,
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => return ConfirmationOutcome::Cancelled,
            sent = self.tx.send(request) => {
                if sent.is_err() {
                    tracing::warn!(call_id = %call.id, "confirmation receiver closed");
                    return ConfirmationOutcome::Unavailable;
                }
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => ConfirmationOutcome::Cancelled,
            decision = answer => match decision {
                Ok(decision) => ConfirmationOutcome::Decided(decision),
                Err(_) => {
                    tracing::warn!(call_id = %call.id, "confirmation request dropped unanswered");
                    ConfirmationOutcome::Unavailable
                }
            },
        }
    }
}

/// Create a gateway and the receiver that answers it.
#[must_use]
pub fn channel(capacity: usize) -> (ConfirmationGateway, mpsc::Receiver<ConfirmationRequest>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ConfirmationGateway { tx }, rx)
}
