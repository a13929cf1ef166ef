// SPDX-License-Identifier: MIT OR Apache-2.0

//! Negotiation phase of a conversation, derived from what is stored locally.
use thiserror::Error;

use crate::contact::Contact;
use crate::conversation::Conversation;
use crate::handshake::HandshakeData;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConversationState {
    /// We invited the contact and wait for its reply.
    WaitingForReply,

    /// We replied to an invitation and wait for the contact's first message.
    WaitingForFirstMessage,

    /// Both sides can send, nothing was exchanged yet.
    FullySetup,

    Running,

    /// The conversation was reset and the contact has not answered yet.
    Reset,

    /// Conversation state is missing or unreadable.
    Indecipherable,
}

impl ConversationState {
    /// Collapses a failed resolution into [`ConversationState::Indecipherable`].
    pub fn from_resolution(result: Result<Self, ConversationNotFound>) -> Self {
        result.unwrap_or(ConversationState::Indecipherable)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no conversation stored for this contact")]
pub struct ConversationNotFound;

/// Decides the state from the stored values. The first matching rule wins:
///
/// 1. no conversation: failure
/// 2. reset marker and no sending chain: `Reset`
/// 3. handshake data and a locally computed reply: `WaitingForFirstMessage`
/// 4. sending chain and messages exchanged: `Running`
/// 5. sending chain: `FullySetup`
/// 6. `WaitingForReply`
pub fn resolve_conversation_state(
    conversation: Option<&Conversation>,
    handshake: Option<&HandshakeData>,
    contact: Option<&Contact>,
) -> Result<ConversationState, ConversationNotFound> {
    let conversation = conversation.ok_or(ConversationNotFound)?;

    let is_reset = contact.is_some_and(|contact| contact.enc_reset_marker.is_some());
    if is_reset && !conversation.has_sending_chain() {
        return Ok(ConversationState::Reset);
    }

    let replied =
        conversation.has_root_key() || conversation.received_last_message_number().is_some();
    if handshake.is_some() && replied {
        return Ok(ConversationState::WaitingForFirstMessage);
    }

    if conversation.has_sending_chain() {
        let exchanged = conversation.next_message_number() > 0
            || conversation.next_sequence_number() > 0
            || conversation.received_last_message_number().unwrap_or(0) > 0;
        if exchanged {
            return Ok(ConversationState::Running);
        }
        return Ok(ConversationState::FullySetup);
    }

    Ok(ConversationState::WaitingForReply)
}
