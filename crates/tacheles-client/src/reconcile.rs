//! Folding streamed text into the message list.

use tacheles_core::{ConversationId, Message, StreamKey};

/// Fold the accumulated text of stream `key` into `messages`.
///
/// If the last message is the assistant message grown by `key`, it is replaced
/// by one holding `accumulated`. Otherwise a new assistant message is
/// appended. Either way the stream's bubble is the last element afterwards and
/// there is exactly one of it.
#[must_use]
pub fn reconcile(
    mut messages: Vec<Message>,
    accumulated: &str,
    key: StreamKey,
    conversation: Option<ConversationId>,
) -> Vec<Message> {
    let grows_last = messages
        .last()
        .is_some_and(|last| last.is_assistant() && last.stream_key == Some(key));

    if grows_last {
        messages.pop();
    }

    let mut reply = Message::assistant(accumulated).from_stream(key);
    reply.conversation_id = conversation;
    messages.push(reply);
    messages
}
