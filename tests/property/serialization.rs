//! Property-based serialization round-trip tests for the wire protocol.
//!
//! Uses proptest to verify:
//! 1. Any valid `ChatMessage` survives encode → decode round-trip.
//! 2. Any valid `ClientIntent` / `ServerEvent` survives a round-trip.
//! 3. Random bytes never cause a panic in decode (return `Err` gracefully).

use proptest::prelude::*;
use uuid::Uuid;

use parley_proto::codec;
use parley_proto::event::{ClientIntent, ServerEvent};
use parley_proto::message::*;

// --- Arbitrary implementations for protocol types ---

/// Strategy for generating arbitrary `UserId` values.
fn arb_user_id() -> impl Strategy<Value = UserId> {
    "[a-z0-9-]{1,24}".prop_map(UserId::new)
}

/// Strategy for generating arbitrary `MessageId` values.
fn arb_message_id() -> impl Strategy<Value = MessageId> {
    "[a-f0-9-]{1,36}".prop_map(MessageId::new)
}

/// Strategy for generating arbitrary `TempId` values.
fn arb_temp_id() -> impl Strategy<Value = TempId> {
    any::<u128>().prop_map(|n| TempId::from_uuid(Uuid::from_u128(n)))
}

/// Strategy for generating arbitrary `Timestamp` values.
fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
    any::<u64>().prop_map(Timestamp::from_millis)
}

/// Strategy for generating arbitrary message bodies.
/// Uses non-empty strings to avoid validation failures.
fn arb_body() -> impl Strategy<Value = MessageBody> {
    prop_oneof![
        "[^\x00]{1,512}".prop_map(MessageBody::Text),
        "[a-z:/.]{1,128}".prop_map(|url| MessageBody::Image { url }),
    ]
}

/// Strategy for generating arbitrary reply references.
fn arb_reply() -> impl Strategy<Value = Option<ReplyRef>> {
    prop::option::of((arb_message_id(), "[^\x00]{0,64}", arb_user_id()).prop_map(
        |(message_id, text, sender_id)| ReplyRef {
            message_id,
            text,
            sender_id,
        },
    ))
}

/// Strategy for generating arbitrary `ChatMessage` values, both
/// optimistic and confirmed.
fn arb_chat_message() -> impl Strategy<Value = ChatMessage> {
    (
        prop::option::of(arb_message_id()),
        prop::option::of(arb_temp_id()),
        arb_user_id(),
        arb_user_id(),
        arb_body(),
        arb_timestamp(),
        any::<bool>(),
        arb_reply(),
    )
        .prop_map(
            |(id, temp_id, sender_id, receiver_id, body, created_at, is_read, reply_to)| {
                ChatMessage {
                    id,
                    temp_id,
                    sender_id,
                    receiver_id,
                    body,
                    created_at,
                    is_read,
                    reply_to,
                }
            },
        )
}

/// Strategy for generating arbitrary `ClientIntent` values.
fn arb_intent() -> impl Strategy<Value = ClientIntent> {
    prop_oneof![
        arb_user_id().prop_map(|user_id| ClientIntent::Announce { user_id }),
        (
            arb_temp_id(),
            arb_user_id(),
            arb_user_id(),
            arb_body(),
            prop::option::of(arb_message_id())
        )
            .prop_map(|(temp_id, sender_id, receiver_id, body, reply_to)| {
                ClientIntent::SendMessage {
                    temp_id,
                    sender_id,
                    receiver_id,
                    body,
                    reply_to,
                }
            }),
        (arb_user_id(), arb_user_id()).prop_map(|(reader_id, sender_id)| {
            ClientIntent::MarkRead {
                reader_id,
                sender_id,
            }
        }),
        arb_message_id().prop_map(|message_id| ClientIntent::DeleteMessage { message_id }),
        (arb_user_id(), arb_user_id()).prop_map(|(sender_id, receiver_id)| {
            ClientIntent::Typing {
                sender_id,
                receiver_id,
            }
        }),
        (arb_user_id(), arb_user_id()).prop_map(|(sender_id, receiver_id)| {
            ClientIntent::StopTyping {
                sender_id,
                receiver_id,
            }
        }),
    ]
}

/// Strategy for generating arbitrary `ServerEvent` values.
fn arb_event() -> impl Strategy<Value = ServerEvent> {
    prop_oneof![
        arb_chat_message().prop_map(ServerEvent::MessageReceived),
        (arb_temp_id(), arb_chat_message()).prop_map(|(temp_id, message)| {
            ServerEvent::MessageConfirmed { temp_id, message }
        }),
        arb_message_id().prop_map(|message_id| ServerEvent::MessageDeleted { message_id }),
        arb_user_id().prop_map(|reader_id| ServerEvent::MessagesRead { reader_id }),
        (arb_user_id(), any::<bool>(), prop::option::of(arb_timestamp())).prop_map(
            |(user_id, is_online, last_seen)| ServerEvent::PresenceChanged {
                user_id,
                is_online,
                last_seen,
            }
        ),
        arb_user_id().prop_map(|sender_id| ServerEvent::TypingStarted { sender_id }),
        arb_user_id().prop_map(|sender_id| ServerEvent::TypingStopped { sender_id }),
    ]
}

// --- Property tests ---

proptest! {
    /// Any valid ChatMessage survives an encode → decode round-trip.
    #[test]
    fn chat_message_round_trip(msg in arb_chat_message()) {
        let event = ServerEvent::MessageReceived(msg);
        let bytes = codec::encode_event(&event).expect("encode should succeed");
        let decoded = codec::decode_event(&bytes).expect("decode should succeed");
        prop_assert_eq!(event, decoded);
    }

    /// Any valid ClientIntent survives an encode → decode round-trip.
    #[test]
    fn client_intent_round_trip(intent in arb_intent()) {
        let bytes = codec::encode_intent(&intent).expect("encode should succeed");
        let decoded = codec::decode_intent(&bytes).expect("decode should succeed");
        prop_assert_eq!(intent, decoded);
    }

    /// Any valid ServerEvent survives an encode → decode round-trip.
    #[test]
    fn server_event_round_trip(event in arb_event()) {
        let bytes = codec::encode_event(&event).expect("encode should succeed");
        let decoded = codec::decode_event(&bytes).expect("decode should succeed");
        prop_assert_eq!(event, decoded);
    }

    /// ChatMessage also survives the JSON path used by the HTTP API.
    #[test]
    fn chat_message_json_round_trip(msg in arb_chat_message()) {
        let json = serde_json::to_string(&msg).expect("serialize should succeed");
        let decoded: ChatMessage = serde_json::from_str(&json).expect("deserialize should succeed");
        prop_assert_eq!(msg, decoded);
    }

    /// Random bytes never cause a panic when decoded as an event.
    #[test]
    fn random_bytes_decode_event_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        // We don't care if it returns Ok or Err, just that it doesn't panic.
        let _ = codec::decode_event(&bytes);
    }

    /// Random bytes never cause a panic when decoded as an intent.
    #[test]
    fn random_bytes_decode_intent_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_intent(&bytes);
    }
}
