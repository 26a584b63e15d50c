//! Property-based tests for the backplane envelope codec

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use xfbackplane::backend::protocol::msgpack;
use xfbackplane::backend::protocol::{
    decode_ack, decode_completion, decode_group_command, decode_invocation, encode_ack,
    encode_completion, encode_group_command, encode_invocation, Ack, BackplaneCompletion,
    BackplaneInvocation, GroupAction, GroupCommand,
};
use xfbackplane::shared::{ProtocolError, SerializedMessage};

fn group_action() -> impl Strategy<Value = GroupAction> {
    prop_oneof![Just(GroupAction::Add), Just(GroupAction::Remove)]
}

fn group_command() -> impl Strategy<Value = GroupCommand> {
    (any::<i64>(), ".{0,40}", group_action(), ".{0,40}", ".{0,40}").prop_map(
        |(id, server_name, action, group_name, connection_id)| GroupCommand {
            id,
            server_name,
            action,
            group_name,
            connection_id,
        },
    )
}

fn invocation() -> impl Strategy<Value = BackplaneInvocation> {
    (
        prop::collection::vec("[a-z0-9-]{1,12}", 0..4),
        prop::collection::btree_map("[a-z]{1,10}", prop::collection::vec(any::<u8>(), 0..300), 0..4),
        prop::option::of(("[a-f0-9]{1,32}", ".{0,30}")),
    )
        .prop_map(|(excluded, payloads, routing)| {
            let payloads = payloads
                .into_iter()
                .map(|(name, bytes)| SerializedMessage::new(name, bytes))
                .collect();
            let invocation = BackplaneInvocation::new(excluded, payloads);
            match routing {
                Some((id, channel)) => invocation.with_result_routing(id, channel),
                None => invocation,
            }
        })
}

/// Re-encode an envelope with `extra` unknown values appended
fn with_trailing(envelope: &Bytes, declared: usize, extra: &[i64]) -> Bytes {
    // Every envelope here fits a fixarray header
    assert!(declared + extra.len() <= 15);
    let mut buf = BytesMut::new();
    msgpack::write_array_header(&mut buf, declared + extra.len());
    buf.extend_from_slice(&envelope[1..]);
    for value in extra {
        msgpack::write_int(&mut buf, *value);
    }
    buf.freeze()
}

proptest! {
    #[test]
    fn test_group_command_roundtrip(command in group_command()) {
        let decoded = decode_group_command(encode_group_command(&command)).unwrap();
        prop_assert_eq!(decoded, command);
    }

    #[test]
    fn test_ack_roundtrip(id in any::<i64>()) {
        prop_assert_eq!(decode_ack(encode_ack(Ack { id })).unwrap(), Ack { id });
    }

    #[test]
    fn test_invocation_roundtrip(invocation in invocation()) {
        let decoded = decode_invocation(encode_invocation(&invocation)).unwrap();
        prop_assert_eq!(decoded, invocation);
    }

    #[test]
    fn test_completion_roundtrip(
        protocol_name in "[a-z]{1,12}",
        body in prop::collection::vec(any::<u8>(), 0..70_000),
    ) {
        let completion = BackplaneCompletion { protocol_name, completion: Bytes::from(body) };
        let decoded = decode_completion(encode_completion(&completion)).unwrap();
        prop_assert_eq!(decoded, completion);
    }

    #[test]
    fn test_readers_skip_unknown_trailing_elements(
        command in group_command(),
        id in any::<i64>(),
        extra in prop::collection::vec(any::<i64>(), 1..5),
    ) {
        let padded = with_trailing(&encode_group_command(&command), 5, &extra);
        prop_assert_eq!(decode_group_command(padded).unwrap(), command);

        let padded = with_trailing(&encode_ack(Ack { id }), 1, &extra);
        prop_assert_eq!(decode_ack(padded).unwrap(), Ack { id });
    }

    #[test]
    fn test_short_group_commands_are_rejected(command in group_command(), keep in 0usize..5) {
        let mut buf = BytesMut::new();
        msgpack::write_array_header(&mut buf, keep);
        let fields: [&dyn Fn(&mut BytesMut); 5] = [
            &|b: &mut BytesMut| msgpack::write_int(b, command.id),
            &|b: &mut BytesMut| msgpack::write_str(b, &command.server_name),
            &|b: &mut BytesMut| msgpack::write_int(b, command.action as i64),
            &|b: &mut BytesMut| msgpack::write_str(b, &command.group_name),
            &|b: &mut BytesMut| msgpack::write_str(b, &command.connection_id),
        ];
        for write in fields.iter().take(keep) {
            write(&mut buf);
        }

        let result = decode_group_command(buf.freeze());
        let is_too_short = matches!(result, Err(ProtocolError::ArrayTooShort { .. }));
        prop_assert!(is_too_short);
    }

    #[test]
    fn test_decoders_never_panic_on_arbitrary_input(input in prop::collection::vec(any::<u8>(), 0..256)) {
        let input = Bytes::from(input);
        let _ = decode_invocation(input.clone());
        let _ = decode_group_command(input.clone());
        let _ = decode_ack(input.clone());
        let _ = decode_completion(input);
    }
}
