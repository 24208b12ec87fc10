// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

async fn round_trip(message: Message) -> Message {
    let bytes = message.encode().unwrap();
    let mut reader = bytes.as_slice();
    let decoded = read_message(&mut reader).await.unwrap();
    assert!(reader.is_empty(), "decoder must consume the exact body");
    decoded
}

#[tokio::test]
async fn auth_round_trip() {
    let payload: Vec<u8> = (0..CHALLENGE_LEN as u8).map(|b| b.wrapping_mul(3)).collect();
    let message = Message::Auth(payload);
    assert_eq!(round_trip(message.clone()).await, message);
}

#[tokio::test]
async fn ready_round_trip() {
    let message = Message::Ready {
        uid: 0,
        alias: "QWERTY".to_string(),
    };
    assert_eq!(round_trip(message.clone()).await, message);
}

#[tokio::test]
async fn command_round_trip() {
    let message = Message::Command {
        target: "10.16.0.0/24".to_string(),
        options: "-sV -Pn --top-ports 1000".to_string(),
    };
    assert_eq!(round_trip(message.clone()).await, message);
}

#[tokio::test]
async fn status_round_trip() {
    for status in [
        Status::Success,
        Status::Unauthorized,
        Status::Finished,
        Status::Unfinished,
        Status::Failed,
    ] {
        assert_eq!(round_trip(Message::Status(status)).await, Message::Status(status));
    }
}

#[tokio::test]
async fn report_round_trip() {
    let message = Message::Report {
        filename: "10.16.0.0-24.xml".to_string(),
        hash: "ab".repeat(64),
        size: 4096,
    };
    assert_eq!(round_trip(message.clone()).await, message);
}

#[tokio::test]
async fn command_wire_layout() {
    // Byte-for-byte layout: op, target_len, options_len, target, options.
    let message = Message::Command {
        target: "127.0.0.1".to_string(),
        options: "-sV -Pn -p1-1000".to_string(),
    };
    let bytes = message.encode().unwrap();
    assert_eq!(bytes, b"\x03\x09\x10127.0.0.1-sV -Pn -p1-1000");
}

#[tokio::test]
async fn unknown_op_is_rejected() {
    let mut reader: &[u8] = &[0x7F, 0x00, 0x00];
    let err = read_message(&mut reader).await.unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownOp(0x7F)));
}

#[tokio::test]
async fn truncated_body_reads_as_disconnect() {
    // A COMMAND that promises 9 target bytes but carries 4.
    let mut reader: &[u8] = &[0x03, 0x09, 0x00, b'1', b'2', b'7', b'.'];
    let err = read_message(&mut reader).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[tokio::test]
async fn oversized_alias_is_rejected() {
    let mut frame = vec![0x02, 0x00];
    frame.extend_from_slice(&(MAX_FIELD_LEN as u32 + 1).to_le_bytes());
    let mut reader = frame.as_slice();
    let err = read_message(&mut reader).await.unwrap_err();
    assert!(matches!(err, ProtocolError::FieldTooLarge { .. }));
}

#[tokio::test]
async fn auth_payload_length_is_fixed() {
    let err = Message::Auth(vec![0u8; 12]).encode().unwrap_err();
    assert!(matches!(err, ProtocolError::FieldTooLarge { .. }));
}

#[tokio::test]
async fn empty_read_is_disconnect() {
    let mut reader: &[u8] = &[];
    let err = read_status(&mut reader).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[tokio::test]
async fn bare_status_round_trip() {
    let mut buf = Vec::new();
    write_status(&mut buf, Status::Unfinished).await.unwrap();
    assert_eq!(buf, vec![0x03]);
    let mut reader = buf.as_slice();
    assert_eq!(read_status(&mut reader).await.unwrap(), Status::Unfinished);
}
