// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format encoding/decoding for the agent protocol.
//!
//! Every frame is `op_code:u8 || body`, little-endian, with length-prefixed
//! byte strings. After a `Report` frame the sender streams exactly
//! `size` raw bytes on the same connection; those bytes are not framed.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use thiserror::Error;

use crate::status::Status;

/// Length of the authentication payload: the random challenge on the way
/// out, the hex HMAC digest on the way back. Both are exactly 128 bytes.
pub const CHALLENGE_LEN: usize = 128;

/// Ceiling for any variable-length field (the u32 alias length is the only
/// one that can claim more).
pub const MAX_FIELD_LEN: usize = 64 * 1024;

/// Chunk size used when streaming report payloads.
pub const REPORT_CHUNK: usize = 1024;

const OP_AUTH: u8 = 0x01;
const OP_READY: u8 = 0x02;
const OP_COMMAND: u8 = 0x03;
const OP_STATUS: u8 = 0x04;
const OP_REPORT: u8 = 0x05;

/// Protocol errors. Callers treat any of these as a disconnect.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Unknown op code: {0:#04x}")]
    UnknownOp(u8),

    #[error("Unknown status byte: {0:#04x}")]
    UnknownStatus(u8),

    #[error("Field too large: {len} bytes (max {max})")]
    FieldTooLarge { len: usize, max: usize },

    #[error("Invalid text field: {0}")]
    InvalidText(#[from] std::string::FromUtf8Error),
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Challenge (server to agent) or digest (agent to server).
    Auth(Vec<u8>),
    /// Agent asks for work, advertising its uid and session alias.
    Ready { uid: u8, alias: String },
    /// One scan task. An empty target means the scan is over.
    Command { target: String, options: String },
    /// Framed status, used for the Discovery back-off and finish signals.
    Status(Status),
    /// Report transfer announcement; `size` raw bytes follow the frame.
    Report {
        filename: String,
        hash: String,
        size: u32,
    },
}

impl Message {
    /// Encode the frame, op code first.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Message::Auth(payload) => {
                if payload.len() != CHALLENGE_LEN {
                    return Err(ProtocolError::FieldTooLarge {
                        len: payload.len(),
                        max: CHALLENGE_LEN,
                    });
                }
                let mut buf = Vec::with_capacity(1 + CHALLENGE_LEN);
                buf.push(OP_AUTH);
                buf.extend_from_slice(payload);
                Ok(buf)
            }
            Message::Ready { uid, alias } => {
                let alias = alias.as_bytes();
                check_len(alias.len(), MAX_FIELD_LEN)?;
                let mut buf = Vec::with_capacity(6 + alias.len());
                buf.push(OP_READY);
                buf.push(*uid);
                buf.extend_from_slice(&(alias.len() as u32).to_le_bytes());
                buf.extend_from_slice(alias);
                Ok(buf)
            }
            Message::Command { target, options } => {
                let target = target.as_bytes();
                let options = options.as_bytes();
                check_len(target.len(), u8::MAX as usize)?;
                check_len(options.len(), u8::MAX as usize)?;
                let mut buf = Vec::with_capacity(3 + target.len() + options.len());
                buf.push(OP_COMMAND);
                buf.push(target.len() as u8);
                buf.push(options.len() as u8);
                buf.extend_from_slice(target);
                buf.extend_from_slice(options);
                Ok(buf)
            }
            Message::Status(status) => Ok(vec![OP_STATUS, status.as_byte()]),
            Message::Report {
                filename,
                hash,
                size,
            } => {
                let filename = filename.as_bytes();
                let hash = hash.as_bytes();
                check_len(filename.len(), u8::MAX as usize)?;
                check_len(hash.len(), u8::MAX as usize)?;
                let mut buf = Vec::with_capacity(7 + filename.len() + hash.len());
                buf.push(OP_REPORT);
                buf.push(filename.len() as u8);
                buf.push(hash.len() as u8);
                buf.extend_from_slice(&size.to_le_bytes());
                buf.extend_from_slice(filename);
                buf.extend_from_slice(hash);
                Ok(buf)
            }
        }
    }
}

fn check_len(len: usize, max: usize) -> Result<(), ProtocolError> {
    if len > max {
        return Err(ProtocolError::FieldTooLarge { len, max });
    }
    Ok(())
}

/// Read exactly `buf.len()` bytes, mapping a clean EOF to `ConnectionClosed`.
async fn read_exact<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), ProtocolError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => Err(ProtocolError::Io(e)),
    }
}

async fn read_u8<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<u8, ProtocolError> {
    let mut byte = [0u8; 1];
    read_exact(reader, &mut byte).await?;
    Ok(byte[0])
}

async fn read_u32_le<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<u32, ProtocolError> {
    let mut bytes = [0u8; 4];
    read_exact(reader, &mut bytes).await?;
    Ok(u32::from_le_bytes(bytes))
}

async fn read_text<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    len: usize,
) -> Result<String, ProtocolError> {
    let mut buf = vec![0u8; len];
    read_exact(reader, &mut buf).await?;
    Ok(String::from_utf8(buf)?)
}

/// Read one framed message: one op byte, then the exact body for that op.
pub async fn read_message<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Message, ProtocolError> {
    let op = read_u8(reader).await?;
    match op {
        OP_AUTH => {
            let mut payload = vec![0u8; CHALLENGE_LEN];
            read_exact(reader, &mut payload).await?;
            Ok(Message::Auth(payload))
        }
        OP_READY => {
            let uid = read_u8(reader).await?;
            let alias_len = read_u32_le(reader).await? as usize;
            check_len(alias_len, MAX_FIELD_LEN)?;
            let alias = read_text(reader, alias_len).await?;
            Ok(Message::Ready { uid, alias })
        }
        OP_COMMAND => {
            let target_len = read_u8(reader).await? as usize;
            let options_len = read_u8(reader).await? as usize;
            let target = read_text(reader, target_len).await?;
            let options = read_text(reader, options_len).await?;
            Ok(Message::Command { target, options })
        }
        OP_STATUS => {
            let byte = read_u8(reader).await?;
            let status = Status::from_byte(byte).ok_or(ProtocolError::UnknownStatus(byte))?;
            Ok(Message::Status(status))
        }
        OP_REPORT => {
            let name_len = read_u8(reader).await? as usize;
            let hash_len = read_u8(reader).await? as usize;
            let size = read_u32_le(reader).await?;
            let filename = read_text(reader, name_len).await?;
            let hash = read_text(reader, hash_len).await?;
            Ok(Message::Report {
                filename,
                hash,
                size,
            })
        }
        other => Err(ProtocolError::UnknownOp(other)),
    }
}

/// Read one bare status byte (used after auth, after a `COMMAND`, and after
/// a report transfer; this is not a framed `STATUS` message).
pub async fn read_status<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Status, ProtocolError> {
    let byte = read_u8(reader).await?;
    Status::from_byte(byte).ok_or(ProtocolError::UnknownStatus(byte))
}

/// Encode and write one framed message.
pub async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), ProtocolError> {
    let bytes = message.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Write one bare status byte.
pub async fn write_status<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    status: Status,
) -> Result<(), ProtocolError> {
    writer.write_all(&[status.as_byte()]).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
