// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dn-core: protocol, task model, and configuration for the dragnet scanner

pub mod auth;
pub mod config;
pub mod message;
pub mod status;
pub mod task;
pub mod tls;

pub use auth::{challenge_digest, derive_secret_key, verify_digest, DIGEST_LEN};
pub use config::{AgentConfig, CommonConfig, Config, ConfigError, ServerConfig, StagePlan};
pub use message::{Message, ProtocolError, CHALLENGE_LEN, MAX_FIELD_LEN};
pub use status::Status;
pub use task::{Task, TaskStatus};
