// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! JSON line protocol for acq-rs.
//!
//! Wire DTOs, envelope parsing, token checks and the mapping from client
//! commands to acquisition controller calls.

pub mod auth;
pub mod codec;
pub mod mapping;
pub mod types;

pub use auth::{NoAuthValidator, SimpleTokenValidator, TokenValidator};
pub use codec::{encode_response, parse_envelope, parse_watch_control};
pub use mapping::{client_command_to_request, ClientRequest};
pub use types::{ClientCommand, ClientEnvelope, ClientResponse, ResponsePayload, WatchControl};
