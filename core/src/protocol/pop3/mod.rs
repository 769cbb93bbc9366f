/*
 * mod.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Apribuste, a POP3 mail retrieval library.
 *
 * Apribuste is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Apribuste is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Apribuste.  If not, see <http://www.gnu.org/licenses/>.
 */

//! POP3 client (RFC 1939, RFC 2449 CAPA, RFC 2595 STLS, RFC 5034 SASL).
//!
//! [`Pop3Client`] is the public surface. Underneath, a single-threaded
//! command queue owns the transport and resolves commands strictly in the
//! order they were queued.

mod auth;
mod capability;
mod client;
mod engine;
mod error;
mod response;
mod session;
mod transport;

pub use auth::apop_digest;
pub use capability::{Capabilities, Capability, CapabilitySet, Expiration};
pub use client::Pop3Client;
pub use engine::{CommandHandle, CommandId, CommandStatus};
pub use error::Pop3Error;
pub use response::{parse_status, split_response_code, unstuff, ResponseCode, Status, StatusLine};
pub use session::SessionState;
pub use transport::{BoxedStream, Pop3Io, TransportMode};
