/*
 * lib.rs
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

//! Apribuste core: a pipelined POP3 client.
//!
//! ```no_run
//! use apribuste_core::config::{Pop3Config, Security};
//! use apribuste_core::credentials::StaticCredentials;
//! use apribuste_core::protocol::pop3::Pop3Client;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), apribuste_core::protocol::pop3::Pop3Error> {
//! let cancel = CancellationToken::new();
//! let config = Pop3Config::new("mail.example.com", Security::Tls).with_username("me");
//! let mut client = Pop3Client::connect(&config, &cancel).await?;
//! client.authenticate(&StaticCredentials::new("me", "secret"), &cancel).await?;
//! for index in 0..client.count() as usize {
//!     let message = client.get_message(index, &cancel).await?;
//!     println!("{} octets", message.len());
//! }
//! client.disconnect(true, &cancel).await
//! # }
//! ```

pub mod config;
pub mod credentials;
pub mod net;
pub mod protocol;
pub mod sasl;
pub mod uri;
