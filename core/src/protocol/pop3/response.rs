/*
 * response.rs
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

//! POP3 reply parsing: status lines, extended response codes, dot-unstuffing,
//! and the single-line payloads of STAT, LIST and UIDL. No I/O.

use super::error::Pop3Error;

/// Classification of one status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// `+OK`
    Ok,
    /// `-ERR`
    Error,
    /// `+ ` continuation (SASL challenge).
    Continue,
    /// Anything else; the raw line is kept as the text.
    ProtocolError,
}

/// Parsed status line: status plus trailing text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub status: Status,
    pub text: String,
}

impl StatusLine {
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Extended response codes (RFC 2449 section 8, RFC 3206).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    InUse,
    LoginDelay,
    SysTemp,
    SysPerm,
    Auth,
    Other(String),
}

impl ResponseCode {
    fn from_token(token: &str) -> Self {
        match token.to_uppercase().as_str() {
            "IN-USE" => ResponseCode::InUse,
            "LOGIN-DELAY" => ResponseCode::LoginDelay,
            "SYS/TEMP" => ResponseCode::SysTemp,
            "SYS/PERM" => ResponseCode::SysPerm,
            "AUTH" => ResponseCode::Auth,
            _ => ResponseCode::Other(token.to_string()),
        }
    }
}

/// Match `token` at the start of `line`, case-insensitively, followed by end of line or a space.
fn strip_token<'a>(line: &'a str, token: &str) -> Option<&'a str> {
    if line.len() < token.len() || !line.is_char_boundary(token.len()) {
        return None;
    }
    let (head, rest) = line.split_at(token.len());
    if !head.eq_ignore_ascii_case(token) {
        return None;
    }
    if rest.is_empty() {
        Some(rest)
    } else if rest.starts_with(' ') || rest.starts_with('\t') {
        Some(&rest[1..])
    } else {
        None
    }
}

/// Classify one reply line (line terminator already removed).
pub fn parse_status(line: &str) -> StatusLine {
    if let Some(rest) = strip_token(line, "+OK") {
        return StatusLine { status: Status::Ok, text: rest.to_string() };
    }
    if let Some(rest) = strip_token(line, "-ERR") {
        return StatusLine { status: Status::Error, text: rest.to_string() };
    }
    if let Some(rest) = strip_token(line, "+") {
        return StatusLine { status: Status::Continue, text: rest.to_string() };
    }
    StatusLine { status: Status::ProtocolError, text: line.to_string() }
}

/// Split a leading `[CODE]` off reply text.
pub fn split_response_code(text: &str) -> (Option<ResponseCode>, &str) {
    let trimmed = text.trim_start();
    if let Some(inner) = trimmed.strip_prefix('[') {
        if let Some(end) = inner.find(']') {
            let token = inner[..end].trim();
            if !token.is_empty() {
                return (Some(ResponseCode::from_token(token)), inner[end + 1..].trim_start());
            }
        }
    }
    (None, text)
}

/// Dot-unstuff one line of a multi-line block. Returns None for the terminator.
pub fn unstuff(line: &str) -> Option<&str> {
    if line == "." {
        None
    } else if let Some(rest) = line.strip_prefix('.') {
        Some(rest)
    } else {
        Some(line)
    }
}

/// APOP timestamp from the greeting, angle brackets included.
pub fn extract_apop_token(greeting: &str) -> Option<String> {
    let start = greeting.find('<')?;
    let len = greeting[start..].find('>')?;
    let token = &greeting[start..=start + len];
    if token.len() <= 2 || token[1..token.len() - 1].contains(['<', ' ']) {
        return None;
    }
    Some(token.to_string())
}

fn parse_seq(token: Option<&str>, what: &str, raw: &str) -> Result<u32, Pop3Error> {
    match token.and_then(|t| t.parse::<u32>().ok()) {
        Some(n) if n > 0 => Ok(n),
        _ => Err(Pop3Error::protocol(format!("bad {} message number: {:?}", what, raw))),
    }
}

/// STAT payload: "count size".
pub fn parse_stat(text: &str) -> Result<(u32, u64), Pop3Error> {
    let mut parts = text.split_whitespace();
    let count = parts.next().and_then(|s| s.parse::<u32>().ok());
    let size = parts.next().and_then(|s| s.parse::<u64>().ok());
    match (count, size) {
        (Some(count), Some(size)) => Ok((count, size)),
        _ => Err(Pop3Error::protocol(format!("bad STAT reply: {:?}", text))),
    }
}

/// LIST payload: "seq size".
pub fn parse_list_entry(text: &str) -> Result<(u32, u64), Pop3Error> {
    let mut parts = text.split_whitespace();
    let seq = parse_seq(parts.next(), "LIST", text)?;
    let size = parts
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| Pop3Error::protocol(format!("bad LIST size: {:?}", text)))?;
    Ok((seq, size))
}

/// UIDL payload: "seq uid". A UID is 1..70 characters in 0x21..0x7E, but
/// servers exceed the length limit often enough that only the charset is checked.
pub fn parse_uidl_entry(text: &str) -> Result<(u32, String), Pop3Error> {
    let mut parts = text.split_whitespace();
    let seq = parse_seq(parts.next(), "UIDL", text)?;
    let uid = parts
        .next()
        .filter(|u| u.bytes().all(|b| (0x21..=0x7e).contains(&b)))
        .ok_or_else(|| Pop3Error::protocol(format!("bad UIDL entry: {:?}", text)))?;
    Ok((seq, uid.to_string()))
}
