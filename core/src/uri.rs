/*
 * uri.rs
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

//! Mailbox URLs: pop3://user@host:port, or pop3s:// for implicit TLS
//! (RFC 2384). These name the credential a session authenticates with.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::config::Security;

/// Userinfo in authority: encode @ and other reserved so one @ separates userinfo from host.
const USERINFO: &AsciiSet = &CONTROLS
    .add(b'@')
    .add(b':')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'#')
    .add(b'[')
    .add(b']')
    .add(b' ');

fn scheme(security: Security) -> &'static str {
    match security {
        Security::Tls => "pop3s",
        Security::None | Security::StartTls => "pop3",
    }
}

fn host_part(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

/// POP3 mailbox URL. The username is omitted when not known yet.
pub fn pop3_uri(username: Option<&str>, host: &str, port: u16, security: Security) -> String {
    match username.filter(|u| !u.is_empty()) {
        Some(user) => format!(
            "{}://{}@{}:{}",
            scheme(security),
            utf8_percent_encode(user, USERINFO),
            host_part(host),
            port
        ),
        None => format!("{}://{}:{}", scheme(security), host_part(host), port),
    }
}

/// Components of a parsed POP3 URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pop3Uri {
    pub username: Option<String>,
    pub host: String,
    pub port: u16,
    /// Tls for pop3s, otherwise None; STARTTLS is not expressed in the URL.
    pub security: Security,
}

/// Parse pop3://[user@]host[:port] or pop3s://... . The port defaults per scheme.
pub fn parse_pop3_uri(uri: &str) -> Option<Pop3Uri> {
    let (security, rest) = if let Some(rest) = uri.strip_prefix("pop3s://") {
        (Security::Tls, rest)
    } else if let Some(rest) = uri.strip_prefix("pop3://") {
        (Security::None, rest)
    } else {
        return None;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let (username, hostport) = match authority.rsplit_once('@') {
        Some((user, hp)) => {
            // ";AUTH=..." selects a mechanism in RFC 2384; only the name is kept.
            let user = user.split(';').next().unwrap_or_default();
            let user = percent_decode_str(user).decode_utf8().ok()?.into_owned();
            (Some(user).filter(|u| !u.is_empty()), hp)
        }
        None => (None, authority),
    };
    let (host, port) = if let Some(v6) = hostport.strip_prefix('[') {
        let (host, after) = v6.split_once(']')?;
        (host, after.strip_prefix(':'))
    } else {
        match hostport.rsplit_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (hostport, None),
        }
    };
    if host.is_empty() {
        return None;
    }
    let port = match port {
        Some(p) => p.parse().ok()?,
        None => security.default_port(),
    };
    Some(Pop3Uri {
        username,
        host: host.to_string(),
        port,
        security,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop3_pop3s_scheme() {
        let u = pop3_uri(Some("user"), "host", 995, Security::Tls);
        assert_eq!(u, "pop3s://user@host:995");
        let u2 = pop3_uri(Some("user"), "host", 110, Security::StartTls);
        assert_eq!(u2, "pop3://user@host:110");
        assert_eq!(pop3_uri(None, "host", 110, Security::None), "pop3://host:110");
    }

    #[test]
    fn userinfo_is_encoded() {
        let u = pop3_uri(Some("me@example.com"), "mail.example.com", 110, Security::None);
        assert_eq!(u, "pop3://me%40example.com@mail.example.com:110");
        let parsed = parse_pop3_uri(&u).unwrap();
        assert_eq!(parsed.username.as_deref(), Some("me@example.com"));
        assert_eq!(parsed.host, "mail.example.com");
    }

    #[test]
    fn parse_defaults_and_ipv6() {
        let p = parse_pop3_uri("pop3s://mail.example.com").unwrap();
        assert_eq!(p.port, 995);
        assert_eq!(p.security, Security::Tls);
        assert_eq!(p.username, None);
        let p = parse_pop3_uri("pop3://rg;AUTH=+APOP@[::1]:1110/").unwrap();
        assert_eq!(p.username.as_deref(), Some("rg"));
        assert_eq!(p.host, "::1");
        assert_eq!(p.port, 1110);
        assert_eq!(pop3_uri(Some("rg"), "::1", 1110, Security::None), "pop3://rg@[::1]:1110");
    }

    #[test]
    fn parse_rejects_other_schemes() {
        assert_eq!(parse_pop3_uri("imap://host:143"), None);
        assert_eq!(parse_pop3_uri("pop3://:110"), None);
        assert_eq!(parse_pop3_uri("pop3://host:notaport"), None);
    }
}
