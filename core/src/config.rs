/*
 * config.rs
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

//! Account configuration: server, transport security and which
//! authentication strategies may be used. Stored as XML:
//!
//! ```xml
//! <pop3 host="mail.example.com" port="110" security="starttls" username="me" apop="true">
//!   <mechanism>SCRAM-SHA-256</mechanism>
//!   <mechanism>CRAM-MD5</mechanism>
//! </pop3>
//! ```
//!
//! All XML read/write uses the quick_xml parser/writer; no regex or hand parsing.
//! Credentials are never part of the configuration (see `credentials`).

use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::sasl::{SaslMechanism, PREFERENCE};
use crate::uri::{parse_pop3_uri, pop3_uri};

/// Transport security for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// Plain TCP throughout.
    None,
    /// Plain TCP, upgraded with STLS before authenticating.
    StartTls,
    /// Implicit TLS (pop3s).
    Tls,
}

impl Security {
    pub fn default_port(self) -> u16 {
        match self {
            Security::Tls => 995,
            Security::None | Security::StartTls => 110,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Security::None => "none",
            Security::StartTls => "starttls",
            Security::Tls => "tls",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" | "plain" => Some(Security::None),
            "starttls" | "stls" => Some(Security::StartTls),
            "tls" | "ssl" => Some(Security::Tls),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pop3Config {
    pub host: String,
    pub port: u16,
    pub security: Security,
    /// Account name; also part of the credential lookup key when set.
    pub username: Option<String>,
    /// Use APOP when the greeting offers it.
    pub enable_apop: bool,
    /// SASL mechanisms the client may use. The client's own preference order
    /// still decides between them.
    pub sasl_mechanisms: Vec<SaslMechanism>,
}

impl Pop3Config {
    pub fn new(host: impl Into<String>, security: Security) -> Self {
        Self {
            host: host.into(),
            port: security.default_port(),
            security,
            username: None,
            enable_apop: true,
            sasl_mechanisms: PREFERENCE.to_vec(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Mailbox URL naming this account; the credential lookup key.
    pub fn uri(&self) -> String {
        pop3_uri(self.username.as_deref(), &self.host, self.port, self.security)
    }

    /// Configuration from a pop3:// or pop3s:// URL.
    pub fn from_uri(uri: &str) -> Option<Self> {
        let parsed = parse_pop3_uri(uri)?;
        let mut config = Pop3Config::new(parsed.host, parsed.security);
        config.port = parsed.port;
        config.username = parsed.username;
        Some(config)
    }

    /// Parse the `<pop3>` element. Mechanism children, when present, replace
    /// the default list.
    pub fn from_xml(content: &str) -> Result<Self, String> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let mut config: Option<Pop3Config> = None;
        let mut mechanisms = Vec::new();
        let mut in_mechanism = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Err(e) => return Err(format!("XML parse error: {}", e)),
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    let name = e.name();
                    if name.as_ref() == b"pop3" {
                        config = Some(config_from_attributes(&e)?);
                    } else if name.as_ref() == b"mechanism" {
                        in_mechanism = true;
                    }
                }
                Ok(Event::Text(e)) => {
                    if !in_mechanism {
                        continue;
                    }
                    let text = e.unescape().map_err(|e| e.to_string())?;
                    let mechanism = SaslMechanism::from_name(&text)
                        .ok_or_else(|| format!("unknown SASL mechanism: {}", text))?;
                    if !mechanisms.contains(&mechanism) {
                        mechanisms.push(mechanism);
                    }
                }
                Ok(Event::End(e)) => {
                    if e.name().as_ref() == b"mechanism" {
                        in_mechanism = false;
                    }
                }
                _ => {}
            }
            buf.clear();
        }
        let mut config = config.ok_or("missing <pop3> element")?;
        if !mechanisms.is_empty() {
            config.sasl_mechanisms = mechanisms;
        }
        Ok(config)
    }

    pub fn to_xml(&self) -> Result<Vec<u8>, String> {
        let mut out = Vec::new();
        let mut writer = Writer::new_with_indent(&mut out, b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| e.to_string())?;
        let port = self.port.to_string();
        let mut start = BytesStart::new("pop3");
        start.push_attribute(("host", self.host.as_str()));
        start.push_attribute(("port", port.as_str()));
        start.push_attribute(("security", self.security.name()));
        if let Some(username) = &self.username {
            start.push_attribute(("username", username.as_str()));
        }
        start.push_attribute(("apop", if self.enable_apop { "true" } else { "false" }));
        writer.write_event(Event::Start(start)).map_err(|e| e.to_string())?;
        for m in &self.sasl_mechanisms {
            writer
                .write_event(Event::Start(BytesStart::new("mechanism")))
                .map_err(|e| e.to_string())?;
            writer
                .write_event(Event::Text(BytesText::new(m.name())))
                .map_err(|e| e.to_string())?;
            writer
                .write_event(Event::End(BytesEnd::new("mechanism")))
                .map_err(|e| e.to_string())?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("pop3")))
            .map_err(|e| e.to_string())?;
        Ok(out)
    }
}

fn config_from_attributes(e: &BytesStart<'_>) -> Result<Pop3Config, String> {
    let mut host = None;
    let mut port = None;
    let mut security = Security::None;
    let mut username = None;
    let mut enable_apop = true;
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        match attr.key.as_ref() {
            b"host" => host = Some(value.trim().to_string()),
            b"port" => {
                port = Some(
                    value
                        .trim()
                        .parse::<u16>()
                        .map_err(|_| format!("invalid port: {}", value))?,
                )
            }
            b"security" => {
                security = Security::from_name(&value)
                    .ok_or_else(|| format!("invalid security: {}", value))?
            }
            b"username" => username = Some(value.to_string()).filter(|u| !u.is_empty()),
            b"apop" => enable_apop = matches!(value.trim(), "true" | "yes" | "1"),
            _ => {}
        }
    }
    let host = host.filter(|h| !h.is_empty()).ok_or("missing host attribute")?;
    let mut config = Pop3Config::new(host, security);
    if let Some(port) = port {
        config.port = port;
    }
    config.username = username;
    config.enable_apop = enable_apop;
    Ok(config)
}

/// Default config directory: ~/.apribuste.
pub fn default_config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from).map(|h| h.join(".apribuste"))
}

/// Default account file: ~/.apribuste/pop3.xml.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|d| d.join("pop3.xml"))
}

pub fn load_config(path: &Path) -> Result<Pop3Config, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    Pop3Config::from_xml(&content)
}

pub fn save_config(path: &Path, config: &Pop3Config) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let bytes = config.to_xml()?;
    fs::write(path, bytes).map_err(|e| format!("{}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_security() {
        let c = Pop3Config::new("mail.example.com", Security::Tls);
        assert_eq!(c.port, 995);
        assert!(c.enable_apop);
        assert_eq!(c.sasl_mechanisms, PREFERENCE.to_vec());
        assert_eq!(Pop3Config::new("h", Security::StartTls).port, 110);
    }

    #[test]
    fn parse_full_element() {
        let xml = r#"<?xml version="1.0"?>
            <pop3 host="mail.example.com" port="1110" security="starttls" username="me" apop="false">
              <mechanism>CRAM-MD5</mechanism>
              <mechanism>plain</mechanism>
            </pop3>"#;
        let c = Pop3Config::from_xml(xml).unwrap();
        assert_eq!(c.host, "mail.example.com");
        assert_eq!(c.port, 1110);
        assert_eq!(c.security, Security::StartTls);
        assert_eq!(c.username.as_deref(), Some("me"));
        assert!(!c.enable_apop);
        assert_eq!(c.sasl_mechanisms, vec![SaslMechanism::CramMd5, SaslMechanism::Plain]);
        assert_eq!(c.uri(), "pop3://me@mail.example.com:1110");
    }

    #[test]
    fn empty_element_uses_defaults() {
        let c = Pop3Config::from_xml(r#"<pop3 host="h" security="tls"/>"#).unwrap();
        assert_eq!(c.port, 995);
        assert_eq!(c.username, None);
        assert_eq!(c.sasl_mechanisms.len(), PREFERENCE.len());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Pop3Config::from_xml(r#"<pop3 port="110"/>"#).is_err());
        assert!(Pop3Config::from_xml(r#"<pop3 host="h" port="99999"/>"#).is_err());
        assert!(Pop3Config::from_xml(r#"<pop3 host="h" security="quantum"/>"#).is_err());
        assert!(Pop3Config::from_xml(r#"<pop3 host="h"><mechanism>GSSAPI</mechanism></pop3>"#).is_err());
        assert!(Pop3Config::from_xml("<imap/>").is_err());
    }

    #[test]
    fn xml_round_trip() {
        let mut c = Pop3Config::new("mail.example.com", Security::StartTls).with_username("a&b");
        c.enable_apop = false;
        c.sasl_mechanisms = vec![SaslMechanism::ScramSha256];
        let xml = String::from_utf8(c.to_xml().unwrap()).unwrap();
        assert_eq!(Pop3Config::from_xml(&xml).unwrap(), c);
    }

    #[test]
    fn from_uri() {
        let c = Pop3Config::from_uri("pop3s://me@mail.example.com").unwrap();
        assert_eq!(c.security, Security::Tls);
        assert_eq!(c.port, 995);
        assert_eq!(c.username.as_deref(), Some("me"));
    }
}
