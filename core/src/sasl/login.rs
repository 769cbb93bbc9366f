/*
 * login.rs
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

//! Legacy LOGIN: first challenge is "Username:", second is "Password:".

use super::{SaslClient, SaslError, SaslMechanism};

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Username,
    Password,
    Done,
}

pub struct Login {
    username: String,
    password: String,
    state: State,
}

impl Login {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            state: State::Username,
        }
    }
}

impl SaslClient for Login {
    fn mechanism(&self) -> SaslMechanism {
        SaslMechanism::Login
    }

    fn is_authenticated(&self) -> bool {
        self.state == State::Done
    }

    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        // Prompts are advisory; some servers send none at all. Order decides.
        let prompt = String::from_utf8_lossy(challenge).to_lowercase();
        match self.state {
            State::Username => {
                if prompt.contains("password") {
                    return Err(SaslError::InvalidChallenge("LOGIN asked for password first"));
                }
                self.state = State::Password;
                Ok(self.username.as_bytes().to_vec())
            }
            State::Password => {
                self.state = State::Done;
                Ok(self.password.as_bytes().to_vec())
            }
            State::Done => Err(SaslError::Completed("LOGIN")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_then_password() {
        let mut l = Login::new("tim", "tanstaaf");
        assert_eq!(l.step(b"Username:").unwrap(), b"tim".to_vec());
        assert!(!l.is_authenticated());
        assert_eq!(l.step(b"Password:").unwrap(), b"tanstaaf".to_vec());
        assert!(l.is_authenticated());
        assert!(l.step(b"").is_err());
    }

    #[test]
    fn password_prompt_first_is_rejected() {
        let mut l = Login::new("tim", "tanstaaf");
        assert!(matches!(l.step(b"Password:"), Err(SaslError::InvalidChallenge(_))));
    }
}
