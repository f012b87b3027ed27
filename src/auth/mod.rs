//! Upstream API key storage in the system keyring, plus the interactive
//! `auth` / `deauth` flows.

use std::io::{self, BufRead, Write};

use keyring::Entry;
use tracing::debug;

use crate::core::constants::{KEYRING_SERVICE, KEYRING_USER};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("API key cannot be empty")]
    EmptyToken,

    #[error("invalid confirmation response: {0}")]
    InvalidConfirmation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationChoice {
    Yes,
    No,
}

pub struct AuthManager {
    service: String,
    user: String,
    use_keyring: bool,
}

impl AuthManager {
    pub fn new() -> Self {
        Self::new_with_keyring(true)
    }

    /// Construct an AuthManager, optionally disabling keyring access (useful for tests)
    pub fn new_with_keyring(use_keyring: bool) -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
            user: KEYRING_USER.to_string(),
            use_keyring,
        }
    }

    fn entry(&self) -> keyring::Result<Entry> {
        Entry::new(&self.service, &self.user)
    }

    pub fn get_token(&self) -> keyring::Result<Option<String>> {
        if !self.use_keyring {
            return Ok(None);
        }
        match self.entry()?.get_password() {
            Ok(token) => {
                debug!(service = %self.service, "API key found in keyring");
                Ok(Some(token))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn store_token(&self, token: &str) -> keyring::Result<()> {
        if !self.use_keyring {
            return Ok(());
        }
        self.entry()?.set_password(token)
    }

    /// Returns false when there was nothing stored.
    pub fn remove_token(&self) -> keyring::Result<bool> {
        if !self.use_keyring {
            return Ok(false);
        }
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn interactive_auth(&self) -> Result<(), AuthError> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        println!("🔐 polychat authentication");
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!();
        println!("The key is stored in your system keyring and used when");
        println!("OPENROUTER_API_KEY is not set.");
        println!();

        let token = prompt_token(&mut stdin.lock(), &mut stdout)?;
        self.store_token(&token)?;
        println!("✅ API key stored.");
        Ok(())
    }

    pub fn interactive_deauth(&self) -> Result<(), AuthError> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        let choice = prompt_confirmation(
            &mut stdin.lock(),
            &mut stdout,
            "Remove the stored OpenRouter API key? (y/N): ",
        )?;
        if choice == ConfirmationChoice::No {
            println!("Cancelled.");
            return Ok(());
        }

        if self.remove_token()? {
            println!("✅ API key removed.");
        } else {
            println!("No stored API key found.");
        }
        Ok(())
    }
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::new()
    }
}

pub fn prompt_token<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> Result<String, AuthError> {
    write!(output, "Enter your OpenRouter API key: ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let token = line.trim();
    if token.is_empty() {
        return Err(AuthError::EmptyToken);
    }
    Ok(token.to_string())
}

pub fn prompt_confirmation<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
) -> Result<ConfirmationChoice, AuthError> {
    write!(output, "{question}")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    parse_confirmation(&line)
}

pub fn parse_confirmation(input: &str) -> Result<ConfirmationChoice, AuthError> {
    let trimmed = input.trim().to_lowercase();
    match trimmed.as_str() {
        "" | "n" | "no" => Ok(ConfirmationChoice::No),
        "y" | "yes" => Ok(ConfirmationChoice::Yes),
        _ => Err(AuthError::InvalidConfirmation(trimmed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn confirmation_parsing_defaults_to_no() {
        assert_eq!(parse_confirmation(" \n").unwrap(), ConfirmationChoice::No);
        assert_eq!(parse_confirmation("YES").unwrap(), ConfirmationChoice::Yes);
        assert!(matches!(
            parse_confirmation("maybe"),
            Err(AuthError::InvalidConfirmation(answer)) if answer == "maybe"
        ));
    }

    #[test]
    fn prompt_token_trims_and_rejects_blank_input() {
        let mut output = Vec::new();
        let token = prompt_token(&mut Cursor::new("  sk-or-v1-abc \n"), &mut output).unwrap();
        assert_eq!(token, "sk-or-v1-abc");
        assert!(String::from_utf8(output).unwrap().contains("API key"));

        let blank = prompt_token(&mut Cursor::new("\n"), &mut Vec::new());
        assert!(matches!(blank, Err(AuthError::EmptyToken)));
    }

    #[test]
    fn disabled_keyring_stores_nothing() {
        let auth = AuthManager::new_with_keyring(false);
        auth.store_token("sk-test").unwrap();
        assert_eq!(auth.get_token().unwrap(), None);
        assert!(!auth.remove_token().unwrap());
    }
}
