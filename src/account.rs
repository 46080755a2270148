use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::AuthError;

pub const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";
pub const OUTLOOK_IMAP_HOST: &str = "outlook.office365.com";
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// How an account's mailbox is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionType {
    /// Generic IMAP server taken from the account's host.
    Imap,
    /// IMAP against Microsoft's hosted endpoint.
    Outlook,
    /// Gmail REST API with an OAuth access token.
    VendorApi,
    /// Stored value we don't know how to handle. Kept so the account still
    /// shows up in run results instead of vanishing.
    Unsupported(String),
}

impl ConnectionType {
    pub fn as_str(&self) -> &str {
        match self {
            ConnectionType::Imap => "IMAP",
            ConnectionType::Outlook => "OUTLOOK",
            ConnectionType::VendorApi => "VENDOR_API",
            ConnectionType::Unsupported(raw) => raw,
        }
    }
}

impl FromStr for ConnectionType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "IMAP" => ConnectionType::Imap,
            "OUTLOOK" => ConnectionType::Outlook,
            "VENDOR_API" | "GMAIL" | "GMAIL_API" => ConnectionType::VendorApi,
            _ => ConnectionType::Unsupported(s.to_string()),
        })
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured mailbox, as handed out by the config store.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub id: i32,
    pub email_address: String,
    pub connection_type: ConnectionType,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_token: Option<String>,
}

/// Resolved network endpoint for the IMAP variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ImapCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for ImapCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl AccountConfig {
    /// Outlook always goes to its hosted endpoint; plain IMAP uses the
    /// configured host, falling back to Gmail's IMAP server.
    pub fn imap_endpoint(&self) -> ImapEndpoint {
        let host = match self.connection_type {
            ConnectionType::Outlook => OUTLOOK_IMAP_HOST.to_string(),
            _ => non_empty(&self.host).unwrap_or(DEFAULT_IMAP_HOST).to_string(),
        };

        ImapEndpoint {
            host,
            port: self.port.unwrap_or(DEFAULT_IMAP_PORT),
            tls: self.tls.unwrap_or(true),
        }
    }

    /// Username wins over the email address as login name.
    pub fn imap_credentials(&self) -> Result<ImapCredentials, AuthError> {
        let user = non_empty(&self.username)
            .or_else(|| Some(self.email_address.trim()).filter(|e| !e.is_empty()))
            .ok_or_else(|| AuthError::MissingCredentials("no username or email address".into()))?;

        let password = self
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AuthError::MissingCredentials(format!("no password for {}", user)))?;

        Ok(ImapCredentials {
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    pub fn api_token(&self) -> Result<&str, AuthError> {
        non_empty(&self.api_token).ok_or_else(|| {
            AuthError::MissingCredentials(format!("no API token for {}", self.email_address))
        })
    }
}
