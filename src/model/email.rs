// src/model/email.rs

use serde::Deserialize;

/// Named email template. Subject and body accept the same `#TOKEN#`
/// placeholders as task arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EmailTemplate {
    pub name: String,
    pub subject: String,
    pub body: String,

    /// Files attached to every email using this template.
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// SMTP relay credentials for one sender address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SmtpCredential {
    pub email: String,
    pub server: String,
    pub port: u16,

    #[serde(default)]
    pub login: String,

    #[serde(default)]
    pub password: String,
}
