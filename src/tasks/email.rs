// src/tasks/email.rs

//! EMAIL: send a templated notification.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use tracing::{debug, info};

use crate::engine::ContextResolver;
use crate::model::{EmailTemplate, SmtpCredential};
use crate::store::Store;

use super::args::de;
use super::{RunContext, Task, TaskArgs, TaskError, blocking};

/// A rendered email, ready to hand to a [`Mailer`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    /// `(file name, contents)` pairs.
    pub attachments: Vec<(String, Vec<u8>)>,
}

/// Delivers rendered mail through the sender's SMTP relay.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, relay: &SmtpCredential, mail: OutgoingMail) -> anyhow::Result<()>;
}

/// [`Mailer`] speaking SMTP through `lettre`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpMailer;

fn build_message(mail: OutgoingMail) -> anyhow::Result<Message> {
    let from: Mailbox = mail
        .from
        .parse()
        .with_context(|| format!("invalid sender address {:?}", mail.from))?;
    let mut builder = Message::builder().from(from).subject(mail.subject);
    for to in &mail.to {
        let mailbox: Mailbox = to
            .parse()
            .with_context(|| format!("invalid recipient address {:?}", to))?;
        builder = builder.to(mailbox);
    }

    if mail.attachments.is_empty() {
        return builder
            .singlepart(SinglePart::plain(mail.body))
            .context("building email");
    }

    let octets = ContentType::parse("application/octet-stream").context("attachment content type")?;
    let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(mail.body));
    for (name, contents) in mail.attachments {
        parts = parts.singlepart(Attachment::new(name).body(contents, octets.clone()));
    }
    builder.multipart(parts).context("building email")
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, relay: &SmtpCredential, mail: OutgoingMail) -> anyhow::Result<()> {
        let message = build_message(mail)?;
        let mut transport =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(relay.server.as_str())
                .port(relay.port);
        if !relay.login.is_empty() {
            transport = transport.credentials(Credentials::new(
                relay.login.clone(),
                relay.password.clone(),
            ));
        }
        transport
            .build()
            .send(message)
            .await
            .with_context(|| format!("sending email through {}:{}", relay.server, relay.port))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct EmailArgs {
    #[serde(default)]
    sender: String,
    #[serde(default, deserialize_with = "de::comma_list")]
    recipients: Vec<String>,
    #[serde(default)]
    template: String,
    #[serde(default, deserialize_with = "de::comma_list")]
    attachments: Vec<String>,
}

impl EmailArgs {
    fn parse(args: &TaskArgs) -> Result<Self, TaskError> {
        let raw: EmailArgs = args.decode()?;
        if raw.sender.trim().is_empty() {
            return Err(TaskError::bad_args("missing email sender"));
        }
        if raw.recipients.is_empty() {
            return Err(TaskError::bad_args("missing email recipients"));
        }
        if raw.template.trim().is_empty() {
            return Err(TaskError::bad_args("missing email template"));
        }
        Ok(raw)
    }
}

#[derive(Debug, Default)]
pub struct EmailTask {
    resolved: Option<(EmailTemplate, SmtpCredential)>,
}

impl EmailTask {
    fn resolve(store: &dyn Store, args: &EmailArgs) -> Result<(EmailTemplate, SmtpCredential), TaskError> {
        let template = store
            .email_template(args.template.trim())
            .map_err(TaskError::from_lookup)?;
        let relay = store
            .smtp_credential(args.sender.trim())
            .map_err(TaskError::from_lookup)?;
        Ok((template, relay))
    }
}

fn attachment_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[async_trait]
impl Task for EmailTask {
    fn validate(&mut self, args: &TaskArgs) -> Result<(), TaskError> {
        EmailArgs::parse(args).map(|_| ())
    }

    fn validate_db(&mut self, store: &dyn Store, args: &TaskArgs) -> Result<(), TaskError> {
        let raw = EmailArgs::parse(args)?;
        self.resolved = Some(Self::resolve(store, &raw)?);
        Ok(())
    }

    async fn run(&mut self, cx: RunContext<'_>) -> Result<(), TaskError> {
        let raw = EmailArgs::parse(cx.args)?;
        let (template, relay) = match self.resolved.take() {
            Some(found) => found,
            None => Self::resolve(cx.store.as_ref(), &raw)?,
        };

        let (subject, body, template_files) = {
            let mut resolver = ContextResolver::new(cx.transfer, cx.store.as_ref());
            let subject = resolver.interpolate_str(&template.subject)?;
            let body = resolver.interpolate_str(&template.body)?;
            let files = template
                .attachments
                .iter()
                .map(|a| resolver.interpolate_str(a))
                .collect::<Result<Vec<_>, _>>()?;
            (subject, body, files)
        };

        let paths: Vec<PathBuf> = template_files
            .into_iter()
            .chain(raw.attachments.iter().cloned())
            .map(PathBuf::from)
            .collect();
        let fs = Arc::clone(&cx.fs);
        let attachments = blocking(move || {
            paths
                .iter()
                .map(|p| {
                    let data = fs
                        .read(p)
                        .with_context(|| format!("reading email attachment {:?}", p))?;
                    Ok((attachment_name(p), data))
                })
                .collect::<Result<Vec<_>, TaskError>>()
        })
        .await?;

        let mail = OutgoingMail {
            from: raw.sender.trim().to_string(),
            to: raw.recipients.clone(),
            subject,
            body,
            attachments,
        };
        debug!(template = %template.name, attachments = mail.attachments.len(), "email rendered");

        tokio::select! {
            biased;
            _ = cx.cancel.cancelled() => return Err(TaskError::Cancelled("email delivery".to_string())),
            sent = cx.mailer.send(&relay, mail) => sent?,
        }

        info!(template = %template.name, recipients = ?raw.recipients, "email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_sender_recipients_and_template() {
        let args = TaskArgs::new()
            .with("sender", "gw@example.com")
            .with("recipients", "ops@example.com, audit@example.com");
        let err = EmailTask::default().validate(&args).unwrap_err();
        assert!(err.to_string().contains("missing email template"));

        let args = args.with("template", "done");
        assert!(EmailTask::default().validate(&args).is_ok());
    }

    #[test]
    fn builds_multipart_message_with_attachments() {
        let mail = OutgoingMail {
            from: "gw@example.com".into(),
            to: vec!["ops@example.com".into()],
            subject: "done".into(),
            body: "hello".into(),
            attachments: vec![("report.txt".into(), b"data".to_vec())],
        };
        let formatted = String::from_utf8(build_message(mail).unwrap().formatted()).unwrap();
        assert!(formatted.contains("report.txt"));
        assert!(formatted.contains("Subject: done"));

        let bad = OutgoingMail {
            from: "not an address".into(),
            ..Default::default()
        };
        assert!(build_message(bad).is_err());
    }
}
