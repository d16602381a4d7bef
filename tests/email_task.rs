// tests/email_task.rs

mod common;
use crate::common::Harness;
use crate::common::builders::{ContextBuilder, RuleBuilder, TransferBuilder, spec};

use taskgate::engine::ChainError;
use taskgate::model::{EmailTemplate, SmtpCredential, TaskSpec, TransferContext};
use taskgate::tasks::TaskError;
use taskgate::types::{Chain, Direction};

fn context(task: TaskSpec) -> TransferContext {
    let rule = RuleBuilder::new("billing", Direction::Receive).error(task).build();
    ContextBuilder::new(rule, TransferBuilder::new(0).local_path("/gw/in/invoice.pdf").build()).build()
}

fn setup(h: &Harness) {
    h.store
        .add_email_template(EmailTemplate {
            name: "failed".into(),
            subject: "Transfer #TRANSFERID# failed".into(),
            body: "Rule #RULE# could not deliver #TRUEFILENAME#.".into(),
            attachments: vec!["/gw/logs/#TRANSFERID#.log".into()],
        })
        .unwrap();
    h.store
        .add_smtp_credential(SmtpCredential {
            email: "gateway@example.com".into(),
            server: "smtp.example.com".into(),
            port: 587,
            login: "gateway".into(),
            password: "hunter2".into(),
        })
        .unwrap();
}

#[tokio::test]
async fn renders_the_template_and_attaches_files() {
    let (h, fs) = Harness::mock();
    setup(&h);

    let mut ctx = context(spec(
        "EMAIL",
        &[
            ("sender", "gateway@example.com"),
            ("recipients", "ops@example.com, billing@example.com"),
            ("template", "failed"),
            ("attachments", "#TRUEFULLPATH#"),
        ],
    ));
    h.register(&mut ctx);
    fs.add_file(format!("/gw/logs/{}.log", ctx.transfer.id), b"trace");
    fs.add_file("/gw/in/invoice.pdf", b"%PDF");

    h.run(Chain::Error, &mut ctx).await.unwrap();

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    let (relay, mail) = &sent[0];
    assert_eq!(relay.server, "smtp.example.com");
    assert_eq!(mail.from, "gateway@example.com");
    assert_eq!(mail.to, vec!["ops@example.com", "billing@example.com"]);
    assert_eq!(mail.subject, format!("Transfer {} failed", ctx.transfer.id));
    assert_eq!(mail.body, "Rule billing could not deliver invoice.pdf.");
    assert_eq!(
        mail.attachments,
        vec![
            (format!("{}.log", ctx.transfer.id), b"trace".to_vec()),
            ("invoice.pdf".to_string(), b"%PDF".to_vec()),
        ]
    );
}

#[tokio::test]
async fn unknown_template_is_reported() {
    let (h, _fs) = Harness::mock();
    setup(&h);

    let mut ctx = context(spec(
        "EMAIL",
        &[
            ("sender", "gateway@example.com"),
            ("recipients", "ops@example.com"),
            ("template", "missing"),
        ],
    ));
    h.register(&mut ctx);

    let err = h.run(Chain::Error, &mut ctx).await.unwrap_err();
    assert!(matches!(
        err,
        ChainError::Task {
            source: TaskError::NotFound(_),
            ..
        }
    ));
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn sender_without_smtp_credentials_is_reported() {
    let (h, _fs) = Harness::mock();
    setup(&h);

    let mut ctx = context(spec(
        "EMAIL",
        &[
            ("sender", "someone@example.com"),
            ("recipients", "ops@example.com"),
            ("template", "failed"),
        ],
    ));
    h.register(&mut ctx);

    assert!(h.run(Chain::Error, &mut ctx).await.is_err());
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn missing_attachment_fails_before_sending() {
    let (h, _fs) = Harness::mock();
    setup(&h);

    let mut ctx = context(spec(
        "EMAIL",
        &[
            ("sender", "gateway@example.com"),
            ("recipients", "ops@example.com"),
            ("template", "failed"),
        ],
    ));
    h.register(&mut ctx);

    let err = h.run(Chain::Error, &mut ctx).await.unwrap_err();
    assert!(err.to_string().contains("email attachment"));
    assert!(h.mailer.sent().is_empty());
}
