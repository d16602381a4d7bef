// tests/icap_task.rs

mod common;
use crate::common::Harness;
use crate::common::builders::{ContextBuilder, RuleBuilder, TransferBuilder, spec};

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use taskgate::engine::ChainError;
use taskgate::model::TransferContext;
use taskgate::store::Store;
use taskgate::tasks::TaskError;
use taskgate::types::{Chain, Direction};

const FILE: &str = "/gw/in/scan-me.txt";
const CONTENT: &[u8] = b"EICAR-ish payload";

/// What the fake server answers to a modification request.
#[derive(Clone)]
enum Verdict {
    Clean,
    Replace(&'static str),
    Status(u16),
    Hang,
}

struct FakeIcap {
    addr: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeIcap {
    async fn start(options_extra: &'static str, verdict: Verdict) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("127.0.0.1:{}/avscan", listener.local_addr().unwrap().port());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let seen = Arc::clone(&seen);
                let verdict = verdict.clone();
                tokio::spawn(async move {
                    let mut raw = Vec::new();
                    let mut buf = [0u8; 4096];
                    loop {
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        raw.extend_from_slice(&buf[..n]);
                        let text = String::from_utf8_lossy(&raw);
                        let done = if text.starts_with("OPTIONS") {
                            text.ends_with("\r\n\r\n")
                        } else {
                            text.ends_with("\r\n0\r\n\r\n")
                        };
                        if done {
                            break;
                        }
                    }
                    let request = String::from_utf8_lossy(&raw).into_owned();
                    let is_options = request.starts_with("OPTIONS");
                    seen.lock().unwrap().push(request);

                    let answer = if is_options {
                        format!("ICAP/1.0 200 OK\r\nMethods: RESPMOD, REQMOD\r\n{options_extra}\r\n")
                    } else {
                        match verdict {
                            Verdict::Clean => "ICAP/1.0 204 No Content\r\n\r\n".to_string(),
                            Verdict::Replace(body) => {
                                let http = "HTTP/1.1 200 OK\r\n\r\n";
                                format!(
                                    "ICAP/1.0 200 OK\r\nEncapsulated: res-hdr=0, res-body={}\r\n\r\n{}{:x}\r\n{}\r\n0\r\n\r\n",
                                    http.len(),
                                    http,
                                    body.len(),
                                    body
                                )
                            }
                            Verdict::Status(code) => {
                                format!("ICAP/1.0 {code} Forbidden\r\nEncapsulated: null-body=0\r\n\r\n")
                            }
                            Verdict::Hang => {
                                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                                return;
                            }
                        }
                    };
                    let _ = socket.write_all(answer.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, requests }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn context(direction: Direction, args: &[(&str, &str)]) -> TransferContext {
    let rule = RuleBuilder::new("scan", direction).post(spec("ICAP", args)).build();
    ContextBuilder::new(
        rule,
        TransferBuilder::new(0).local_path(FILE).filesize(CONTENT.len() as i64).build(),
    )
    .build()
}

#[tokio::test]
async fn clean_file_is_accepted() {
    let server = FakeIcap::start("", Verdict::Clean).await;
    let (h, fs) = Harness::mock();
    fs.add_file(FILE, CONTENT);

    let mut ctx = context(Direction::Receive, &[("uploadURL", &server.addr)]);
    h.register(&mut ctx);
    h.run(Chain::Post, &mut ctx).await.unwrap();

    assert_eq!(fs.contents(FILE).unwrap(), CONTENT);
    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].starts_with("OPTIONS icap://"));
    assert!(requests[1].starts_with("RESPMOD icap://"));
    assert!(requests[1].contains("EICAR-ish payload"));
}

#[tokio::test]
async fn send_rules_use_reqmod() {
    let server = FakeIcap::start("", Verdict::Clean).await;
    let (h, fs) = Harness::mock();
    fs.add_file(FILE, CONTENT);

    let mut ctx = context(Direction::Send, &[("uploadURL", &format!("icap://{}", server.addr))]);
    h.register(&mut ctx);
    h.run(Chain::Post, &mut ctx).await.unwrap();

    assert!(server.requests()[1].starts_with("REQMOD icap://"));
}

#[tokio::test]
async fn modified_body_replaces_the_file_when_allowed() {
    let server = FakeIcap::start("", Verdict::Replace("sanitized")).await;
    let (h, fs) = Harness::mock();
    fs.add_file(FILE, CONTENT);

    let mut ctx = context(
        Direction::Receive,
        &[("uploadURL", &server.addr), ("allowFileModifications", "true")],
    );
    h.register(&mut ctx);
    h.run(Chain::Post, &mut ctx).await.unwrap();

    assert_eq!(fs.contents(FILE).unwrap(), b"sanitized");
    assert_eq!(h.store.transfer(ctx.transfer.id).unwrap().filesize, 9);
}

#[tokio::test]
async fn modified_body_is_ignored_otherwise() {
    let server = FakeIcap::start("", Verdict::Replace("sanitized")).await;
    let (h, fs) = Harness::mock();
    fs.add_file(FILE, CONTENT);

    let mut ctx = context(Direction::Receive, &[("uploadURL", &server.addr)]);
    h.register(&mut ctx);
    h.run(Chain::Post, &mut ctx).await.unwrap();

    assert_eq!(fs.contents(FILE).unwrap(), CONTENT);
}

#[tokio::test]
async fn rejected_file_is_deleted_on_error() {
    let server = FakeIcap::start("", Verdict::Status(403)).await;
    let (h, fs) = Harness::mock();
    fs.add_file(FILE, CONTENT);

    let mut ctx = context(
        Direction::Receive,
        &[("uploadURL", &server.addr), ("onError", "delete")],
    );
    h.register(&mut ctx);

    let err = h.run(Chain::Post, &mut ctx).await.unwrap_err();
    assert!(err.to_string().contains("unexpected response code: 403"));
    assert!(fs.contents(FILE).is_none());
}

#[tokio::test]
async fn rejected_file_is_quarantined_on_error() {
    let server = FakeIcap::start("", Verdict::Status(403)).await;
    let (h, fs) = Harness::mock();
    fs.add_file(FILE, CONTENT);

    let mut ctx = context(
        Direction::Receive,
        &[
            ("uploadURL", &server.addr),
            ("onError", "move"),
            ("onErrorMovePath", "/gw/quarantine"),
        ],
    );
    h.register(&mut ctx);

    assert!(h.run(Chain::Post, &mut ctx).await.is_err());
    assert!(fs.contents(FILE).is_none());
    assert_eq!(fs.contents("/gw/quarantine/scan-me.txt").unwrap(), CONTENT);
}

#[tokio::test]
async fn ignored_extension_is_refused_before_sending() {
    let server = FakeIcap::start("Transfer-Ignore: exe, txt\r\n", Verdict::Clean).await;
    let (h, fs) = Harness::mock();
    fs.add_file(FILE, CONTENT);

    let mut ctx = context(Direction::Receive, &[("uploadURL", &server.addr)]);
    h.register(&mut ctx);

    let err = h.run(Chain::Post, &mut ctx).await.unwrap_err();
    assert!(err.to_string().contains("refused file extension"));
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn silent_server_times_out() {
    let server = FakeIcap::start("", Verdict::Hang).await;
    let (h, fs) = Harness::mock();
    fs.add_file(FILE, CONTENT);

    let mut ctx = context(
        Direction::Receive,
        &[("uploadURL", &server.addr), ("timeout", "200ms")],
    );
    h.register(&mut ctx);

    let err = h.run(Chain::Post, &mut ctx).await.unwrap_err();
    assert!(matches!(
        err,
        ChainError::Task {
            source: TaskError::Timeout(_),
            ..
        }
    ));
    assert_eq!(fs.contents(FILE).unwrap(), CONTENT);
}
