// tests/transcode_tasks.rs

mod common;
use crate::common::Harness;
use crate::common::builders::{ContextBuilder, RuleBuilder, TransferBuilder, spec};

use taskgate::engine::ChainError;
use taskgate::model::{TaskSpec, TransferContext};
use taskgate::store::Store;
use taskgate::tasks::TaskError;
use taskgate::types::{Chain, Direction};

fn context(task: TaskSpec) -> TransferContext {
    let rule = RuleBuilder::new("mainframe", Direction::Send).pre(task).build();
    ContextBuilder::new(rule, TransferBuilder::new(0).local_path("/gw/out/letter.txt").build()).build()
}

#[tokio::test]
async fn utf8_to_ebcdic_and_back() {
    let (h, fs) = Harness::mock();
    fs.add_file("/gw/out/letter.txt", "Hé €".as_bytes());

    let mut ctx = context(spec(
        "TRANSCODE",
        &[("fromCharset", "UTF-8"), ("toCharset", "IBM Code Page 1148")],
    ));
    h.register(&mut ctx);
    h.run(Chain::Pre, &mut ctx).await.unwrap();

    assert_eq!(fs.contents("/gw/out/letter.txt").unwrap(), vec![0xC8, 0x51, 0x40, 0x9F]);
    assert_eq!(h.store.transfer(ctx.transfer.id).unwrap().filesize, 4);
    assert!(fs.contents("/gw/out/letter.txt.tmp").is_none());

    ctx.rule = RuleBuilder::new("mainframe", Direction::Send)
        .pre(spec(
            "TRANSCODE",
            &[("fromCharset", "ibm code page 1148"), ("toCharset", "UTF-16LE BOM")],
        ))
        .build();
    h.run(Chain::Pre, &mut ctx).await.unwrap();

    let mut expected = vec![0xFF, 0xFE];
    for unit in "Hé €".encode_utf16() {
        expected.extend_from_slice(&unit.to_le_bytes());
    }
    assert_eq!(fs.contents("/gw/out/letter.txt").unwrap(), expected);
}

#[tokio::test]
async fn latin1_to_utf8() {
    let (h, fs) = Harness::mock();
    fs.add_file("/gw/out/letter.txt", vec![b'c', b'a', b'f', 0xE9]);

    let mut ctx = context(spec(
        "TRANSCODE",
        &[("fromCharset", "ISO 8859-1"), ("toCharset", "UTF-8")],
    ));
    h.register(&mut ctx);
    h.run(Chain::Pre, &mut ctx).await.unwrap();

    assert_eq!(fs.contents("/gw/out/letter.txt").unwrap(), "café".as_bytes());
}

#[tokio::test]
async fn identical_charsets_are_refused() {
    let (h, fs) = Harness::mock();
    fs.add_file("/gw/out/letter.txt", b"plain");

    let mut ctx = context(spec(
        "TRANSCODE",
        &[("fromCharset", "Windows 1252"), ("toCharset", "windows 1252")],
    ));
    h.register(&mut ctx);

    let err = h.run(Chain::Pre, &mut ctx).await.unwrap_err();
    assert!(matches!(
        err,
        ChainError::Task {
            source: TaskError::IdenticalCharsets,
            ..
        }
    ));
    assert_eq!(fs.contents("/gw/out/letter.txt").unwrap(), b"plain");
}

#[tokio::test]
async fn unknown_charset_is_refused() {
    let (h, fs) = Harness::mock();
    fs.add_file("/gw/out/letter.txt", b"plain");

    let mut ctx = context(spec(
        "TRANSCODE",
        &[("fromCharset", "UTF-8"), ("toCharset", "EBCDIC-Klingon")],
    ));
    h.register(&mut ctx);

    let err = h.run(Chain::Pre, &mut ctx).await.unwrap_err();
    assert!(matches!(
        err,
        ChainError::Task {
            source: TaskError::InvalidCharset(_),
            ..
        }
    ));
}

#[tokio::test]
async fn undecodable_input_leaves_the_file_untouched() {
    let (h, fs) = Harness::mock();
    fs.add_file("/gw/out/letter.txt", vec![b'o', b'k', 0xFF, 0xFE, 0xFD]);

    let mut ctx = context(spec(
        "TRANSCODE",
        &[("fromCharset", "UTF-8"), ("toCharset", "ISO 8859-1")],
    ));
    h.register(&mut ctx);

    assert!(h.run(Chain::Pre, &mut ctx).await.is_err());
    assert_eq!(fs.contents("/gw/out/letter.txt").unwrap(), vec![b'o', b'k', 0xFF, 0xFE, 0xFD]);
    assert!(fs.contents("/gw/out/letter.txt.tmp").is_none());
}
