//! Shared fixtures: a test-side sequence file writer (the counterpart of
//! the external ground compiler) and scripted command routers.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cmdseq_core::{CommandDictionary, CommandEntry};
use cmdseq_engine::{CommandRequest, DispatchGateway, DispatchOutcome, RouterReply};
use tokio::time::Instant;

pub const OP_NO_OP: u32 = 0x100;
pub const OP_NO_OP_STRING: u32 = 0x101;

pub fn dictionary() -> CommandDictionary {
    CommandDictionary::from_entries(vec![
        CommandEntry {
            opcode: OP_NO_OP,
            mnemonic: "CMD_NO_OP".into(),
            description: None,
        },
        CommandEntry {
            opcode: OP_NO_OP_STRING,
            mnemonic: "CMD_NO_OP_STRING".into(),
            description: None,
        },
    ])
    .unwrap()
}

/// One fixture record: (tag mode byte, seconds, millis, opcode, args).
pub type FixtureRecord = (u8, u32, u32, u32, Vec<u8>);

pub const RELATIVE: u8 = 2;
pub const ABSOLUTE: u8 = 1;

/// Assemble a wire-format sequence file in `dir` and return its path.
pub fn write_sequence(dir: &std::path::Path, file: &str, records: &[FixtureRecord]) -> PathBuf {
    let mut body = Vec::new();
    for (mode, secs, millis, opcode, args) in records {
        body.push(*mode);
        body.extend_from_slice(&secs.to_be_bytes());
        body.extend_from_slice(&millis.to_be_bytes());
        body.extend_from_slice(&opcode.to_be_bytes());
        body.extend_from_slice(&(args.len() as u32).to_be_bytes());
        body.extend_from_slice(args);
    }

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&cmdseq_core::sequence::MAGIC.to_be_bytes());
    bytes.extend_from_slice(&cmdseq_core::sequence::FORMAT_VERSION.to_be_bytes());
    bytes.extend_from_slice(&(records.len() as u32).to_be_bytes());
    bytes.extend_from_slice(&crc32fast::hash(&body).to_be_bytes());
    bytes.extend_from_slice(&body);

    let path = dir.join(file);
    std::fs::write(&path, bytes).unwrap();
    path
}

pub type RequestLog = Arc<Mutex<Vec<(Instant, CommandRequest)>>>;

/// A router that acknowledges every request and logs it with the (virtual)
/// instant it arrived.
pub fn recording_router(timeout: Duration) -> (DispatchGateway, RequestLog) {
    let (gateway, mut router) = DispatchGateway::channel(32, timeout);
    let log: RequestLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    tokio::spawn(async move {
        while let Some(req) = router.requests.recv().await {
            sink.lock().unwrap().push((Instant::now(), req.clone()));
            let reply = RouterReply {
                correlation: req.correlation,
                outcome: DispatchOutcome::Success,
            };
            if router.replies.send(reply).await.is_err() {
                break;
            }
        }
    });
    (gateway, log)
}

/// A router that succeeds until (zero-based) request `fail_at`, which it
/// answers with a failure.
pub fn failing_router(fail_at: usize, timeout: Duration) -> DispatchGateway {
    let (gateway, mut router) = DispatchGateway::channel(32, timeout);
    tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(req) = router.requests.recv().await {
            let outcome = if count == fail_at {
                DispatchOutcome::Failure("injected fault".into())
            } else {
                DispatchOutcome::Success
            };
            count += 1;
            let reply = RouterReply {
                correlation: req.correlation,
                outcome,
            };
            if router.replies.send(reply).await.is_err() {
                break;
            }
        }
    });
    gateway
}

/// A router that receives requests but never answers them.
pub fn silent_router(timeout: Duration) -> DispatchGateway {
    let (gateway, mut router) = DispatchGateway::channel(32, timeout);
    tokio::spawn(async move {
        while router.requests.recv().await.is_some() {}
    });
    gateway
}

pub fn request_count(log: &RequestLog) -> usize {
    log.lock().unwrap().len()
}

/// Record order as observed by the router, for fixtures whose records carry
/// their own index as a one-byte argument.
pub fn request_order(log: &RequestLog) -> Vec<u8> {
    log.lock()
        .unwrap()
        .iter()
        .map(|(_, req)| req.args.first().copied().unwrap_or(0xFF))
        .collect()
}
