//! JSONL request dispatch for simulator clients.
//!
//! Clients send one request per line and receive exactly one response line
//! per request. A connection stays open between requests, so a long-poll
//! client can keep re-issuing `waitForUpdates` with the version token it was
//! last given.
//!
//! ## Protocol
//!
//! ```json
//! {"method":"invoke","params":{"obj":"VirtualMachine:vm-7","operation":"powerOnVM"}}
//! {"kind":"task","task":{"kind":"Task","id":"task-1"}}
//! ```
//!
//! | Method | Params | Result |
//! |--------|--------|--------|
//! | `invoke` | `obj`, `operation`, `args`, optional `user` | `result` value or `task` reference |
//! | `retrieveProperties` | `specs` | list of object contents |
//! | `createFilter` | `spec` | filter reference and baseline version |
//! | `waitForUpdates` | `filter`, `version`, `maxWaitSeconds` | update set |
//! | `destroyFilter` | `filter` | `null` |
//!
//! Engine faults come back as `{"kind":"fault","fault":{..}}` and leave the
//! connection open. Unknown methods and bad parameters yield a
//! `{"kind":"error"}` line and also keep the connection. Unparseable lines
//! and oversized requests yield an error line and close it.
//!
//! Filters and history collectors belong to the connection that created
//! them; whatever the client has not destroyed is released when the
//! connection ends.

mod errors;
mod handler;
mod request;
mod response;
mod router;
mod session;

pub(crate) use self::handler::DispatchConnectionHandler;

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
