//! Session handler used by transport tests.

use std::io::{BufRead, BufReader, Write};
use std::sync::{Mutex, PoisonError};

use super::{Session, SessionHandler};

/// Echoes every line back and records which sessions started and ended.
#[derive(Default)]
pub(crate) struct EchoSessions {
    started: Mutex<Vec<u64>>,
    ended: Mutex<Vec<u64>>,
}

impl EchoSessions {
    pub(crate) fn started(&self) -> Vec<u64> {
        self.started.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn ended(&self) -> Vec<u64> {
        self.ended.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl SessionHandler for EchoSessions {
    fn serve(&self, session: Session) {
        let id = session.id();
        self.started.lock().unwrap_or_else(PoisonError::into_inner).push(id);
        let mut writer = session.into_stream();
        if let Ok(read_half) = writer.try_clone() {
            for line in BufReader::new(read_half).lines() {
                let Ok(line) = line else { break };
                if writeln!(writer, "{line}").is_err() {
                    break;
                }
            }
        }
        self.ended.lock().unwrap_or_else(PoisonError::into_inner).push(id);
    }
}
