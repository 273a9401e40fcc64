//! # Mailbox
//!
//! Per-process key-value store for transient messages and persistent
//! state (§4.9), grounded in `original_source/process/runtime/include/praas/process/runtime/internal/state.hpp`
//! (the `StateKeys` shape returned by `state_keys`) and the mailbox
//! behaviour implied by the `GET_REQUEST`/`PUT_REQUEST` IPC messages in
//! `internal/ipc/messages.hpp`. Messages are keyed by `(name,
//! source_process_id)` and consumed on read; state is keyed by `name`
//! alone, survives reads, and carries a `last_modified` timestamp for
//! swap diagnostics.

use std::collections::HashMap;

use crate::common::Buffer;
use crate::error::PraasError;
use crate::util::current_timestamp_ms;

/// Wildcard source accepted by [`Mailbox::try_get`]: match the first
/// message with the given name regardless of who sent it.
pub const ANY_SOURCE: &str = "ANY";

/// One entry produced by [`Mailbox::all_state`] for swap-out.
#[derive(Debug, Clone)]
pub enum MailboxSnapshotEntry {
    Message {
        name: String,
        source: String,
        payload: Buffer,
    },
    State {
        name: String,
        payload: Buffer,
        last_modified: u64,
    },
}

#[derive(Debug, Default)]
pub struct Mailbox {
    messages: HashMap<(String, String), Buffer>,
    state: HashMap<String, Buffer>,
    state_timestamps: HashMap<String, u64>,
}

impl Mailbox {
    pub fn new() -> Self {
        Mailbox::default()
    }

    /// Inserts a message. A second put to the same `(name, source)` with
    /// no intervening get fails with [`PraasError::ObjectExists`].
    pub fn put(&mut self, name: &str, source: &str, payload: Buffer) -> Result<(), PraasError> {
        let key = (name.to_string(), source.to_string());
        if self.messages.contains_key(&key) {
            return Err(PraasError::ObjectExists(format!(
                "message already present for ({name}, {source})"
            )));
        }
        self.messages.insert(key, payload);
        Ok(())
    }

    /// Consumes and returns a matching message, or `None` if there isn't
    /// one. `source == ANY_SOURCE` matches the first message with the
    /// given name irrespective of sender.
    pub fn try_get(&mut self, name: &str, source: &str) -> Option<Buffer> {
        if source == ANY_SOURCE {
            let key = self
                .messages
                .keys()
                .find(|(n, _)| n == name)
                .cloned()?;
            return self.messages.remove(&key);
        }
        self.messages.remove(&(name.to_string(), source.to_string()))
    }

    /// Inserts or replaces the state value for `name`, refreshing its
    /// `last_modified` timestamp.
    pub fn state(&mut self, name: &str, payload: Buffer) {
        self.state.insert(name.to_string(), payload);
        self.state_timestamps.insert(name.to_string(), current_timestamp_ms());
    }

    /// Reads the state value for `name` without consuming it.
    pub fn try_state(&self, name: &str) -> Option<Buffer> {
        self.state.get(name).cloned()
    }

    /// Lists every state key with its last-modified timestamp.
    pub fn state_keys(&self) -> Vec<(String, u64)> {
        self.state
            .keys()
            .map(|name| {
                let ts = self.state_timestamps.get(name).copied().unwrap_or(0);
                (name.clone(), ts)
            })
            .collect()
    }

    /// Enumerates every message and state entry, for swap-out (§4.7).
    pub fn all_state(&self) -> Vec<MailboxSnapshotEntry> {
        let mut out = Vec::with_capacity(self.messages.len() + self.state.len());
        for ((name, source), payload) in &self.messages {
            out.push(MailboxSnapshotEntry::Message {
                name: name.clone(),
                source: source.clone(),
                payload: payload.clone(),
            });
        }
        for (name, payload) in &self.state {
            let last_modified = self.state_timestamps.get(name).copied().unwrap_or(0);
            out.push(MailboxSnapshotEntry::State {
                name: name.clone(),
                payload: payload.clone(),
                last_modified,
            });
        }
        out
    }

    /// Restores entries previously produced by [`Mailbox::all_state`],
    /// used by swap-in.
    pub fn restore(&mut self, entries: Vec<MailboxSnapshotEntry>) {
        for entry in entries {
            match entry {
                MailboxSnapshotEntry::Message { name, source, payload } => {
                    self.messages.insert((name, source), payload);
                }
                MailboxSnapshotEntry::State {
                    name,
                    payload,
                    last_modified,
                } => {
                    self.state_timestamps.insert(name.clone(), last_modified);
                    self.state.insert(name, payload);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_consumes_the_message() {
        let mut mailbox = Mailbox::new();
        mailbox.put("k", "proc-a", Buffer::from(vec![1, 2, 3])).unwrap();

        let got = mailbox.try_get("k", "proc-a").unwrap();
        assert_eq!(got.as_slice(), &[1, 2, 3]);
        assert!(mailbox.try_get("k", "proc-a").is_none());
    }

    #[test]
    fn second_put_with_no_intervening_get_fails() {
        let mut mailbox = Mailbox::new();
        mailbox.put("k", "proc-a", Buffer::from(vec![1])).unwrap();
        assert!(matches!(
            mailbox.put("k", "proc-a", Buffer::from(vec![2])),
            Err(PraasError::ObjectExists(_))
        ));
    }

    #[test]
    fn any_source_matches_first_message_with_that_name() {
        let mut mailbox = Mailbox::new();
        mailbox.put("k", "proc-a", Buffer::from(vec![9])).unwrap();
        let got = mailbox.try_get("k", ANY_SOURCE).unwrap();
        assert_eq!(got.as_slice(), &[9]);
    }

    #[test]
    fn state_survives_reads_and_repeats() {
        let mut mailbox = Mailbox::new();
        mailbox.state("count", Buffer::from(vec![1]));

        assert_eq!(mailbox.try_state("count").unwrap().as_slice(), &[1]);
        assert_eq!(mailbox.try_state("count").unwrap().as_slice(), &[1]);

        mailbox.state("count", Buffer::from(vec![2]));
        assert_eq!(mailbox.try_state("count").unwrap().as_slice(), &[2]);
    }

    #[test]
    fn swap_out_then_swap_in_round_trips_state_and_messages() {
        let mut mailbox = Mailbox::new();
        mailbox.state("k", Buffer::from(vec![7]));
        mailbox.put("m", "proc-a", Buffer::from(vec![8])).unwrap();

        let snapshot = mailbox.all_state();
        assert_eq!(snapshot.len(), 2);

        let mut restored = Mailbox::new();
        restored.restore(snapshot);
        assert_eq!(restored.try_state("k").unwrap().as_slice(), &[7]);
        assert_eq!(restored.try_get("m", "proc-a").unwrap().as_slice(), &[8]);
        assert_eq!(restored.state_keys().len(), 1);
    }
}
