// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Session ownership and subscription bookkeeping.
//!
//! A session is identified by its client id and outlives the connections
//! that carry it, unless the client asked for a clean session. At most one
//! live connection owns a session at any time; a competing CONNECT is
//! refused while the owner is attached.

use codec::{PublishPacket, SubscribePattern};
use std::collections::{HashMap, VecDeque};

use crate::error::{Error, ErrorKind};
use crate::types::SessionGid;

/// Where a publish for a client should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Session has a live connection.
    Attached(SessionGid),

    /// Session is detached but resumable; messages may be held for it.
    Queueable,

    /// No session state for this client.
    Gone,
}

/// Result of a successful `acquire()`.
#[derive(Debug, Default)]
pub struct Acquired {
    /// True when previous session state was resumed [MQTT-3.2.2-2].
    pub session_present: bool,

    /// Subscriptions of a discarded previous incarnation; the caller
    /// removes them from the tree.
    pub stale_subscriptions: Vec<SubscribePattern>,

    /// Messages held while the session was detached, in arrival order.
    pub queued_messages: Vec<PublishPacket>,
}

/// Session state given back by `release()` when the record is destroyed.
#[derive(Debug)]
pub struct ReleasedSession {
    pub client_id: String,
    pub subscriptions: Vec<SubscribePattern>,
}

#[derive(Debug)]
struct SessionRecord {
    /// Connection currently owning this session, if any.
    gid: Option<SessionGid>,

    clean_session: bool,

    subscriptions: Vec<SubscribePattern>,

    queued: VecDeque<PublishPacket>,
}

/// Owner of every session record, keyed by client id.
#[derive(Debug)]
pub struct SessionManager {
    records: HashMap<String, SessionRecord>,

    /// Reverse index from live connections to client ids.
    attached: HashMap<SessionGid, String>,

    max_queued_messages: usize,
}

impl SessionManager {
    #[must_use]
    pub fn new(max_queued_messages: usize) -> Self {
        Self {
            records: HashMap::new(),
            attached: HashMap::new(),
            max_queued_messages,
        }
    }

    /// Number of known sessions, attached or not.
    #[must_use]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Bind `client_id` to the connection `gid`.
    ///
    /// An existing record is resumed when `clean_session` is unset and
    /// discarded when it is set; a record owned by a live connection is
    /// never taken over.
    ///
    /// # Errors
    ///
    /// Returns `SessionInUse` if another connection currently owns the
    /// session.
    pub fn acquire(
        &mut self,
        client_id: &str,
        gid: SessionGid,
        clean_session: bool,
    ) -> Result<Acquired, Error> {
        let mut acquired = Acquired::default();

        if let Some(record) = self.records.get_mut(client_id) {
            if record.gid.is_some() {
                return Err(Error::from_string(
                    ErrorKind::SessionInUse,
                    format!("Session {client_id} is bound to a live connection"),
                ));
            }
            if clean_session {
                // Start over; the previous state is gone [MQTT-3.1.2-6].
                let old = self.records.remove(client_id);
                if let Some(old) = old {
                    acquired.stale_subscriptions = old.subscriptions;
                }
            } else {
                record.gid = Some(gid);
                acquired.session_present = true;
                acquired.queued_messages = record.queued.drain(..).collect();
                self.attached.insert(gid, client_id.to_string());
                return Ok(acquired);
            }
        }

        self.records.insert(
            client_id.to_string(),
            SessionRecord {
                gid: Some(gid),
                clean_session,
                subscriptions: Vec::new(),
                queued: VecDeque::new(),
            },
        );
        self.attached.insert(gid, client_id.to_string());
        Ok(acquired)
    }

    /// Detach the connection `gid` from its session.
    ///
    /// Returns the dead session's state when the record was destroyed
    /// because the client had asked for a clean session.
    pub fn release(&mut self, gid: SessionGid) -> Option<ReleasedSession> {
        let client_id = self.attached.remove(&gid)?;
        let record = self.records.get_mut(&client_id)?;

        // A stale release from a previous owner must not detach the
        // current one.
        if record.gid != Some(gid) {
            return None;
        }
        record.gid = None;

        if record.clean_session {
            let record = self.records.remove(&client_id)?;
            return Some(ReleasedSession {
                client_id,
                subscriptions: record.subscriptions,
            });
        }
        None
    }

    /// Erase a detached session.
    ///
    /// # Errors
    ///
    /// Returns `SessionInUse` while a connection owns the session and
    /// `SessionNotFound` if there is none.
    pub fn remove(&mut self, client_id: &str) -> Result<ReleasedSession, Error> {
        match self.records.get(client_id) {
            Some(record) if record.gid.is_some() => Err(Error::from_string(
                ErrorKind::SessionInUse,
                format!("Session {client_id} is bound to a live connection"),
            )),
            Some(_record) => {
                let record = self.records.remove(client_id).expect("record exists");
                Ok(ReleasedSession {
                    client_id: client_id.to_string(),
                    subscriptions: record.subscriptions,
                })
            }
            None => Err(Error::from_string(
                ErrorKind::SessionNotFound,
                format!("No session with client id {client_id}"),
            )),
        }
    }

    /// Look up the client id owning the connection `gid`.
    #[must_use]
    pub fn client_of(&self, gid: SessionGid) -> Option<String> {
        self.attached.get(&gid).cloned()
    }

    /// Merge `patterns` into the session's subscription set.
    ///
    /// Filters are compared verbatim. Returns the patterns the caller has
    /// to (re-)insert into the tree: genuinely new filters plus those whose
    /// granted QoS changed.
    pub fn add_subscriptions(
        &mut self,
        client_id: &str,
        patterns: Vec<SubscribePattern>,
    ) -> Vec<SubscribePattern> {
        let Some(record) = self.records.get_mut(client_id) else {
            return Vec::new();
        };

        let mut dirty = Vec::new();
        for pattern in patterns {
            match record
                .subscriptions
                .iter_mut()
                .find(|existing| existing.topic().as_ref() == pattern.topic().as_ref())
            {
                Some(existing) => {
                    // Re-subscribing replaces the maximum QoS
                    // [MQTT-3.8.4-3].
                    if existing.qos() != pattern.qos() {
                        existing.set_qos(pattern.qos());
                        dirty.push(pattern);
                    }
                }
                None => {
                    record.subscriptions.push(pattern.clone());
                    dirty.push(pattern);
                }
            }
        }
        dirty
    }

    /// Drop `topics` from the session's subscription set, comparing filter
    /// strings verbatim. Returns the removed patterns.
    pub fn remove_subscriptions(
        &mut self,
        client_id: &str,
        topics: &[String],
    ) -> Vec<SubscribePattern> {
        let Some(record) = self.records.get_mut(client_id) else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        record.subscriptions.retain(|pattern| {
            if topics.iter().any(|topic| topic == pattern.topic().as_ref()) {
                removed.push(pattern.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Current subscriptions of a session, mainly for inspection.
    #[must_use]
    pub fn subscriptions_of(&self, client_id: &str) -> Vec<SubscribePattern> {
        self.records
            .get(client_id)
            .map(|record| record.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Decide where a publish for `client_id` goes.
    #[must_use]
    pub fn route(&self, client_id: &str) -> Route {
        match self.records.get(client_id) {
            Some(record) => match record.gid {
                Some(gid) => Route::Attached(gid),
                None => Route::Queueable,
            },
            None => Route::Gone,
        }
    }

    /// Hold a message for a detached, resumable session. The queue is
    /// bounded; once full, new messages are dropped.
    pub fn queue_publish(&mut self, client_id: &str, packet: PublishPacket) {
        let Some(record) = self.records.get_mut(client_id) else {
            return;
        };
        if record.queued.len() >= self.max_queued_messages {
            log::warn!("sessions: queue for {client_id} is full, dropping publish");
            return;
        }
        record.queued.push_back(packet);
    }
}
