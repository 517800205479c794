//! Change Feed Record Classification
//!
//! This module interprets the raw records produced by a change feed. Each record
//! carries a `type` discriminator and, depending on it, `state`, `old_val` and
//! `new_val` fields:
//!
//! | `type`    | Payload                        | Event                       |
//! |-----------|--------------------------------|-----------------------------|
//! | `state`   | `state: "initializing"`        | [`FeedEvent::Initializing`] |
//! | `state`   | `state: "ready"`               | [`FeedEvent::Ready`]        |
//! | `initial` | `new_val`                      | [`FeedEvent::Initial`]      |
//! | `add`     | `new_val`                      | [`FeedEvent::Add`]          |
//! | `change`  | `old_val`, `new_val`           | [`FeedEvent::Change`]       |
//! | `remove`  | `old_val`                      | [`FeedEvent::Remove`]       |
//!
//! Anything else is not an event and is skipped by the worker.
//!
//! # Examples
//!
//! ```rust
//! use penne_core::event::{classify, FeedEvent, FeedEventKind};
//! use bson::doc;
//!
//! let event = classify(&doc! { "type": "add", "new_val": { "id": "u1" } }).unwrap();
//! assert_eq!(event.kind(), FeedEventKind::Add);
//! assert_eq!(event, FeedEvent::Add(doc! { "id": "u1" }));
//!
//! assert!(classify(&doc! { "type": "uninitial" }).is_none());
//! ```

use crate::listener::ChangeFeedListener;
use bson::Document;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminator field of a change record.
pub const TYPE_FIELD: &str = "type";

/// Lifecycle state field of a `state` record.
pub const STATE_FIELD: &str = "state";

/// Value before the change.
pub const OLD_VALUE_FIELD: &str = "old_val";

/// Value after the change.
pub const NEW_VALUE_FIELD: &str = "new_val";

/// Kinds of change feed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedEventKind {
    /// The feed is loading its initial values
    Initializing,

    /// The feed has delivered its initial values and now streams changes
    Ready,

    /// A value that existed when the feed was opened
    Initial,

    /// A value was inserted
    Add,

    /// A value was modified
    Change,

    /// A value was deleted
    Remove,
}

impl FeedEventKind {
    /// Returns the kind as a static string for metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Initial => "initial",
            Self::Add => "add",
            Self::Change => "change",
            Self::Remove => "remove",
        }
    }

    /// Returns true for the lifecycle markers (initializing, ready).
    #[inline]
    pub fn is_state(&self) -> bool {
        matches!(self, Self::Initializing | Self::Ready)
    }
}

impl fmt::Display for FeedEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified change feed event.
///
/// The payload type starts as [`Document`] after [`classify`] and becomes the
/// mapped target type after [`FeedEvent::try_map`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent<T> {
    /// Lifecycle marker: initial values are being loaded
    Initializing,

    /// Lifecycle marker: the feed is live
    Ready,

    /// Initial snapshot value
    Initial(T),

    /// Inserted value
    Add(T),

    /// Modified value, before and after
    Change { old: T, new: T },

    /// Deleted value
    Remove(T),
}

impl<T> FeedEvent<T> {
    /// Returns the kind of this event.
    #[must_use]
    pub fn kind(&self) -> FeedEventKind {
        match self {
            FeedEvent::Initializing => FeedEventKind::Initializing,
            FeedEvent::Ready => FeedEventKind::Ready,
            FeedEvent::Initial(_) => FeedEventKind::Initial,
            FeedEvent::Add(_) => FeedEventKind::Add,
            FeedEvent::Change { .. } => FeedEventKind::Change,
            FeedEvent::Remove(_) => FeedEventKind::Remove,
        }
    }

    /// Converts every payload of this event with `f`.
    ///
    /// Payloads are converted old before new. The first error is returned and
    /// no event is produced.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`.
    pub fn try_map<U, E, F>(self, mut f: F) -> Result<FeedEvent<U>, E>
    where
        F: FnMut(T) -> Result<U, E>,
    {
        Ok(match self {
            FeedEvent::Initializing => FeedEvent::Initializing,
            FeedEvent::Ready => FeedEvent::Ready,
            FeedEvent::Initial(value) => FeedEvent::Initial(f(value)?),
            FeedEvent::Add(value) => FeedEvent::Add(f(value)?),
            FeedEvent::Change { old, new } => {
                let old = f(old)?;
                let new = f(new)?;
                FeedEvent::Change { old, new }
            }
            FeedEvent::Remove(value) => FeedEvent::Remove(f(value)?),
        })
    }

    /// Invokes the listener callback matching this event.
    pub fn dispatch<L>(self, listener: &mut L)
    where
        L: ChangeFeedListener<T> + ?Sized,
    {
        match self {
            FeedEvent::Initializing => listener.on_initializing_state(),
            FeedEvent::Ready => listener.on_ready_state(),
            FeedEvent::Initial(value) => listener.on_initial(value),
            FeedEvent::Add(value) => listener.on_add(value),
            FeedEvent::Change { old, new } => listener.on_change(old, new),
            FeedEvent::Remove(value) => listener.on_remove(value),
        }
    }
}

/// Classifies a raw change record.
///
/// Returns `None` for records with an unknown `type`, an unknown `state`, or
/// missing payload documents. Such records are not errors.
pub fn classify(record: &Document) -> Option<FeedEvent<Document>> {
    let payload = |field: &str| record.get_document(field).ok().cloned();

    match record.get_str(TYPE_FIELD).ok()? {
        "state" => match record.get_str(STATE_FIELD).ok()? {
            "initializing" => Some(FeedEvent::Initializing),
            "ready" => Some(FeedEvent::Ready),
            _ => None,
        },
        "initial" => payload(NEW_VALUE_FIELD).map(FeedEvent::Initial),
        "add" => payload(NEW_VALUE_FIELD).map(FeedEvent::Add),
        "change" => Some(FeedEvent::Change {
            old: payload(OLD_VALUE_FIELD)?,
            new: payload(NEW_VALUE_FIELD)?,
        }),
        "remove" => payload(OLD_VALUE_FIELD).map(FeedEvent::Remove),
        _ => None,
    }
}
