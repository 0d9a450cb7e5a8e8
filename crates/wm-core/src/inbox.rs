//! Thread-safe queue for collaborator writes.
//!
//! Predictors and input handlers post from any thread through an
//! [`InboxSender`]; the integrator drains the queue once at the start of each
//! tick, so element data is never mutated mid-tick.

use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};

use crate::element::{ElementId, InteractionEvent};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboxMessage {
    Confidence { element_id: ElementId, value: f32 },
    Interaction(InteractionEvent),
}

impl InboxMessage {
    pub fn element_id(&self) -> ElementId {
        match self {
            InboxMessage::Confidence { element_id, .. } => *element_id,
            InboxMessage::Interaction(event) => event.element_id,
        }
    }
}

/// Cloneable producer handle.
#[derive(Clone)]
pub struct InboxSender {
    tx: Sender<InboxMessage>,
}

impl InboxSender {
    /// Queue a message. Returns false once the inbox has been dropped.
    pub fn send(&self, message: InboxMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    pub fn confidence(&self, element_id: ElementId, value: f32) -> bool {
        self.send(InboxMessage::Confidence { element_id, value })
    }

    pub fn interaction(&self, event: InteractionEvent) -> bool {
        self.send(InboxMessage::Interaction(event))
    }
}

/// Consumer side, owned by the integrator.
pub struct Inbox {
    tx: Sender<InboxMessage>,
    rx: Receiver<InboxMessage>,
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Inbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> InboxSender {
        InboxSender {
            tx: self.tx.clone(),
        }
    }

    /// Everything queued so far, in arrival order. Never blocks.
    pub fn drain(&self) -> Vec<InboxMessage> {
        self.rx.try_iter().collect()
    }
}
