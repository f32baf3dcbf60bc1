use crossbeam_channel::{Receiver, Sender};

use crate::composer::types::ShaderStage;

/// Structured change notifications emitted by `CompositionDocument`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentEvent {
    NodeAdded { index: usize, id: String },
    NodeRemoved { index: usize, id: String },
    NodeMoved { from: usize, to: usize },
    EnabledChanged { index: usize, enabled: bool },
    UniformChanged { index: usize, uniform: String },
    CodeChanged { index: usize, stage: ShaderStage },
    TemplateChanged { stage: ShaderStage },
    /// The whole node list was replaced (project load).
    Reloaded,
    /// The last node was removed; there is nothing to build.
    Emptied,
}

impl DocumentEvent {
    /// Whether this event invalidates the composed programs.
    pub fn requires_rebuild(&self) -> bool {
        !matches!(self, DocumentEvent::Emptied)
    }
}

/// Fan-out of document events to independent subscribers.
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Vec<Sender<DocumentEvent>>,
}

impl EventHub {
    pub fn subscribe(&mut self) -> Receiver<DocumentEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn emit(&mut self, event: DocumentEvent) {
        // Dropped receivers unsubscribe implicitly.
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
