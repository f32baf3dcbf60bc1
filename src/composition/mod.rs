//! The editable model: uniforms, nodes and the document that owns them.

pub mod document;
pub mod events;
pub mod node;
pub mod property_store;
pub mod uniform;

pub use document::CompositionDocument;
pub use events::DocumentEvent;
pub use node::CompositionNode;
