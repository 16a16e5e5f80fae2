pub mod document;
pub mod history;
pub mod index;
pub mod session;

pub use history::{ChatHistory, HistoryUpdate};
pub use index::IndexStore;
pub use session::{SessionRecord, SessionStore};
