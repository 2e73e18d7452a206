pub mod maildir;
pub mod simplified_message;
pub mod source;

pub use maildir::MaildirSource;
pub use simplified_message::SimplifiedMessage;
pub use source::{Item, ItemRef, ItemSource, SourceError};
