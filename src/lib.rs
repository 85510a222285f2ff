pub mod ai;
pub mod capture;
pub mod chat;
pub mod cli;
pub mod conversation;
pub mod dictation;
pub mod image_edit;
pub mod locale;
pub mod settings;

pub use cli::{run, Cli};
