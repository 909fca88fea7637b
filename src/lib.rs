pub mod download;
pub mod error;
pub mod extract;
pub mod layout;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod settings;
pub mod state;
pub mod tui;
pub mod vcs;
pub mod version;
