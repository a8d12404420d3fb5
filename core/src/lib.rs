// Shared definitions for the clipwire suite: the clipboard wire protocol,
// the conversation-tree data model spoken by the upstream chat backend,
// the channel abstraction, configuration, and the common error type.

pub mod channel;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod message;
