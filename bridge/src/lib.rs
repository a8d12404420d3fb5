// UI-side half of the clipboard relay: the visible click-driven state
// machine and the upstream chat API it drives while processing a request.

pub mod state_machine;
pub mod upstream;

pub use state_machine::{drive, Bridge, BridgeState, ClickOutcome};
pub use upstream::UpstreamClient;
