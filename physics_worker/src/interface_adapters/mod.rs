// Interface adapters: wire protocol and socket handling.

pub mod net;
pub mod protocol;
pub mod state;
