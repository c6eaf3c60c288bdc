pub mod chat_to_upstream;
pub mod upstream_to_chat;

pub use chat_to_upstream::{TranslateError, chat_to_upstream_request};
pub use upstream_to_chat::response::ChatAggregator;
pub use upstream_to_chat::stream::{ProtocolAnomaly, UpstreamToChatStream};
