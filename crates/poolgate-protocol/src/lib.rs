pub mod chat;
pub mod error;
pub mod sse;
pub mod upstream;
