pub mod chat;
pub mod dispatcher;
pub mod engine;
pub mod tools;
