pub mod connection;
pub mod events;
pub mod fanout;
pub mod handler;
pub mod resume;
pub mod server;
