pub mod catalog;
pub mod codec;
pub mod connection;
pub mod debounce;
pub mod device;
pub mod events;
pub mod publisher;
pub mod router;
pub mod subscriptions;
