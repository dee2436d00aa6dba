pub mod conversation_service;
pub mod delivery_service;
pub mod encryption_service;
pub mod message_service;
pub mod notification_service;
pub mod object_store;
pub mod poll_service;
pub mod reaction_service;
pub mod user_service;
