pub mod audience;
pub mod contacts;
pub mod events;
pub mod messages;
pub mod presence;
pub mod router;
