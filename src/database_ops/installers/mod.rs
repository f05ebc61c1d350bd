pub mod moderation;
pub mod sweeper;
pub mod validation;
