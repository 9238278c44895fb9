pub mod auth;
pub mod tracks;
pub mod transcribe;
pub mod users;
