//! Packet handlers shipped with the server.

mod sign_in;

pub use sign_in::{SignIn, SIGN_IN_REPLY_ID};
