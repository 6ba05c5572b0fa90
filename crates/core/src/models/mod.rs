//! Data models for Darkpot

mod card;
mod participant;
mod session;
mod user;

pub use card::*;
pub use participant::*;
pub use session::*;
pub use user::*;
