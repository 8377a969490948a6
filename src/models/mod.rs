//! All the database models live here.

pub use account::*;
pub use friend::*;
pub use group::*;

mod account;
mod friend;
mod group;
