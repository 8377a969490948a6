//! All channels that are used throughout sograph live here.

pub use ws_manager_chan::*;

mod ws_manager_chan;
