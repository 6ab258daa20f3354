//! Terminal territory map: draw, edit and assign service territories on a
//! braille map, kept in sync with a remote Territory Store.

pub mod app;
pub mod braille;
pub mod config;
pub mod data;
pub mod logging;
pub mod map;
pub mod store;
pub mod sync;
pub mod territory;
pub mod ui;
