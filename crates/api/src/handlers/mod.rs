pub mod admins;
pub mod canvas;
pub mod catalog;
pub mod events;
pub mod generation;
pub mod stats;
