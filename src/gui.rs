//! eframe front end. Owns textures and key handling; everything else is
//! delegated to `ViewerState`.

mod app;
mod image;
mod input;

pub use app::GuiApp;

pub const APP_TITLE: &str = "sheetsort";
