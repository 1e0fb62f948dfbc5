mod click;
mod tap;

pub use click::{ClickTrackConfig, ClickTrackEngine};
pub use tap::TapEngine;
