pub mod brightness;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use brightness::BrightnessModel;

#[cfg(feature = "backend-tract")]
pub use tract::TractModel;
