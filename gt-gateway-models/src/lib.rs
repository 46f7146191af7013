pub mod constants;
pub mod session;
pub mod settings;

pub use session::{DeviceSession, DeviceVariant};
pub use settings::Settings;
