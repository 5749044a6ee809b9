pub mod comm;
pub mod keyboard;
pub mod logging;
pub mod pins;
