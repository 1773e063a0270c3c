pub mod common;
pub mod patch;
pub mod status;
pub mod uninstall;
