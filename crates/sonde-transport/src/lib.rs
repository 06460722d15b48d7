pub mod adb;
pub mod config;
pub mod frame;
pub mod line;
pub mod session;

pub use adb::{AdbDevice, TransportError};
pub use session::{ShellProtocol, ShellSession};
