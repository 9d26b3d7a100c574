mod app;
mod error;
mod ngrok;
mod process;

pub mod config;

pub use app::start_launcher;
pub use error::LauncherError;
pub use ngrok::{NgrokAgent, NgrokApi, Tunnel};
pub use process::ManagedProcess;
