pub mod context;
pub mod dispatch;
pub mod run_instance;
pub mod status;
pub mod sweep;

pub use dispatch::dispatch;
