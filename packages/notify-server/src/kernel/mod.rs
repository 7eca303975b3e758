//! Kernel module - worker infrastructure and background tasks.

pub mod scheduled_tasks;
pub mod server_kernel;

pub use scheduled_tasks::start_scheduler;
pub use server_kernel::ServerKernel;
