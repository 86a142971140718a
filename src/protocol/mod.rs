pub mod commands;
pub mod frame;
pub mod registry;

pub use frame::LwacpFrame;
pub use registry::CommandRegistry;
