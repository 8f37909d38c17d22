pub mod backend;
pub mod bridge;
pub mod cdp;
pub mod inject;
pub mod mirror;
mod tab;

pub use backend::HeadlessBackend;
pub use cdp::LaunchOptions;
