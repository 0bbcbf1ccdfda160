mod bridge;
mod host;
pub mod layout;
mod mock;
mod process;

pub use bridge::MemoryBridge;
pub use host::{HostHandle, ProcessLocator};
pub use mock::{MockHandle, MockHost, MockHostBuilder, MockLocator};
pub use process::{ProcessHandle, WindowsProcessLocator};
