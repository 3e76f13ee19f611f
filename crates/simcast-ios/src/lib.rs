// iOS Simulator control: simctl device backend, Simulator.app window
// discovery and off-screen parking.

pub mod compositor;
pub mod simctl;
pub mod window;

pub use compositor::Compositor;
pub use simctl::SimctlBackend;
pub use window::OsaWindowLocator;
