pub mod icons;
pub mod progress;
pub mod terminal;

pub use progress::SetupUI;
pub use terminal::ConsoleTerminal;
