pub mod clock;
pub mod config;
pub mod instruction;
pub mod payload;
pub mod server;
pub mod terminal;

pub use config::CliConfig;
pub use instruction::Instruction;
pub use payload::PayloadSource;
pub use server::{ReliableServer, WorkerReport};
pub use terminal::{Command, Terminal};
