pub mod cli;
pub mod descriptor;

pub use cli::DockerCli;
pub use descriptor::{render, Instruction};
