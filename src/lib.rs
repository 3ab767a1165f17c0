pub mod accounting;
pub mod aggregate;
pub mod bench;
pub mod collector;
pub mod config;
pub mod display;
pub mod errors;
pub mod launch;
pub mod platform;
pub mod process;
pub mod reconcile;
pub mod sampler;
pub mod series;
pub mod state;
pub mod types;

pub use aggregate::BenchmarkResultSet;
pub use bench::{Benchmark, benchmark_command, benchmark_command_iter};
pub use config::Settings;
pub use errors::CmdprobeError;
pub use types::CanonicalResult;
