use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum CmdprobeError {
    #[error("The number of iterations to run the command should be >= 1 (got {iterations})")]
    InvalidIterations { iterations: usize },

    #[error("No command given to benchmark")]
    EmptyCommand,

    #[error("Unterminated quote in command: {command}")]
    UnterminatedQuote { command: String },

    #[error("Command not found: {program}")]
    CommandNotFound { program: String },

    #[error("Failed to start {program}: {source}")]
    LaunchFailed {
        program: String,
        source: std::io::Error,
    },

    #[error(
        "Permission denied while monitoring process {pid}. Root access is needed for \
         monitoring the target command; re-run with elevated privileges (e.g. sudo)."
    )]
    PermissionDenied { pid: u32 },

    #[error("Failed to read accounting report {path}: {source}")]
    ReportReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed accounting report: {detail}")]
    ReportParseError { detail: String },

    #[error("Failed to read config file {path}: {source}")]
    ConfigReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {detail}")]
    ConfigParseError { path: PathBuf, detail: String },

    #[error("Failed to read the command's {stream}: {source}")]
    OutputReadError {
        stream: &'static str,
        source: std::io::Error,
    },

    #[error("The {worker} worker panicked")]
    WorkerPanicked { worker: &'static str },
}

impl CmdprobeError {
    /// True for errors raised before the target could be started.
    pub fn is_launch_error(&self) -> bool {
        matches!(
            self,
            CmdprobeError::InvalidIterations { .. }
                | CmdprobeError::EmptyCommand
                | CmdprobeError::UnterminatedQuote { .. }
                | CmdprobeError::CommandNotFound { .. }
                | CmdprobeError::LaunchFailed { .. }
        )
    }
}
