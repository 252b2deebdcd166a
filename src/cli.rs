//! # Command-Line Interface
//!
//! Argument parsing for the `ara-com-ipc-demo` binary. The demo is a
//! minimal host for exercising the binding end-to-end, not a benchmark
//! harness — its surface stays small: where to listen, how large the TP
//! reassembly buffer is, and how verbose the logs are.

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser,
};
use std::path::PathBuf;

/// Replicates clap v3's default color scheme for `--help`.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// A demo skeleton process for the ara::com IPC binding core.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Unix domain socket path to listen on.
    #[arg(short = 'l', long, default_value = "/tmp/ara-com-ipc-demo.sock", help_heading = "Core Options")]
    pub listen_path: PathBuf,

    /// Total size, in bytes, of the monotonic buffer shared by every
    /// deterministic-policy SOME/IP-TP assembler.
    #[arg(long, default_value_t = 1 << 20, help_heading = "Core Options")]
    pub tp_monotonic_buffer_size: usize,

    /// Silence all user-facing informational output on stdout.
    #[arg(short = 'q', long, help_heading = "Output and Logging")]
    pub quiet: bool,

    /// Increase diagnostic log verbosity on stderr.
    ///
    /// Can be used multiple times to increase detail:
    ///  -v: info
    ///  -vv: debug
    ///  -vvv: trace
    /// By default, only WARNING and ERROR messages are shown.
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Args::command().debug_assert();
    }
}
