//! Host-side collaborators
//!
//! Running scheduler commands (locally or over ssh), copying scripts to the
//! target host, and running local prologue/epilogue scripts.

pub mod transport;

pub use transport::{
    expand_tilde, join_dir, remote_path_arg, set_executable, CommandRunner, ExecError,
    RemoteHost, ShellRunner,
};
