//! Scheduler commands.

use std::fmt;

/// A command produced by a backend.
///
/// `Argv` runs without any shell parsing. `Shell` is for scheduler idioms
/// that need redirection (e.g. `bsub < script`) and is handed to `sh -c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Argv(Vec<String>),
    Shell(String),
}

impl Command {
    /// Build an argv command from anything string-like
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command::Argv(args.into_iter().map(Into::into).collect())
    }

    pub fn shell(script: impl Into<String>) -> Self {
        Command::Shell(script.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Command::Argv(args) => args.first().map_or(true, |a| a.trim().is_empty()),
            Command::Shell(script) => script.trim().is_empty(),
        }
    }

    /// Text of the command as a single shell line
    pub fn to_shell_string(&self) -> String {
        match self {
            Command::Argv(args) => args
                .iter()
                .map(|a| shell_quote(a))
                .collect::<Vec<_>>()
                .join(" "),
            Command::Shell(script) => script.clone(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

/// Quote a word for POSIX sh, leaving safe words untouched.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}
