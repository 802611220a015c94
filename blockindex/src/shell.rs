//! Line-oriented command shell over a `Session`.
//!
//! Commands may carry their arguments (`insert 5 50`) or leave them out, in
//! which case each missing argument is asked for on its own line. The shell
//! reads from any `BufRead` and writes to any `Write`, so tests drive it with
//! in-memory buffers.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crate::session::{Session, SessionError};

const HELP: &str = "\
Commands:
  create <path>          create a new index file and open it
  open <path>            open an existing index file
  insert <key> <value>   insert a key/value pair
  search <key>           look up a key
  print                  print all pairs in key order
  extract <path>         write all pairs as key,value lines to a file
  close                  close the open index file
  check                  verify the structure of the open index
  help                   show this message
  quit                   close any open file and exit";

/// A parsed command. Missing arguments are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create(Option<String>),
    Open(Option<String>),
    Insert(Option<String>, Option<String>),
    Search(Option<String>),
    Print,
    Extract(Option<String>),
    Close,
    Check,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. Returns `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, ShellError> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let mut arg = || words.next().map(str::to_string);

        let command = match name.to_ascii_lowercase().as_str() {
            "create" => Self::Create(arg()),
            "open" => Self::Open(arg()),
            "insert" => {
                let key = arg();
                Self::Insert(key, arg())
            }
            "search" => Self::Search(arg()),
            "print" => Self::Print,
            "extract" => Self::Extract(arg()),
            "close" => Self::Close,
            "check" => Self::Check,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => return Err(ShellError::UnknownCommand(name.to_string())),
        };

        if let Some(extra) = words.next() {
            return Err(ShellError::Invalid(format!("unexpected argument '{extra}'")));
        }
        Ok(Some(command))
    }
}

/// Whether the loop keeps going after a command.
enum Flow {
    Continue,
    Quit,
}

/// The interactive shell.
pub struct Shell<R, W> {
    session: Session,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Shell<R, W> {
    pub const fn new(session: Session, input: R, output: W) -> Self {
        Self {
            session,
            input,
            output,
        }
    }

    /// Run commands until `quit` or end of input, then close any open file.
    ///
    /// Command failures are printed and the loop continues; only failures to
    /// read input or write output end it early.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            write!(self.output, "> ")?;
            self.output.flush()?;

            let Some(line) = read_line(&mut self.input)? else {
                writeln!(self.output)?;
                break;
            };

            let flow = match Command::parse(&line) {
                Ok(None) => Ok(Flow::Continue),
                Ok(Some(command)) => {
                    tracing::debug!(?command, "executing command");
                    self.execute(command)
                }
                Err(e) => Err(e),
            };

            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Err(ShellError::Io(e)) => return Err(e),
                Err(e) => writeln!(self.output, "Error: {e}")?,
            }
        }

        self.close()
    }

    /// Consume the shell, returning its output.
    pub fn into_output(self) -> W {
        self.output
    }

    fn execute(&mut self, command: Command) -> Result<Flow, ShellError> {
        match command {
            Command::Create(path) => {
                let path = self.path_arg(path, "Enter the file name: ")?;
                let Self {
                    session,
                    input,
                    output,
                } = &mut *self;
                session.create(&path, |p| confirm(input, output, p))?;
                writeln!(self.output, "Created {}", path.display())?;
            }
            Command::Open(path) => {
                let path = self.path_arg(path, "Enter the file name: ")?;
                self.session.open(&path)?;
                writeln!(self.output, "Opened {}", path.display())?;
            }
            Command::Insert(key, value) => {
                self.session.index()?;
                let key = self.int_arg(key, "Enter the key: ")?;
                let value = self.int_arg(value, "Enter the value: ")?;
                self.session.insert(key, value)?;
                writeln!(self.output, "Inserted {key} -> {value}")?;
            }
            Command::Search(key) => {
                self.session.index()?;
                let key = self.int_arg(key, "Enter the key: ")?;
                let value = self.session.search(key)?;
                writeln!(self.output, "{key} -> {value}")?;
            }
            Command::Print => {
                let index = self.session.index()?;
                let mut count = 0usize;
                for entry in index.iter() {
                    let (key, value) = entry.map_err(SessionError::from)?;
                    writeln!(self.output, "{key} -> {value}")?;
                    count += 1;
                }
                if count == 0 {
                    writeln!(self.output, "(empty)")?;
                }
            }
            Command::Extract(path) => {
                self.session.index()?;
                let path = self.path_arg(path, "Enter the output file name: ")?;
                let Self {
                    session,
                    input,
                    output,
                } = &mut *self;
                let count = session.extract(&path, |p| confirm(input, output, p))?;
                writeln!(self.output, "Wrote {count} entries to {}", path.display())?;
            }
            Command::Close => self.close()?,
            Command::Check => {
                let stats = self.session.verify()?;
                writeln!(
                    self.output,
                    "OK: {} entries in {} nodes, depth {}",
                    stats.entries, stats.nodes, stats.depth
                )?;
            }
            Command::Help => writeln!(self.output, "{HELP}")?,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn close(&mut self) -> io::Result<()> {
        match self.session.close() {
            Ok(Some(path)) => writeln!(self.output, "Closed {}", path.display()),
            Ok(None) => Ok(()),
            Err(e) => writeln!(self.output, "Error: {e}"),
        }
    }

    /// Use the given argument or ask for it.
    fn arg(&mut self, given: Option<String>, prompt: &str) -> Result<String, ShellError> {
        if let Some(value) = given {
            return Ok(value);
        }

        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        match read_line(&mut self.input)? {
            Some(line) if !line.trim().is_empty() => Ok(line.trim().to_string()),
            _ => Err(ShellError::Invalid("missing argument".to_string())),
        }
    }

    fn path_arg(&mut self, given: Option<String>, prompt: &str) -> Result<PathBuf, ShellError> {
        self.arg(given, prompt).map(PathBuf::from)
    }

    fn int_arg(&mut self, given: Option<String>, prompt: &str) -> Result<i64, ShellError> {
        let text = self.arg(given, prompt)?;
        text.parse()
            .map_err(|_| ShellError::Invalid(format!("'{text}' is not a valid integer")))
    }
}

/// Read one line without its terminator. `None` at end of input.
fn read_line<R: BufRead>(input: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

/// Ask whether `path` may be replaced. Anything but yes, including end of
/// input or an I/O failure, is a no.
fn confirm<R: BufRead, W: Write>(input: &mut R, output: &mut W, path: &Path) -> bool {
    if write!(output, "{} exists. Overwrite? (y/n): ", path.display())
        .and_then(|()| output.flush())
        .is_err()
    {
        return false;
    }

    matches!(
        read_line(input).ok().flatten().as_deref().map(str::trim),
        Some("y" | "Y" | "yes" | "Yes" | "YES")
    )
}

/// Errors reported for a single command.
#[derive(Debug)]
pub enum ShellError {
    /// The command word is not recognized.
    UnknownCommand(String),
    /// An argument is missing or malformed.
    Invalid(String),
    /// The session rejected the command.
    Session(SessionError),
    /// Reading input or writing output failed.
    Io(io::Error),
}

impl std::fmt::Display for ShellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCommand(name) => {
                write!(f, "unknown command '{name}', type 'help' for a list")
            }
            Self::Invalid(message) => write!(f, "{message}"),
            Self::Session(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ShellError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Session(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::UnknownCommand(_) | Self::Invalid(_) => None,
        }
    }
}

impl From<SessionError> for ShellError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

impl From<io::Error> for ShellError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
