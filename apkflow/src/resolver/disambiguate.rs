//! Human interaction: choosing among candidates and confirming manual steps.
//!
//! Two implementations are selected by execution context: [`InteractiveTerminal`]
//! blocks on a reader, [`Unattended`] never blocks and hands the candidate list
//! back to the caller instead.

use crate::errors::{AmbiguityError, ApkflowError, SelectionError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, Write};

/// What a candidate list is choosing between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    /// A connected device.
    Device,
    /// An installed package.
    Package,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => write!(f, "device"),
            Self::Package => write!(f, "package"),
        }
    }
}

/// One selectable option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// 1-based selection index.
    pub index: usize,
    /// Package name or device id.
    pub id: String,
    /// App label or device model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "[{}] {} ({label})", self.index, self.id),
            None => write!(f, "[{}] {}", self.index, self.id),
        }
    }
}

/// A question put to a [`Disambiguator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePrompt {
    /// The user's query (or the device hint).
    pub query: String,
    /// What is being chosen.
    pub kind: CandidateKind,
    /// Options, indexed from 1.
    pub candidates: Vec<Candidate>,
}

impl CandidatePrompt {
    /// Builds a prompt, numbering `(id, label)` pairs from 1.
    #[must_use]
    pub fn new(
        query: impl Into<String>,
        kind: CandidateKind,
        options: impl IntoIterator<Item = (String, Option<String>)>,
    ) -> Self {
        Self {
            query: query.into(),
            kind,
            candidates: options
                .into_iter()
                .enumerate()
                .map(|(i, (id, label))| Candidate {
                    index: i + 1,
                    id,
                    label,
                })
                .collect(),
        }
    }

    /// Validates a 1-based selection and returns its 0-based position.
    pub fn select(&self, index: usize) -> Result<usize, SelectionError> {
        if (1..=self.candidates.len()).contains(&index) {
            Ok(index - 1)
        } else {
            Err(SelectionError::OutOfRange {
                index,
                count: self.candidates.len(),
            })
        }
    }

    /// The error returned when nobody chooses.
    #[must_use]
    pub fn into_ambiguity(self) -> AmbiguityError {
        AmbiguityError {
            query: self.query,
            kind: self.kind,
            candidates: self.candidates,
        }
    }
}

/// Chooses one candidate from an ambiguous match.
pub trait Disambiguator: Send + Sync {
    /// Returns the 0-based position of the chosen candidate.
    fn choose(&self, prompt: &CandidatePrompt) -> Result<usize, ApkflowError>;
}

/// Asks a human to perform a manual step.
pub trait OperatorPrompt: Send + Sync {
    /// Returns true if a human can answer.
    fn is_interactive(&self) -> bool;

    /// Shows `message` and waits for acknowledgement.
    fn confirm(&self, message: &str) -> Result<(), SelectionError>;
}

/// Line-oriented prompts over a reader/writer pair, normally the terminal.
pub struct InteractiveTerminal {
    input: Mutex<Box<dyn BufRead + Send>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl InteractiveTerminal {
    /// Creates prompts over arbitrary streams.
    #[must_use]
    pub fn new(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            input: Mutex::new(Box::new(input)),
            output: Mutex::new(Box::new(output)),
        }
    }

    /// Reads stdin, writes stderr.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()), std::io::stderr())
    }

    fn say(&self, text: &str) -> Result<(), SelectionError> {
        let mut out = self.output.lock();
        out.write_all(text.as_bytes())
            .and_then(|()| out.flush())
            .map_err(|e| SelectionError::Input(e.to_string()))
    }

    fn read_line(&self) -> Result<Option<String>, SelectionError> {
        let mut line = String::new();
        let read = self
            .input
            .lock()
            .read_line(&mut line)
            .map_err(|e| SelectionError::Input(e.to_string()))?;
        Ok((read > 0).then(|| line.trim().to_string()))
    }
}

impl fmt::Debug for InteractiveTerminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractiveTerminal").finish_non_exhaustive()
    }
}

impl Disambiguator for InteractiveTerminal {
    fn choose(&self, prompt: &CandidatePrompt) -> Result<usize, ApkflowError> {
        let mut listing = format!(
            "Multiple {}s match '{}':\n",
            prompt.kind, prompt.query
        );
        for candidate in &prompt.candidates {
            listing.push_str(&format!("  {candidate}\n"));
        }
        self.say(&listing)?;

        loop {
            self.say(&format!(
                "Select {} [1-{}] or q to quit: ",
                prompt.kind,
                prompt.candidates.len()
            ))?;
            let Some(answer) = self.read_line()? else {
                return Err(SelectionError::Aborted.into());
            };
            if answer.eq_ignore_ascii_case("q") {
                return Err(SelectionError::Aborted.into());
            }
            match answer.parse::<usize>().map(|i| prompt.select(i)) {
                Ok(Ok(position)) => return Ok(position),
                Ok(Err(e)) => self.say(&format!("{e}\n"))?,
                Err(_) => self.say(&format!("'{answer}' is not a number\n"))?,
            }
        }
    }
}

impl OperatorPrompt for InteractiveTerminal {
    fn is_interactive(&self) -> bool {
        true
    }

    fn confirm(&self, message: &str) -> Result<(), SelectionError> {
        self.say(&format!("{message}\nPress Enter to continue... "))?;
        self.read_line()?.map(|_| ()).ok_or(SelectionError::Aborted)
    }
}

/// Never blocks: returns the candidate list, or applies a preselected index.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended {
    selection: Option<usize>,
}

impl Unattended {
    /// Fails every ambiguous choice with the candidate list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a 1-based index to every ambiguous choice.
    #[must_use]
    pub fn with_selection(index: usize) -> Self {
        Self {
            selection: Some(index),
        }
    }
}

impl Disambiguator for Unattended {
    fn choose(&self, prompt: &CandidatePrompt) -> Result<usize, ApkflowError> {
        match self.selection {
            Some(index) => Ok(prompt.select(index)?),
            None => Err(prompt.clone().into_ambiguity().into()),
        }
    }
}

impl OperatorPrompt for Unattended {
    fn is_interactive(&self) -> bool {
        false
    }

    fn confirm(&self, _message: &str) -> Result<(), SelectionError> {
        Err(SelectionError::NonInteractive)
    }
}
