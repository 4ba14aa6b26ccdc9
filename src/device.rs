//! Prompt recognition for interactive device shells.
//!
//! A [`PromptHandler`] classifies every line a device prints: ordinary output,
//! a pager marker, an error message, a question that needs an answer
//! (password, host key confirmation) or the shell prompt that ends a command.
//! The SSH session uses it to know when a command has finished and what to
//! type when the device asks something.

use std::collections::HashMap;

use log::trace;
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use crate::error::ConnectError;

/// What to type when a device asks a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// Fixed text, sent as is.
    Text(String),
    /// Text looked up in [`PromptHandler::dyn_param`] under this key.
    Param(String),
}

/// Answer to one interactive question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputAnswer {
    pub answer: Answer,
    /// Keep the question line in the captured output.
    pub record: bool,
}

impl InputAnswer {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            answer: Answer::Text(text.into()),
            record: false,
        }
    }

    pub fn param(key: impl Into<String>) -> Self {
        Self {
            answer: Answer::Param(key.into()),
            record: false,
        }
    }

    pub fn recorded(mut self) -> Self {
        self.record = true;
        self
    }
}

const OUTPUT: &str = "output";
const MORE: &str = "more";
const ERROR: &str = "error";

#[derive(Debug, Clone, PartialEq, Eq)]
enum LineKind {
    Output,
    More,
    Error,
    Prompt(String),
    Input(String),
}

static UNMATCHED: LineKind = LineKind::Output;

impl LineKind {
    fn name(&self) -> &str {
        match self {
            LineKind::Output => OUTPUT,
            LineKind::More => MORE,
            LineKind::Error => ERROR,
            LineKind::Prompt(name) | LineKind::Input(name) => name,
        }
    }
}

/// Line classifier driven by one regex set per template.
#[derive(Debug, Clone)]
pub struct PromptHandler {
    patterns: RegexSet,
    /// Kind of line matched by each pattern, by pattern index.
    kinds: Vec<LineKind>,
    answers: HashMap<String, InputAnswer>,
    ignore_errors: Option<RegexSet>,
    /// Values for [`Answer::Param`] answers (e.g. passwords).
    pub dyn_param: HashMap<String, String>,
    state: LineKind,
    last_prompt: Option<String>,
}

impl PromptHandler {
    /// Creates a handler from regex patterns.
    ///
    /// # Arguments
    ///
    /// * `prompt` - (state name, patterns) for shell prompts
    /// * `write` - (state name, answer, patterns) for questions the device may ask
    /// * `more_regex` - pager markers, answered with a space
    /// * `error_regex` - lines reporting a failed command
    /// * `ignore_errors` - error lines that are not failures
    ///
    /// Earlier patterns win when several match the same line.
    pub fn new<I, S>(
        prompt: Vec<(String, I)>,
        write: Vec<(String, InputAnswer, I)>,
        more_regex: I,
        error_regex: I,
        ignore_errors: I,
    ) -> Result<PromptHandler, ConnectError>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = S>,
    {
        let mut patterns: Vec<String> = Vec::new();
        let mut kinds: Vec<LineKind> = Vec::new();
        let mut push = |pattern: String, kind: LineKind| {
            patterns.push(pattern);
            kinds.push(kind);
        };

        for pattern in more_regex {
            push(pattern.as_ref().to_string(), LineKind::More);
        }
        for pattern in error_regex {
            push(pattern.as_ref().to_string(), LineKind::Error);
        }

        let mut has_prompt = false;
        for (name, regexes) in prompt {
            let name = name.to_ascii_lowercase();
            for pattern in regexes {
                has_prompt = true;
                // Prompts may be preceded by NUL padding and a carriage return.
                let body = pattern.as_ref().trim_start_matches('^');
                push(
                    format!(r"^\x00*\r?{body}"),
                    LineKind::Prompt(name.clone()),
                );
            }
        }
        if !has_prompt {
            return Err(ConnectError::InvalidTemplateConfig(
                "at least one prompt pattern is required".to_string(),
            ));
        }

        let mut answers = HashMap::new();
        answers.insert(MORE.to_string(), InputAnswer::text(" "));
        for (name, answer, regexes) in write {
            let name = name.to_ascii_lowercase();
            for pattern in regexes {
                push(pattern.as_ref().to_string(), LineKind::Input(name.clone()));
            }
            answers.insert(name, answer);
        }

        let patterns = RegexSet::new(&patterns).map_err(|err| {
            ConnectError::InvalidTemplateConfig(format!("failed to build state regex set: {err}"))
        })?;

        let ignore: Vec<String> = ignore_errors
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        let ignore_errors = if ignore.is_empty() {
            None
        } else {
            Some(RegexSet::new(&ignore).map_err(|err| {
                ConnectError::InvalidTemplateConfig(format!(
                    "invalid ignore_errors regex set: {err}"
                ))
            })?)
        };

        Ok(Self {
            patterns,
            kinds,
            answers,
            ignore_errors,
            dyn_param: HashMap::new(),
            state: LineKind::Output,
            last_prompt: None,
        })
    }

    fn classify(&self, line: &str) -> &LineKind {
        self.patterns
            .matches(line)
            .into_iter()
            .next()
            .and_then(|index| self.kinds.get(index))
            .unwrap_or(&UNMATCHED)
    }

    /// Feeds one line of device output.
    pub fn read(&mut self, line: &str) {
        trace!("Read line: '{:?}'", line);
        let kind = self.classify(line).clone();
        self.state = match kind {
            LineKind::Error
                if self
                    .ignore_errors
                    .as_ref()
                    .is_some_and(|set| set.is_match(line)) =>
            {
                trace!("Ignoring error line");
                LineKind::Output
            }
            LineKind::Prompt(name) => {
                self.last_prompt = Some(line.to_string());
                LineKind::Prompt(name)
            }
            other => other,
        };
    }

    /// `true` if the line is a shell prompt.
    pub fn read_prompt(&self, line: &str) -> bool {
        matches!(self.classify(line), LineKind::Prompt(_))
    }

    /// Text to type if the line asks for input, with the record flag.
    ///
    /// Parameter answers without a value in `dyn_param` yield `None`.
    pub fn read_need_write(&self, line: &str) -> Option<(String, bool)> {
        let name = match self.classify(line) {
            LineKind::More => MORE,
            LineKind::Input(name) => name.as_str(),
            _ => return None,
        };
        let input = self.answers.get(name)?;
        let text = match &input.answer {
            Answer::Text(text) => text.clone(),
            Answer::Param(key) => self.dyn_param.get(key)?.clone(),
        };
        Some((text, input.record))
    }

    /// Name of the state the last line put the handler in.
    pub fn current_state(&self) -> &str {
        self.state.name()
    }

    /// Last prompt line seen.
    pub fn current_prompt(&self) -> Option<&str> {
        self.last_prompt.as_deref()
    }

    /// `true` when the last line was an error message.
    pub fn error(&self) -> bool {
        self.state == LineKind::Error
    }

    /// Every state name the handler can report, without duplicates.
    pub fn states(&self) -> Vec<String> {
        let mut names = vec![OUTPUT.to_string(), MORE.to_string(), ERROR.to_string()];
        for kind in &self.kinds {
            let name = kind.name();
            if !names.iter().any(|known| known == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Forgets the state of the previous command. The last prompt is kept.
    pub fn reset(&mut self) {
        self.state = LineKind::Output;
    }
}

/// Carriage-return and backspace runs that terminals emit at the start of a line.
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );
