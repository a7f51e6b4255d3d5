//! # Command Templates
//!
//! Commands, installer steps and `set_env` values are parsed once at load time into
//! templates made of literal text and placeholders, then rendered per environment.
//!
//! Two kinds of placeholders exist:
//!
//! - **Values** (`{env_name}`, `{env_dir}`, `{env_bin}`, `{project_root}`, `{work_dir}`,
//!   `{runtime}`) are replaced inline, anywhere inside an argument.
//! - **Lists** (`{posargs}`, `{requirements}`) splice zero or more arguments when they form
//!   a whole argument. A list that expands to nothing leaves no argument behind. Embedded
//!   in a larger argument, a list is joined with spaces.
//!
//! Any other `{...}` text is kept verbatim, so `find . -exec rm {} ;` still works.

use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Why a command or value could not be compiled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// No words at all.
    #[error("the command is empty")]
    EmptyCommand,
    /// Only an ignore marker, or a blank program.
    #[error("the program name is missing")]
    MissingProgram,
    /// A list placeholder where a single value is required.
    #[error("'{{{0}}}' expands to a list and cannot be used as {1}")]
    ListNotAllowed(&'static str, &'static str),
    /// Unbalanced quotes in a command line.
    #[error("could not split command line `{0}`")]
    UnparseableLine(String),
}

/// A placeholder that renders to exactly one string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variable {
    EnvName,
    EnvDir,
    EnvBin,
    ProjectRoot,
    WorkDir,
    Runtime,
}

/// A placeholder that renders to zero or more arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListVariable {
    Posargs,
    Requirements,
}

impl ListVariable {
    fn token(self) -> &'static str {
        match self {
            Self::Posargs => crate::constants::POSARGS_TOKEN,
            Self::Requirements => "requirements",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            crate::constants::POSARGS_TOKEN => Some(Self::Posargs),
            "requirements" => Some(Self::Requirements),
            _ => None,
        }
    }
}

impl Variable {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "env_name" => Some(Self::EnvName),
            "env_dir" => Some(Self::EnvDir),
            "env_bin" => Some(Self::EnvBin),
            "project_root" => Some(Self::ProjectRoot),
            "work_dir" => Some(Self::WorkDir),
            "runtime" => Some(Self::Runtime),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(Variable),
    Joined(ListVariable),
}

/// One argument of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ArgTemplate {
    Splice(ListVariable),
    Text(Vec<Segment>),
}

/// A template that must render to exactly one string (program names, `set_env`, `change_dir`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTemplate {
    segments: Vec<Segment>,
}

/// The values placeholders are rendered with.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// The environment name.
    pub env_name: &'a str,
    /// Root of the isolated context.
    pub env_dir: &'a Path,
    /// Executables directory of the context.
    pub env_bin: &'a Path,
    /// Directory holding the configuration.
    pub project_root: &'a Path,
    /// The configured work directory.
    pub work_dir: &'a Path,
    /// The environment runtime.
    pub runtime: &'a str,
    /// Extra arguments given after `--`.
    pub posargs: &'a [String],
    /// Resolved requirement specifiers.
    pub requirements: &'a [String],
}

impl<'a> RenderContext<'a> {
    fn value(&self, variable: Variable) -> Cow<'a, str> {
        match variable {
            Variable::EnvName => Cow::Borrowed(self.env_name),
            Variable::EnvDir => self.env_dir.to_string_lossy(),
            Variable::EnvBin => self.env_bin.to_string_lossy(),
            Variable::ProjectRoot => self.project_root.to_string_lossy(),
            Variable::WorkDir => self.work_dir.to_string_lossy(),
            Variable::Runtime => Cow::Borrowed(self.runtime),
        }
    }

    fn list(&self, list: ListVariable) -> &'a [String] {
        match list {
            ListVariable::Posargs => self.posargs,
            ListVariable::Requirements => self.requirements,
        }
    }
}

fn parse_segments(raw: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = raw;

    while let Some((before, after)) = rest.split_once('{') {
        literal.push_str(before);
        let placeholder = after.split_once('}').and_then(|(name, tail)| {
            let segment = Variable::from_name(name)
                .map(Segment::Var)
                .or_else(|| ListVariable::from_name(name).map(Segment::Joined))?;
            Some((segment, tail))
        });

        match placeholder {
            Some((segment, tail)) => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(segment);
                rest = tail;
            }
            None => {
                literal.push('{');
                rest = after;
            }
        }
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

fn render_segments(segments: &[Segment], ctx: &RenderContext<'_>) -> String {
    let mut rendered = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(text) => rendered.push_str(text),
            Segment::Var(variable) => rendered.push_str(&ctx.value(*variable)),
            Segment::Joined(list) => rendered.push_str(&ctx.list(*list).join(" ")),
        }
    }
    rendered
}

fn whole_list(raw: &str) -> Option<ListVariable> {
    raw.strip_prefix('{')
        .and_then(|inner| inner.strip_suffix('}'))
        .and_then(ListVariable::from_name)
}

impl ArgTemplate {
    fn parse(raw: &str) -> Self {
        match whole_list(raw) {
            Some(list) => Self::Splice(list),
            None => Self::Text(parse_segments(raw)),
        }
    }

    fn render_into(&self, ctx: &RenderContext<'_>, out: &mut Vec<String>) {
        match self {
            Self::Splice(list) => out.extend(ctx.list(*list).iter().cloned()),
            Self::Text(segments) => out.push(render_segments(segments, ctx)),
        }
    }

    fn mentions(&self, wanted: ListVariable) -> bool {
        match self {
            Self::Splice(list) => *list == wanted,
            Self::Text(segments) => segments.contains(&Segment::Joined(wanted)),
        }
    }
}

impl ValueTemplate {
    /// Parses a single-valued template. `what` names the field in error messages.
    pub fn parse(raw: &str, what: &'static str) -> Result<Self, TemplateError> {
        if let Some(list) = whole_list(raw) {
            return Err(TemplateError::ListNotAllowed(list.token(), what));
        }
        Ok(Self {
            segments: parse_segments(raw),
        })
    }

    /// Renders to one string.
    pub fn render(&self, ctx: &RenderContext<'_>) -> String {
        render_segments(&self.segments, ctx)
    }
}

/// A compiled command: program, arguments and whether its exit status is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: ValueTemplate,
    args: Vec<ArgTemplate>,
    ignore_exit: bool,
    source: String,
}

impl CommandTemplate {
    /// Builds a command from an argv-style list. A leading `-` on the program
    /// (`"-pytest"` or a separate `"-"` word) ignores the command's exit status.
    pub fn from_argv(argv: &[String]) -> Result<Self, TemplateError> {
        let source = shlex::try_join(argv.iter().map(String::as_str))
            .unwrap_or_else(|_| argv.join(" "));
        let mut words = argv.iter().map(String::as_str);
        let first = words.next().ok_or(TemplateError::EmptyCommand)?;

        let (ignore_exit, program) = match first.strip_prefix('-') {
            Some(stripped) if stripped.trim().is_empty() => {
                (true, words.next().ok_or(TemplateError::MissingProgram)?)
            }
            Some(stripped) => (true, stripped),
            None => (false, first),
        };
        Self::build(ignore_exit, program, words, source)
    }

    /// Builds a command from a single line, split with POSIX shell rules.
    pub fn from_line(line: &str) -> Result<Self, TemplateError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(TemplateError::EmptyCommand);
        }
        let (ignore_exit, command_line) = match trimmed.strip_prefix('-') {
            Some(stripped) => (true, stripped.trim()),
            None => (false, trimmed),
        };

        let parts = shlex::split(command_line)
            .ok_or_else(|| TemplateError::UnparseableLine(trimmed.to_string()))?;
        let mut words = parts.iter().map(String::as_str);
        let program = words.next().ok_or(TemplateError::MissingProgram)?;
        Self::build(ignore_exit, program, words, trimmed.to_string())
    }

    fn build<'w>(
        ignore_exit: bool,
        program: &str,
        args: impl Iterator<Item = &'w str>,
        source: String,
    ) -> Result<Self, TemplateError> {
        let program = program.trim();
        if program.is_empty() {
            return Err(TemplateError::MissingProgram);
        }
        Ok(Self {
            program: ValueTemplate::parse(program, "the program name")?,
            args: args.map(ArgTemplate::parse).collect(),
            ignore_exit,
            source,
        })
    }

    /// The command as it was written in the configuration.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether a non-zero exit is tolerated (`-` prefix).
    pub fn ignores_exit(&self) -> bool {
        self.ignore_exit
    }

    /// Whether `{posargs}` appears anywhere in the arguments.
    pub fn uses_posargs(&self) -> bool {
        self.args.iter().any(|arg| arg.mentions(ListVariable::Posargs))
    }

    /// Renders the program and splices list placeholders.
    pub fn render(&self, ctx: &RenderContext<'_>) -> RenderedCommand {
        let mut args = Vec::with_capacity(self.args.len() + ctx.posargs.len());
        for arg in &self.args {
            arg.render_into(ctx, &mut args);
        }
        RenderedCommand {
            program: self.program.render(ctx),
            args,
            ignore_exit: self.ignore_exit,
        }
    }
}

/// A command ready to be spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    /// Program to spawn.
    pub program: String,
    /// Arguments, list placeholders already spliced.
    pub args: Vec<String>,
    /// Copied from the template.
    pub ignore_exit: bool,
}

impl fmt::Display for RenderedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        match shlex::try_join(words) {
            Ok(joined) => f.write_str(&joined),
            Err(_) => {
                f.write_str(&self.program)?;
                for arg in &self.args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
        }
    }
}
