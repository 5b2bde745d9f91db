//! Grammar-Driven Argument Parser
//!
//! Matches a flat sequence of input tokens against an ordered list of
//! [`ArgSpec`]s. One recursive algorithm is applied at three granularities:
//!
//! - a leaf command's argument list, which must consume all remaining input
//! - a block's member list, which may consume a prefix of the input
//! - a oneof's branch list, where the branch consuming the most input wins
//!
//! ## Reordering
//!
//! An optional, token-identified argument that does not match at the cursor
//! is moved to a deferred pool. The pool is re-appended to the active list
//! every time another token-identified optional argument matches, which is
//! what lets `SET k v GET NX` and `SET k v NX GET` parse the same way.
//!
//! ## Session state
//!
//! Each call owns its cursor, deferred pool and keyword position records.
//! Nothing is shared between calls and the specs are never mutated.

use super::value::{ArgValue, ParsedArgs};
use crate::spec::{ArgSpec, ArgType, CommandSpec};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};

/// Parsing mode flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Keep integer and unix-time values as literal text
    pub integers_as_text: bool,

    /// Record the input index of every matched keyword
    pub record_positions: bool,

    /// Attach the starting input index to every parsed block
    pub block_positions: bool,
}

impl ParseOptions {
    /// The flags a command is normally parsed with.
    ///
    /// `BITFIELD` offsets may be written `#N` and its operations run in
    /// input order, so its integers stay text and its blocks carry their
    /// input position.
    pub fn for_command(name: &str) -> Self {
        if name.eq_ignore_ascii_case("bitfield") {
            Self {
                integers_as_text: true,
                block_positions: true,
                ..Self::default()
            }
        } else {
            Self::default()
        }
    }

    /// The same flags with keyword position recording switched on.
    pub fn recording(self) -> Self {
        Self {
            record_positions: true,
            ..self
        }
    }
}

/// Absolute input indices at which each keyword matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordPositions(HashMap<String, Vec<usize>>);

impl KeywordPositions {
    fn from_records(records: Vec<(String, usize)>) -> Self {
        let mut map: HashMap<String, Vec<usize>> = HashMap::new();
        for (keyword, position) in records {
            map.entry(keyword).or_default().push(position);
        }
        Self(map)
    }

    /// Positions of a keyword, in input order (case-insensitive).
    pub fn get(&self, keyword: &str) -> &[usize] {
        self.0
            .get(&keyword.to_ascii_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The result of resolving and parsing one command invocation.
#[derive(Debug)]
pub struct ParseOutcome<'s> {
    /// Deepest (sub)command resolved
    pub spec: &'s CommandSpec,

    /// Positive: depth reached on success. Zero: bad arguments for `spec`.
    /// Negative: unknown subcommand below `spec`.
    pub depth: i32,

    pub args: ParsedArgs,

    /// Keyword positions, filled when recording was requested
    pub positions: KeywordPositions,

    /// The unrecognized subcommand name when `depth` is negative
    pub unknown_subcommand: Option<Bytes>,
}

impl ParseOutcome<'_> {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.depth > 0
    }

    /// Token of the deepest resolved (sub)command.
    pub fn token(&self) -> &str {
        &self.spec.token
    }
}

/// Resolves `argv` (command name at index 0) against `spec`, descending
/// subcommands, and parses the leaf's arguments.
pub fn parse_command<'s>(
    spec: &'s CommandSpec,
    argv: &[Bytes],
    options: ParseOptions,
) -> ParseOutcome<'s> {
    let mut parser = ArgParser::new(argv, options);
    let resolution = parser.resolve(spec, 1, 1);
    ParseOutcome {
        spec: resolution.spec,
        depth: resolution.depth,
        args: resolution.args,
        positions: KeywordPositions::from_records(parser.records),
        unknown_subcommand: resolution.unknown,
    }
}

/// Parses `input` against a bare argument list, requiring full consumption.
pub fn parse_arguments(
    specs: &[ArgSpec],
    input: &[Bytes],
    options: ParseOptions,
) -> Option<ParsedArgs> {
    let specs: Vec<&ArgSpec> = specs.iter().collect();
    ArgParser::new(input, options)
        .match_specs(&specs, 0, true)
        .map(|(args, _)| args)
}

/// What a single argument matched.
#[derive(Debug)]
enum Binding {
    Value(ArgValue),
    /// A oneof whose winning branch carries a value
    OneOf { branch: String, value: ArgValue },
    /// A oneof whose winning branch is a pure-token
    OneOfToken { branch: String },
}

impl Binding {
    /// The value this binding contributes as one item of a repeating run.
    fn into_value(self) -> ArgValue {
        match self {
            Binding::Value(value) => value,
            Binding::OneOfToken { branch } => ArgValue::Text(Bytes::from(branch)),
            Binding::OneOf { branch, value } => {
                let mut nested = ParsedArgs::new();
                nested.insert(branch, value);
                ArgValue::Nested(nested)
            }
        }
    }
}

struct Resolution<'s> {
    spec: &'s CommandSpec,
    depth: i32,
    args: ParsedArgs,
    unknown: Option<Bytes>,
}

struct ArgParser<'i> {
    input: &'i [Bytes],
    options: ParseOptions,
    /// (keyword, index) records; rolled back by truncation
    records: Vec<(String, usize)>,
}

impl<'i> ArgParser<'i> {
    fn new(input: &'i [Bytes], options: ParseOptions) -> Self {
        Self {
            input,
            options,
            records: Vec::new(),
        }
    }

    fn resolve<'s>(&mut self, spec: &'s CommandSpec, cursor: usize, depth: i32) -> Resolution<'s> {
        if spec.is_leaf() {
            let specs: Vec<&ArgSpec> = spec.arguments.iter().collect();
            return match self.match_specs(&specs, cursor, true) {
                Some((args, _)) => Resolution {
                    spec,
                    depth,
                    args,
                    unknown: None,
                },
                None => Resolution {
                    spec,
                    depth: 0,
                    args: ParsedArgs::new(),
                    unknown: None,
                },
            };
        }

        let Some(word) = self.input.get(cursor) else {
            return Resolution {
                spec,
                depth: 0,
                args: ParsedArgs::new(),
                unknown: None,
            };
        };

        match spec.subcommand(&String::from_utf8_lossy(word)) {
            Some(child) => self.resolve(child, cursor + 1, depth + 1),
            None => Resolution {
                spec,
                depth: -depth,
                args: ParsedArgs::new(),
                unknown: Some(word.clone()),
            },
        }
    }

    /// Matches an ordered spec list starting at `start`.
    ///
    /// Returns the bag and the number of tokens consumed.
    fn match_specs<'s>(
        &mut self,
        specs: &[&'s ArgSpec],
        start: usize,
        require_all: bool,
    ) -> Option<(ParsedArgs, usize)> {
        let mut queue: VecDeque<&'s ArgSpec> = specs.iter().copied().collect();
        let mut deferred: Vec<&'s ArgSpec> = Vec::new();
        let mut args = ParsedArgs::new();
        let mut cursor = start;
        let mut found_multiple = false;

        while let Some(spec) = queue.pop_front() {
            let mark = self.records.len();
            let matched = if spec.is_repeating() {
                let rest: Vec<&ArgSpec> = queue.iter().copied().collect();
                self.match_repeating(spec, cursor, &rest)
            } else {
                self.match_one(spec, cursor, false)
            };

            match matched {
                Some((binding, used)) => {
                    cursor += used;
                    if spec.is_repeating() {
                        found_multiple = true;
                    }
                    bind(&mut args, spec, binding);
                    if spec.optional && spec.is_token() {
                        queue.extend(deferred.drain(..));
                    }
                }
                None => {
                    self.records.truncate(mark);
                    if spec.optional {
                        if spec.is_token() && cursor < self.input.len() {
                            deferred.push(spec);
                        }
                    } else if !found_multiple {
                        return None;
                    }
                }
            }
        }

        if require_all && cursor != self.input.len() {
            return None;
        }
        Some((args, cursor - start))
    }

    /// Matches a multiple / multiple_token argument as many times as it
    /// will go, stopping early once `rest` can consume the remaining input.
    fn match_repeating(
        &mut self,
        spec: &ArgSpec,
        start: usize,
        rest: &[&ArgSpec],
    ) -> Option<(Binding, usize)> {
        let mut items = Vec::new();
        let mut cursor = start;

        loop {
            let skip_token = !items.is_empty() && !spec.multiple_token;
            let mark = self.records.len();
            match self.match_one(spec, cursor, skip_token) {
                Some((binding, used)) if used > 0 => {
                    items.push(binding.into_value());
                    cursor += used;
                }
                _ => {
                    self.records.truncate(mark);
                    break;
                }
            }

            if cursor >= self.input.len() {
                break;
            }
            let mark = self.records.len();
            let rest_fits = self.match_specs(rest, cursor, true).is_some();
            self.records.truncate(mark);
            if rest_fits {
                break;
            }
        }

        if items.is_empty() {
            return None;
        }
        Some((Binding::Value(ArgValue::List(items)), cursor - start))
    }

    /// Matches one occurrence of `spec` at `start`.
    fn match_one(
        &mut self,
        spec: &ArgSpec,
        start: usize,
        skip_token: bool,
    ) -> Option<(Binding, usize)> {
        let mut cursor = start;

        if let Some(token) = spec.token.as_deref().filter(|_| !skip_token) {
            let word = self.input.get(cursor)?;
            if !word.eq_ignore_ascii_case(token.as_bytes()) {
                return None;
            }
            if self.options.record_positions {
                self.records.push((token.to_ascii_uppercase(), cursor));
            }
            cursor += 1;
        }

        let (binding, used) = match spec.kind {
            ArgType::PureToken => (Binding::Value(ArgValue::Present), 0),
            ArgType::Key | ArgType::String | ArgType::Pattern => {
                let word = self.input.get(cursor)?;
                (Binding::Value(ArgValue::Text(word.clone())), 1)
            }
            ArgType::Integer | ArgType::UnixTime => {
                let word = self.input.get(cursor)?;
                let value = if self.options.integers_as_text {
                    ArgValue::Text(word.clone())
                } else {
                    ArgValue::Integer(parse_integer(word)?)
                };
                (Binding::Value(value), 1)
            }
            ArgType::Double => {
                let word = self.input.get(cursor)?;
                (Binding::Value(ArgValue::Double(parse_double(word)?)), 1)
            }
            ArgType::Oneof => self.match_oneof(spec, cursor)?,
            ArgType::Block => {
                let members: Vec<&ArgSpec> = spec.children.iter().collect();
                let (mut nested, used) = self.match_specs(&members, cursor, false)?;
                if used == 0 {
                    return None;
                }
                if self.options.block_positions {
                    nested.set_position(start);
                }
                (Binding::Value(ArgValue::Nested(nested)), used)
            }
        };

        Some((binding, cursor - start + used))
    }

    /// Tries every branch at the same cursor. The strictly longest match
    /// wins, so the first declared branch wins a tie.
    fn match_oneof(&mut self, spec: &ArgSpec, cursor: usize) -> Option<(Binding, usize)> {
        let base = self.records.len();
        let mut best: Option<(Binding, usize, Vec<(String, usize)>)> = None;

        for branch in &spec.children {
            let result = if branch.is_repeating() {
                self.match_repeating(branch, cursor, &[])
            } else {
                self.match_one(branch, cursor, false)
            };
            let recorded: Vec<_> = self.records.drain(base..).collect();

            let Some((binding, used)) = result else {
                continue;
            };
            if best.as_ref().is_some_and(|(_, best_used, _)| used <= *best_used) {
                continue;
            }
            let binding = if branch.kind == ArgType::PureToken {
                Binding::OneOfToken {
                    branch: branch.name.clone(),
                }
            } else {
                Binding::OneOf {
                    branch: branch.name.clone(),
                    value: binding.into_value(),
                }
            };
            best = Some((binding, used, recorded));
        }

        let (binding, used, recorded) = best?;
        self.records.extend(recorded);
        Some((binding, used))
    }
}

fn bind(args: &mut ParsedArgs, spec: &ArgSpec, binding: Binding) {
    match binding {
        Binding::Value(value) => args.insert(spec.name.as_str(), value),
        Binding::OneOf { branch, value } => {
            args.insert(format!("{}.{}", spec.name, branch), value)
        }
        Binding::OneOfToken { branch } => {
            args.insert(format!("{}.{}", spec.name, branch), ArgValue::Present)
        }
    }
}

/// Strict signed 64-bit decimal: no sign other than a leading `-`, no
/// leading zeros, no `-0`.
pub(crate) fn parse_integer(word: &[u8]) -> Option<i64> {
    let text = std::str::from_utf8(word).ok()?;
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if (digits.len() > 1 && digits.starts_with('0')) || text == "-0" {
        return None;
    }
    text.parse().ok()
}

/// IEEE double in any form Rust accepts, except NaN.
pub(crate) fn parse_double(word: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(word).ok()?;
    if text.is_empty() || text.trim() != text {
        return None;
    }
    text.parse::<f64>().ok().filter(|v| !v.is_nan())
}
