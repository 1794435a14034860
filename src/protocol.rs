//! Protocol parser and response formatting for dictd
//!
//! Requests are single lines: a keyword, a space, then bracketed tokens.
//! Tokens are parsed with nom combinators. Lenient mode instead searches the
//! arguments with the regular expressions older servers used.

use crate::error::{DictError, Result};
use nom::{
    bytes::complete::{tag, take_till1},
    character::complete::char,
    combinator::{all_consuming, verify},
    multi::many1,
    sequence::{delimited, preceded, separated_pair},
    IResult,
};
use regex::Regex;
use std::sync::OnceLock;

/// Longest key or value accepted on the wire, in characters
pub const MAX_TOKEN_CHARS: usize = 255;

/// Commands supported by the dictd protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    Put { key: String, value: String },
    Delete { key: String, value: String },
    Invalid,
}

impl Command {
    /// Encode the command as a request line, without the trailing newline
    pub fn to_line(&self) -> Option<String> {
        match self {
            Command::Get { key } => Some(format!("GET <{}>", key)),
            Command::Put { key, value } => Some(format!("PUT <{}> <{}>", key, value)),
            Command::Delete { key, value } => Some(format!("DELETE <{}> <{}>", key, value)),
            Command::Invalid => None,
        }
    }
}

/// How to treat a known keyword whose arguments do not parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// The arguments must be exactly the bracketed tokens, otherwise the
    /// request is rejected and answers 404
    #[default]
    Strict,
    /// Take the first (greedy) bracketed match anywhere in the arguments; with
    /// no match, run against an empty key and value. Matches old clients.
    Lenient,
}

/// Response types from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Found(Vec<String>),
    NotFound,
}

impl Response {
    /// Build a response from a store result
    pub fn from_values(values: Vec<String>) -> Self {
        if values.is_empty() {
            Response::NotFound
        } else {
            Response::Found(values)
        }
    }

    /// Serialize response to bytes for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::Found(values) => {
                let mut out = String::from("200");
                for value in values {
                    out.push_str(" <");
                    out.push_str(value);
                    out.push('>');
                }
                out.push('\n');
                out.into_bytes()
            }
            Response::NotFound => b"404\n".to_vec(),
        }
    }

    /// Parse a response line received from a server
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line == "404" {
            return Ok(Response::NotFound);
        }
        if !line.starts_with("200") {
            return Err(DictError::Protocol(format!(
                "Unknown response format: {}",
                line
            )));
        }

        let (_, values) = all_consuming(found_values)(line)?;
        Ok(Response::Found(
            values.into_iter().map(str::to_string).collect(),
        ))
    }
}

/// Parse one trimmed request line in strict mode
pub fn parse_command(line: &str) -> Command {
    parse_command_with(line, ParseMode::Strict)
}

/// Parse one request line into a command
pub fn parse_command_with(line: &str, mode: ParseMode) -> Command {
    let line = line.trim();
    let (keyword, args) = match line.split_once(' ') {
        Some((keyword, args)) => (keyword, args.trim()),
        None => (line, ""),
    };

    match keyword {
        "GET" => {
            let key = match mode {
                ParseMode::Strict => match all_consuming(token)(args) {
                    Ok((_, key)) => key.to_string(),
                    Err(_) => return Command::Invalid,
                },
                ParseMode::Lenient => lenient_key_pattern()
                    .captures(args)
                    .map(|caps| caps[1].to_string())
                    .unwrap_or_default(),
            };
            Command::Get { key }
        }
        "PUT" | "DELETE" => {
            let (key, value) = match mode {
                ParseMode::Strict => match all_consuming(token_pair)(args) {
                    Ok((_, (key, value))) => (key.to_string(), value.to_string()),
                    Err(_) => return Command::Invalid,
                },
                ParseMode::Lenient => lenient_pair_pattern()
                    .captures(args)
                    .map(|caps| (caps[1].to_string(), caps[2].to_string()))
                    .unwrap_or_default(),
            };
            if keyword == "PUT" {
                Command::Put { key, value }
            } else {
                Command::Delete { key, value }
            }
        }
        _ => Command::Invalid,
    }
}

fn lenient_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<(.{1,255})>").expect("static pattern"))
}

fn lenient_pair_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<(.{1,255})> <(.{1,255})>").expect("static pattern"))
}

/// Bracketed token: `<` then 1 to 255 characters other than `>` then `>`
fn token(input: &str) -> IResult<&str, &str> {
    delimited(
        char('<'),
        verify(take_till1(|c: char| c == '>'), |s: &str| {
            s.chars().count() <= MAX_TOKEN_CHARS
        }),
        char('>'),
    )(input)
}

/// Two tokens separated by a single space: `<key> <value>`
fn token_pair(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(token, char(' '), token)(input)
}

/// `200` followed by one or more ` <value>` entries
fn found_values(input: &str) -> IResult<&str, Vec<&str>> {
    preceded(
        tag("200"),
        many1(preceded(
            char(' '),
            delimited(char('<'), take_till1(|c: char| c == '>'), char('>')),
        )),
    )(input)
}
