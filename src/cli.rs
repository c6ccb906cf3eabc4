//! Input handling for the `ilp_cli` tool.
//!
//! The interactive mode reads one command per line: `.flush`, `.exit`, or a
//! row written as
//!
//! ```text
//! table[,symbol=value...] column=value[,column=value...] [timestamp_nanos]
//! ```
//!
//! Column values are `t`/`f`, integers with an `i` suffix, quoted strings or
//! doubles. Rows are re-encoded through a [`Sender`], so names and values are
//! validated exactly as they would be from code.
use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::protocol::TimeUnit;
use crate::sender::Sender;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("could not read input: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Syntax(String),
}

/// Possible commands from a user.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `.exit`
    Exit,
    /// `.flush`
    Flush,
    Row(RowInput),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Long(i64),
    Double(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowInput {
    pub table: String,
    pub symbols: Vec<(String, String)>,
    pub columns: Vec<(String, Value)>,
    pub timestamp: Option<i64>,
}

impl RowInput {
    /// Writes the row into `sender`. On error the partial row is cancelled.
    pub fn write_to(&self, sender: &mut Sender) -> crate::Result<()> {
        let result = self.write_unchecked(sender);
        if result.is_err() {
            sender.cancel_row()?;
        }
        result
    }

    fn write_unchecked(&self, sender: &mut Sender) -> crate::Result<()> {
        sender.table(&self.table)?;
        for (name, value) in &self.symbols {
            sender.symbol(name, value)?;
        }
        for (name, value) in &self.columns {
            match value {
                Value::Bool(v) => sender.column_bool(name, *v)?,
                Value::Long(v) => sender.column_i64(name, *v)?,
                Value::Double(v) => sender.column_f64(name, *v)?,
                Value::Str(v) => sender.column_str(name, v)?,
            };
        }
        match self.timestamp {
            Some(ts) => sender.at(ts, TimeUnit::Nanos),
            None => sender.at_now(),
        }
    }
}

/// Prompt the user for a command. Returns `None` at end of input.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Option<Command>, InputError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(None);
    }
    parse_command(s.trim_end_matches(['\r', '\n'])).map(Some)
}

pub fn parse_command(line: &str) -> Result<Command, InputError> {
    match line.trim() {
        ".exit" => Ok(Command::Exit),
        ".flush" => Ok(Command::Flush),
        s if s.starts_with('.') => Err(InputError::Syntax(format!("unrecognized command '{s}'"))),
        s => parse_row(s).map(Command::Row),
    }
}

fn syntax(msg: impl Into<String>) -> InputError {
    InputError::Syntax(msg.into())
}

/// Splits on `sep` outside double quotes.
fn split_unquoted(s: &str, sep: impl Fn(char) -> bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            c if !quoted && sep(c) => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_row(line: &str) -> Result<RowInput, InputError> {
    let sections: Vec<&str> = split_unquoted(line, char::is_whitespace)
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    let (head, fields, timestamp) = match sections.as_slice() {
        [head, fields] => (*head, *fields, None),
        [head, fields, ts] => {
            let ts = ts
                .parse::<i64>()
                .map_err(|_| syntax(format!("invalid timestamp '{ts}'")))?;
            (*head, *fields, Some(ts))
        }
        [_] => return Err(syntax("a row needs at least one column")),
        _ => return Err(syntax("expected 'table[,symbol=value...] column=value[,...] [timestamp]'")),
    };

    let mut head = head.split(',');
    let table = head.next().unwrap_or_default().to_string();
    let symbols = head
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| syntax(format!("symbol '{pair}' has no value")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let columns = split_unquoted(fields, |c| c == ',')
        .into_iter()
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| syntax(format!("column '{pair}' has no value")))?;
            Ok((name.to_string(), parse_value(value)?))
        })
        .collect::<Result<Vec<_>, InputError>>()?;

    Ok(RowInput {
        table,
        symbols,
        columns,
        timestamp,
    })
}

fn parse_value(value: &str) -> Result<Value, InputError> {
    if let Some(inner) = value.strip_prefix('"') {
        let inner = inner
            .strip_suffix('"')
            .ok_or_else(|| syntax(format!("unterminated string {value}")))?;
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some(other) => out.push(other),
                    None => out.push('\\'),
                }
            } else {
                out.push(c);
            }
        }
        return Ok(Value::Str(out));
    }
    match value {
        "t" | "T" | "true" | "TRUE" => return Ok(Value::Bool(true)),
        "f" | "F" | "false" | "FALSE" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Some(long) = value.strip_suffix('i') {
        return long
            .parse()
            .map(Value::Long)
            .map_err(|_| syntax(format!("invalid integer '{value}'")));
    }
    value
        .parse()
        .map(Value::Double)
        .map_err(|_| syntax(format!("invalid value '{value}'")))
}
