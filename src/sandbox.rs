//! Bounded query scripts over the read-only memory surface.
//!
//! User-supplied scripts run against exactly two capabilities — reading a
//! file and listing files — composed through a small pipeline language:
//!
//! ```text
//! read "memory/notes.md"
//! list "memory/" | filter path contains "project" | map path | limit 10
//! list | sum size
//! ```
//!
//! Each non-empty line is one pipeline; the script's value is the last
//! line's value, serialized to JSON. Execution is capped at 30 seconds
//! and 256 file reads. No filesystem, network, or clock access exists
//! beyond the two sources.

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::store::ObjectStore;

/// Hard wall-clock cap per script.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Hard cap on file reads per script (`read` sources plus `map content`).
const MAX_READS: usize = 256;

pub struct Sandbox {
    store: Arc<dyn ObjectStore>,
}

impl Sandbox {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Run a script. All failures — parse, evaluation, timeout — come
    /// back as `Err` with a human-readable message; the caller wraps
    /// them into the structured `Execution failed` tool error.
    pub async fn execute(&self, script: &str) -> Result<Value> {
        let pipelines = parse_script(script)?;
        if pipelines.is_empty() {
            bail!("empty script");
        }

        let run = async {
            let mut reads_left = MAX_READS;
            let mut last = Value::Null;
            for pipeline in &pipelines {
                last = self.eval(pipeline, &mut reads_left).await?;
            }
            Ok::<Value, anyhow::Error>(last)
        };

        match tokio::time::timeout(EXECUTION_TIMEOUT, run).await {
            Ok(result) => result,
            Err(_) => bail!("execution timed out after {}s", EXECUTION_TIMEOUT.as_secs()),
        }
    }

    async fn eval(&self, pipeline: &Pipeline, reads_left: &mut usize) -> Result<Value> {
        let mut value = match &pipeline.source {
            Source::Read(path) => {
                take_read(reads_left)?;
                match self.store.read(path).await? {
                    Some(file) => Value::String(file.content),
                    None => Value::Null,
                }
            }
            Source::List(prefix) => {
                let rows = self.store.list(prefix, true).await?;
                Value::Array(
                    rows.into_iter()
                        .map(|r| {
                            json!({
                                "path": r.path,
                                "size": r.size,
                                "updated_at": r.updated_at,
                            })
                        })
                        .collect(),
                )
            }
        };

        for stage in &pipeline.stages {
            value = self.apply(stage, value, reads_left).await?;
        }
        Ok(value)
    }

    async fn apply(&self, stage: &Stage, value: Value, reads_left: &mut usize) -> Result<Value> {
        match stage {
            Stage::Filter { field, op, operand } => {
                let rows = into_rows(value, "filter")?;
                let mut kept = Vec::new();
                for row in rows {
                    let field_value = project(&row, *field)?;
                    if op.holds(&field_value, operand) {
                        kept.push(row);
                    }
                }
                Ok(Value::Array(kept))
            }
            Stage::Map(field) => {
                let rows = into_rows(value, "map")?;
                let mut mapped = Vec::new();
                for row in rows {
                    if *field == Field::Content {
                        take_read(reads_left)?;
                        let path = project(&row, Field::Path)?
                            .as_str()
                            .map(str::to_string)
                            .ok_or_else(|| anyhow!("map content requires a path field"))?;
                        let content = self
                            .store
                            .read(&path)
                            .await?
                            .map(|f| Value::String(f.content))
                            .unwrap_or(Value::Null);
                        mapped.push(content);
                    } else {
                        mapped.push(project(&row, *field)?);
                    }
                }
                Ok(Value::Array(mapped))
            }
            Stage::Limit(n) => {
                let mut rows = into_rows(value, "limit")?;
                rows.truncate(*n);
                Ok(Value::Array(rows))
            }
            Stage::Count => {
                let rows = into_rows(value, "count")?;
                Ok(json!(rows.len()))
            }
            Stage::Sum(field) => {
                let rows = into_rows(value, "sum")?;
                let mut total = 0f64;
                for row in rows {
                    let number = match field {
                        Some(f) => project(&row, *f)?,
                        None => row,
                    };
                    total += number
                        .as_f64()
                        .ok_or_else(|| anyhow!("sum requires numeric values"))?;
                }
                Ok(json!(total))
            }
            Stage::First => {
                let mut rows = into_rows(value, "first")?;
                Ok(if rows.is_empty() {
                    Value::Null
                } else {
                    rows.remove(0)
                })
            }
        }
    }
}

fn take_read(reads_left: &mut usize) -> Result<()> {
    if *reads_left == 0 {
        bail!("read limit of {MAX_READS} files exceeded");
    }
    *reads_left -= 1;
    Ok(())
}

fn into_rows(value: Value, stage: &str) -> Result<Vec<Value>> {
    match value {
        Value::Array(rows) => Ok(rows),
        other => bail!("{stage} expects a list, got {}", kind_name(&other)),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn project(row: &Value, field: Field) -> Result<Value> {
    let key = field.key();
    row.get(key)
        .cloned()
        .ok_or_else(|| anyhow!("row has no field `{key}`"))
}

// ── Script model ─────────────────────────────────────────────────────────

struct Pipeline {
    source: Source,
    stages: Vec<Stage>,
}

enum Source {
    Read(String),
    List(String),
}

enum Stage {
    Filter {
        field: Field,
        op: FilterOp,
        operand: Value,
    },
    Map(Field),
    Limit(usize),
    Count,
    Sum(Option<Field>),
    First,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Path,
    Size,
    UpdatedAt,
    Content,
}

impl Field {
    fn parse(word: &str) -> Result<Self> {
        match word {
            "path" => Ok(Self::Path),
            "size" => Ok(Self::Size),
            "updated_at" => Ok(Self::UpdatedAt),
            "content" => Ok(Self::Content),
            other => bail!("unknown field `{other}`"),
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Size => "size",
            Self::UpdatedAt => "updated_at",
            Self::Content => "content",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FilterOp {
    Contains,
    Eq,
    Ne,
    Gt,
    Lt,
    StartsWith,
    EndsWith,
}

impl FilterOp {
    fn parse(word: &str) -> Result<Self> {
        match word {
            "contains" => Ok(Self::Contains),
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            "starts_with" => Ok(Self::StartsWith),
            "ends_with" => Ok(Self::EndsWith),
            other => bail!("unknown operator `{other}`"),
        }
    }

    fn holds(self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Contains => match (left.as_str(), right.as_str()) {
                (Some(l), Some(r)) => l.contains(r),
                _ => false,
            },
            Self::StartsWith => match (left.as_str(), right.as_str()) {
                (Some(l), Some(r)) => l.starts_with(r),
                _ => false,
            },
            Self::EndsWith => match (left.as_str(), right.as_str()) {
                (Some(l), Some(r)) => l.ends_with(r),
                _ => false,
            },
            Self::Eq => values_equal(left, right),
            Self::Ne => !values_equal(left, right),
            Self::Gt => compare(left, right).map(|o| o.is_gt()).unwrap_or(false),
            Self::Lt => compare(left, right).map(|o| o.is_lt()).unwrap_or(false),
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l == r;
    }
    left == right
}

fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l.partial_cmp(&r);
    }
    // RFC 3339 timestamps order correctly as strings.
    if let (Some(l), Some(r)) = (left.as_str(), right.as_str()) {
        return Some(l.cmp(r));
    }
    None
}

// ── Parsing ──────────────────────────────────────────────────────────────

fn parse_script(script: &str) -> Result<Vec<Pipeline>> {
    script
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_pipeline)
        .collect()
}

fn parse_pipeline(line: &str) -> Result<Pipeline> {
    let mut segments = split_on_pipes(line)?.into_iter();
    let source_tokens = tokenize(&segments.next().unwrap_or_default())?;
    let source = parse_source(&source_tokens)?;

    let mut stages = Vec::new();
    for segment in segments {
        let tokens = tokenize(&segment)?;
        stages.push(parse_stage(&tokens)?);
    }
    Ok(Pipeline { source, stages })
}

fn parse_source(tokens: &[Token]) -> Result<Source> {
    match tokens {
        [Token::Word(w), Token::Str(path)] if w == "read" => Ok(Source::Read(path.clone())),
        [Token::Word(w), Token::Str(prefix)] if w == "list" => Ok(Source::List(prefix.clone())),
        [Token::Word(w)] if w == "list" => Ok(Source::List(String::new())),
        _ => bail!("pipeline must start with `read \"path\"` or `list [\"prefix\"]`"),
    }
}

fn parse_stage(tokens: &[Token]) -> Result<Stage> {
    let Some(Token::Word(head)) = tokens.first() else {
        bail!("empty pipeline stage");
    };
    match head.as_str() {
        "filter" => match tokens {
            [_, Token::Word(field), Token::Word(op), operand] => Ok(Stage::Filter {
                field: Field::parse(field)?,
                op: FilterOp::parse(op)?,
                operand: operand.to_value(),
            }),
            _ => bail!("filter expects `filter <field> <op> <value>`"),
        },
        "map" => match tokens {
            [_, Token::Word(field)] => Ok(Stage::Map(Field::parse(field)?)),
            _ => bail!("map expects `map <field>`"),
        },
        "limit" => match tokens {
            [_, Token::Num(n)] if *n >= 0.0 && n.fract() == 0.0 => {
                Ok(Stage::Limit(*n as usize))
            }
            _ => bail!("limit expects a non-negative integer"),
        },
        "count" => match tokens {
            [_] => Ok(Stage::Count),
            _ => bail!("count takes no arguments"),
        },
        "sum" => match tokens {
            [_] => Ok(Stage::Sum(None)),
            [_, Token::Word(field)] => Ok(Stage::Sum(Some(Field::parse(field)?))),
            _ => bail!("sum expects `sum [<field>]`"),
        },
        "first" => match tokens {
            [_] => Ok(Stage::First),
            _ => bail!("first takes no arguments"),
        },
        other => bail!("unknown stage `{other}`"),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Num(f64),
}

impl Token {
    fn to_value(&self) -> Value {
        match self {
            Token::Word(w) => Value::String(w.clone()),
            Token::Str(s) => Value::String(s.clone()),
            Token::Num(n) => json!(n),
        }
    }
}

/// Split a pipeline on `|`, respecting quoted strings.
fn split_on_pipes(line: &str) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    for ch in line.chars() {
        match ch {
            '"' => {
                in_string = !in_string;
                current.push(ch);
            }
            '|' if !in_string => {
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if in_string {
        bail!("unterminated string literal");
    }
    segments.push(current);
    Ok(segments)
}

fn tokenize(segment: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = segment.chars().peekable();
    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
        } else if ch == '"' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some(c) => s.push(c),
                    None => bail!("unterminated string literal"),
                }
            }
            tokens.push(Token::Str(s));
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '"' {
                    break;
                }
                word.push(c);
                chars.next();
            }
            match word.parse::<f64>() {
                Ok(n) => tokens.push(Token::Num(n)),
                Err(_) => tokens.push(Token::Word(word)),
            }
        }
    }
    Ok(tokens)
}
