use std::cmp::Ordering;

use crudkit_contracts::{Condition, Direction, FindParams, Record, StrategyKind};
use serde_json::Value;

const ESCAPE: char = '\\';

/// Escapes LIKE wildcards so the term matches literally.
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if c == ESCAPE || c == '%' || c == '_' {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

/// LIKE pattern for a builtin strategy. `Custom` has none.
pub fn like_pattern(strategy: StrategyKind, term: &str) -> Option<String> {
    let term = escape_like(term);
    match strategy {
        StrategyKind::BeginsWith => Some(format!("{term}%")),
        StrategyKind::EndsWith => Some(format!("%{term}")),
        StrategyKind::Contains => Some(format!("%{term}%")),
        StrategyKind::Custom => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Any,
    One,
    Lit(char),
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            ESCAPE => Token::Lit(chars.next().unwrap_or(ESCAPE)),
            '%' => Token::Any,
            '_' => Token::One,
            c => Token::Lit(c),
        });
    }
    tokens
}

/// Case-sensitive LIKE matching with `\` as the escape character.
pub fn like_matches(pattern: &str, text: &str) -> bool {
    let tokens = tokenize(pattern);
    let chars: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    // Last `%` seen and the text position it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < chars.len() {
        if let Some(token) = tokens.get(p) {
            match *token {
                Token::Any => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                Token::One => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Token::Lit(c) if c == chars[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Token::Lit(_) => {}
            }
        }
        match backtrack {
            Some((star, absorbed)) => {
                p = star + 1;
                t = absorbed + 1;
                backtrack = Some((star, absorbed + 1));
            }
            None => return false,
        }
    }
    tokens[p..].iter().all(|token| *token == Token::Any)
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Evaluates one condition with SQL null semantics: a null or missing column
/// satisfies neither `Equals`, `NotEqual` nor `Like`.
pub fn condition_matches(condition: &Condition, record: &Record) -> bool {
    let present = record.get(condition.field()).filter(|v| !v.is_null());
    match condition {
        Condition::Equals { value, .. } => {
            present.is_some_and(|v| !value.is_null() && values_equal(v, value))
        }
        Condition::NotEqual { value, .. } => {
            present.is_some_and(|v| !value.is_null() && !values_equal(v, value))
        }
        Condition::NotNull { .. } => present.is_some(),
        Condition::Like { pattern, .. } => present
            .and_then(value_text)
            .is_some_and(|text| like_matches(pattern, &text)),
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) | Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(_) => 3,
    }
}

fn numeric(value: &Value) -> f64 {
    match value {
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Orders values the way SQLite does: nulls, then numbers, then text.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) if ra == 1 => numeric(x)
            .partial_cmp(&numeric(y))
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        _ => Ordering::Equal,
    }
}

fn project(row: &Record, fields: &[String]) -> Record {
    if fields.is_empty() {
        return row.clone();
    }
    fields
        .iter()
        .map(|f| (f.clone(), row.get(f).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Runs find-params against in-memory rows: filter, order, project,
/// collapse duplicates, then page.
pub fn search_rows(rows: &[Record], params: &FindParams) -> Vec<Record> {
    let mut matched: Vec<&Record> = rows
        .iter()
        .filter(|row| params.conditions.iter().all(|c| condition_matches(c, row)))
        .collect();

    matched.sort_by(|a, b| {
        for order in &params.order {
            let ord = compare_values(a.get(&order.field), b.get(&order.field));
            let ord = match order.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    let mut out: Vec<Record> = Vec::with_capacity(matched.len());
    for row in matched {
        let projected = project(row, &params.fields);
        if params.distinct && out.contains(&projected) {
            continue;
        }
        out.push(projected);
    }

    out.into_iter()
        .skip(params.offset())
        .take(params.limit.unwrap_or(usize::MAX))
        .collect()
}
