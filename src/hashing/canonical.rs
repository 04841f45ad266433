//! Canonical serialization
//!
//! Produces one deterministic string per semantic value, independent of key
//! insertion order and container type. The output only feeds the leaf
//! hasher; it is not a wire format.
//!
//! Rules:
//! - `null` / absent values render as `null`
//! - numbers and booleans render as their literal text, strings are quoted
//! - sequences keep their order: `[a,b,c]`
//! - records and maps are emitted with keys sorted lexicographically
//! - sets serialize each element, sort the resulting strings, and emit a list
//! - timestamps render as a quoted ISO-8601 string
//! - byte sequences render as a list of integers

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;
use std::hash::BuildHasher;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// A value that can be written in canonical form
pub trait Canonicalize {
    fn write_canonical(&self, out: &mut String);
}

/// Value outside the canonical domain
#[derive(Debug, Error)]
#[error("value cannot be canonicalized: {0}")]
pub struct SerializationError(String);

/// Serialize a value to its canonical string
pub fn to_canonical_string<T: Canonicalize + ?Sized>(value: &T) -> String {
    let mut out = String::new();
    value.write_canonical(&mut out);
    out
}

/// Canonicalize any `Serialize` value by way of its JSON data model
///
/// Fails for values JSON cannot represent, e.g. maps with non-string keys.
pub fn to_canonical_serde<T: Serialize + ?Sized>(value: &T) -> Result<String, SerializationError> {
    let json = serde_json::to_value(value).map_err(|e| SerializationError(e.to_string()))?;
    Ok(to_canonical_string(&json))
}

/// Whether two optional values canonicalize identically
pub fn same_value(a: Option<&Value>, b: Option<&Value>) -> bool {
    to_canonical_string(&a) == to_canonical_string(&b)
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_f64(out: &mut String, n: f64) {
    if n.is_nan() {
        out.push_str("NaN");
    } else if n.is_infinite() {
        out.push_str(if n > 0.0 { "Infinity" } else { "-Infinity" });
    } else if n == 0.0 {
        // -0 and 0 are the same number
        out.push('0');
    } else {
        let _ = write!(out, "{}", n);
    }
}

fn write_list<'a, T, I>(out: &mut String, items: I)
where
    T: Canonicalize + ?Sized + 'a,
    I: IntoIterator<Item = &'a T>,
{
    out.push('[');
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        item.write_canonical(out);
    }
    out.push(']');
}

fn write_record<'a, K, V, I>(out: &mut String, entries: I)
where
    K: AsRef<str> + 'a,
    V: Canonicalize + ?Sized + 'a,
    I: IntoIterator<Item = (&'a K, &'a V)>,
{
    let mut sorted: Vec<(&str, &V)> = entries.into_iter().map(|(k, v)| (k.as_ref(), v)).collect();
    sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (key, value)) in sorted.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_quoted(out, key);
        out.push(':');
        value.write_canonical(out);
    }
    out.push('}');
}

fn write_set<'a, T, I>(out: &mut String, items: I)
where
    T: Canonicalize + ?Sized + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut rendered: Vec<String> = items.into_iter().map(|item| to_canonical_string(item)).collect();
    rendered.sort_unstable();
    out.push('[');
    out.push_str(&rendered.join(","));
    out.push(']');
}

impl Canonicalize for Value {
    fn write_canonical(&self, out: &mut String) {
        match self {
            Value::Null => out.push_str("null"),
            Value::Bool(b) => b.write_canonical(out),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    let _ = write!(out, "{}", i);
                } else if let Some(u) = n.as_u64() {
                    let _ = write!(out, "{}", u);
                } else {
                    write_f64(out, n.as_f64().unwrap_or(f64::NAN));
                }
            }
            Value::String(s) => write_quoted(out, s),
            Value::Array(items) => write_list(out, items),
            Value::Object(map) => map.write_canonical(out),
        }
    }
}

impl Canonicalize for Map<String, Value> {
    fn write_canonical(&self, out: &mut String) {
        write_record(out, self.iter());
    }
}

impl Canonicalize for str {
    fn write_canonical(&self, out: &mut String) {
        write_quoted(out, self);
    }
}

impl Canonicalize for String {
    fn write_canonical(&self, out: &mut String) {
        write_quoted(out, self);
    }
}

impl Canonicalize for bool {
    fn write_canonical(&self, out: &mut String) {
        out.push_str(if *self { "true" } else { "false" });
    }
}

macro_rules! canonical_integer {
    ($($t:ty),*) => {
        $(
            impl Canonicalize for $t {
                fn write_canonical(&self, out: &mut String) {
                    let _ = write!(out, "{}", self);
                }
            }
        )*
    };
}

canonical_integer!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl Canonicalize for f32 {
    fn write_canonical(&self, out: &mut String) {
        write_f64(out, f64::from(*self));
    }
}

impl Canonicalize for f64 {
    fn write_canonical(&self, out: &mut String) {
        write_f64(out, *self);
    }
}

impl<T: Canonicalize + ?Sized> Canonicalize for &T {
    fn write_canonical(&self, out: &mut String) {
        (**self).write_canonical(out);
    }
}

impl<T: Canonicalize> Canonicalize for Option<T> {
    fn write_canonical(&self, out: &mut String) {
        match self {
            Some(value) => value.write_canonical(out),
            None => out.push_str("null"),
        }
    }
}

/// Sequences, including byte sequences which render as integer lists
impl<T: Canonicalize> Canonicalize for [T] {
    fn write_canonical(&self, out: &mut String) {
        write_list(out, self);
    }
}

impl<T: Canonicalize> Canonicalize for Vec<T> {
    fn write_canonical(&self, out: &mut String) {
        write_list(out, self);
    }
}

impl<K: AsRef<str>, V: Canonicalize> Canonicalize for BTreeMap<K, V> {
    fn write_canonical(&self, out: &mut String) {
        write_record(out, self.iter());
    }
}

impl<K: AsRef<str>, V: Canonicalize, S: BuildHasher> Canonicalize for HashMap<K, V, S> {
    fn write_canonical(&self, out: &mut String) {
        write_record(out, self.iter());
    }
}

impl<T: Canonicalize> Canonicalize for BTreeSet<T> {
    fn write_canonical(&self, out: &mut String) {
        write_set(out, self);
    }
}

impl<T: Canonicalize, S: BuildHasher> Canonicalize for HashSet<T, S> {
    fn write_canonical(&self, out: &mut String) {
        write_set(out, self);
    }
}

impl<Tz: TimeZone> Canonicalize for DateTime<Tz> {
    fn write_canonical(&self, out: &mut String) {
        let iso = self
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        write_quoted(out, &iso);
    }
}
