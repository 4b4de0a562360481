//! Repeated `name=value` tokens as an ordered multimap.
//!
//! Giving the same name twice appends to that name's values instead of
//! replacing them; the compiler turns the values of one name into an OR-group.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PARAMETER: Regex = Regex::new(r"^[\w-]+=.*$").unwrap();
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterGroup {
    entries: Vec<(String, Vec<String>)>,
}

impl ParameterGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits the leading `name=value` tokens off `tokens`.
    ///
    /// Accumulation stops at the first token that is not a parameter, or at a
    /// literal `--` (which is dropped). Everything from that point on is
    /// returned as positional arguments, untouched.
    pub fn accumulate<I, S>(tokens: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut group = Self::new();
        let mut positionals = Vec::new();
        let mut tokens = tokens.into_iter().map(Into::into);
        while let Some(token) = tokens.next() {
            if token == "--" {
                positionals.extend(tokens);
                break;
            }
            if !PARAMETER.is_match(&token) {
                positionals.push(token);
                positionals.extend(tokens);
                break;
            }
            // the pattern guarantees an '='
            if let Some((name, value)) = token.split_once('=') {
                group.append(name, value);
            }
        }
        (group, positionals)
    }

    /// Reads every token as `name=value`; names may be dotted (`users.username`).
    pub fn from_pairs<I, S>(tokens: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut group = Self::new();
        for token in tokens {
            let (name, value) = token.as_ref().split_once('=')?;
            if name.trim().is_empty() {
                return None;
            }
            group.append(name, value);
        }
        Some(group)
    }

    /// Adds one value under `name`, after any values already there.
    pub fn append(&mut self, name: &str, value: &str) {
        let name = name.trim();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push(value.to_string()),
            None => self.entries.push((name.to_string(), vec![value.to_string()])),
        }
    }

    /// Appends every value of `other`, name by name.
    pub fn merge(&mut self, other: ParameterGroup) {
        for (name, values) in other.entries {
            for value in values {
                self.append(&name, &value);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Removes every entry spelled `name` in any case and hands back their values in order.
    pub fn take(&mut self, name: &str) -> Option<Vec<String>> {
        let mut taken: Option<Vec<String>> = None;
        self.entries.retain_mut(|(n, values)| {
            if !n.eq_ignore_ascii_case(name) {
                return true;
            }
            taken.get_or_insert_with(Vec::new).append(values);
            false
        });
        taken
    }

    /// The entries named `<prefix>.<param>`, with the prefix stripped.
    pub fn scoped(&self, prefix: &str) -> ParameterGroup {
        let mut scoped = ParameterGroup::new();
        for (name, values) in &self.entries {
            let stripped = name
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'));
            if let Some(param) = stripped {
                for value in values {
                    scoped.append(param, value);
                }
            }
        }
        scoped
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
