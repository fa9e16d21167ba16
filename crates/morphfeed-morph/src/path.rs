//! Path expressions and their resolution against JSON data trees.
//!
//! A [`PathExpr`] is a route from the tree root through named fields and
//! "every element" wildcards:
//!
//! ```text
//! $                     the root itself
//! $.prices[*]           every element of the `prices` array
//! $.book[*].authors     the `authors` field of every `book` element
//! $["odd key"][*]       bracketed form for keys that are not identifiers
//! ```
//!
//! Resolution never fails. A branch whose shape does not match the path
//! (missing key, object where an array was expected, `null`) simply yields
//! no matches, so rules stay inert on trees they were not written for.
//! Matches come back depth-first in document order, each tagged with the
//! concrete [`Location`] it was found at.

use std::fmt;
use std::iter::Peekable;
use std::str::{CharIndices, FromStr};

use serde_json::Value;

/// Errors that can occur when parsing a path expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// The expression does not start with `$`.
    #[error("path `{path}` must start with `$`")]
    MissingRoot {
        /// The rejected expression.
        path: String,
    },

    /// A `.` was not followed by a field name.
    #[error("path `{path}` has an empty field name at position {position}")]
    EmptyField {
        /// The rejected expression.
        path: String,
        /// Byte position of the offending `.`.
        position: usize,
    },

    /// A character that cannot start or continue a segment.
    #[error("path `{path}` has unexpected `{found}` at position {position}")]
    UnexpectedChar {
        /// The rejected expression.
        path: String,
        /// Byte position of the offending character.
        position: usize,
        /// The offending character.
        found: char,
    },

    /// A bracket or quote was opened but never closed.
    #[error("path `{path}` ends inside a bracket segment")]
    Unterminated {
        /// The rejected expression.
        path: String,
    },
}

/// One step of a parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Descend into the named field of a mapping.
    Field(String),
    /// Fan out over every element of a sequence.
    Wildcard,
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
    segments: Vec<Segment>,
}

impl PathExpr {
    /// Parse a path expression such as `$.nested[*].items`.
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if the expression is malformed.
    pub fn parse(source: &str) -> Result<Self, PathError> {
        let Some(body) = source.strip_prefix('$') else {
            return Err(PathError::MissingRoot {
                path: source.to_owned(),
            });
        };

        let mut segments = Vec::new();
        let mut chars = body.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            // Positions are reported relative to the full expression.
            let position = offset.saturating_add(1);
            match c {
                '.' => {
                    let name = take_identifier(&mut chars);
                    if name.is_empty() {
                        return Err(PathError::EmptyField {
                            path: source.to_owned(),
                            position,
                        });
                    }
                    segments.push(Segment::Field(name));
                }
                '[' => segments.push(parse_bracket(source, &mut chars)?),
                found => {
                    return Err(PathError::UnexpectedChar {
                        path: source.to_owned(),
                        position,
                        found,
                    });
                }
            }
        }

        Ok(Self {
            source: source.to_owned(),
            segments,
        })
    }

    /// The expression text as it was parsed.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The parsed segments, root first.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether this expression addresses the root itself (`$`).
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Resolve the expression against `root`, returning every matched node
    /// together with its concrete location.
    pub fn select<'a>(&self, root: &'a Value) -> Vec<Match<'a>> {
        let mut trail = Vec::new();
        let mut out = Vec::new();
        walk(root, &self.segments, &mut trail, &mut out);
        out
    }

    /// Resolve the expression against `root`, returning mutable references
    /// to every matched node.
    ///
    /// Matches are disjoint sub-trees (each wildcard branch is a different
    /// element), so they can all be held at once.
    pub fn select_mut<'a>(&self, root: &'a mut Value) -> Vec<&'a mut Value> {
        let mut out = Vec::new();
        walk_mut(root, &self.segments, &mut out);
        out
    }
}

impl FromStr for PathExpr {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// A node matched by [`PathExpr::select`].
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'a> {
    /// Where the node sits in the tree.
    pub location: Location,
    /// The matched node.
    pub node: &'a Value,
}

/// One concrete step in a [`Location`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    /// A mapping key.
    Key(String),
    /// A sequence index.
    Index(usize),
}

/// The concrete position of a node in a tree: every wildcard of the path
/// that found it replaced by the index it took.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Location {
    steps: Vec<Step>,
}

impl Location {
    /// The location of the root.
    pub const fn root() -> Self {
        Self { steps: Vec::new() }
    }

    /// The steps from the root, in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of steps below the root.
    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    /// Look up the node at this location.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.steps.iter().try_fold(root, |node, step| match step {
            Step::Key(key) => node.as_object()?.get(key),
            Step::Index(index) => node.as_array()?.get(*index),
        })
    }

    /// Look up the node at this location for in-place mutation.
    pub fn get_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        self.steps.iter().try_fold(root, |node, step| match step {
            Step::Key(key) => node.as_object_mut()?.get_mut(key),
            Step::Index(index) => node.as_array_mut()?.get_mut(*index),
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for step in &self.steps {
            match step {
                Step::Key(key) => write!(f, ".{key}")?,
                Step::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

fn walk<'a>(node: &'a Value, segments: &[Segment], trail: &mut Vec<Step>, out: &mut Vec<Match<'a>>) {
    let Some((head, rest)) = segments.split_first() else {
        if !node.is_null() {
            out.push(Match {
                location: Location {
                    steps: trail.clone(),
                },
                node,
            });
        }
        return;
    };

    match (head, node) {
        (Segment::Field(name), Value::Object(map)) => {
            if let Some(child) = map.get(name) {
                trail.push(Step::Key(name.clone()));
                walk(child, rest, trail, out);
                trail.pop();
            }
        }
        (Segment::Wildcard, Value::Array(items)) => {
            for (index, child) in items.iter().enumerate() {
                trail.push(Step::Index(index));
                walk(child, rest, trail, out);
                trail.pop();
            }
        }
        _ => {}
    }
}

fn walk_mut<'a>(node: &'a mut Value, segments: &[Segment], out: &mut Vec<&'a mut Value>) {
    let Some((head, rest)) = segments.split_first() else {
        if !node.is_null() {
            out.push(node);
        }
        return;
    };

    match (head, node) {
        (Segment::Field(name), Value::Object(map)) => {
            if let Some(child) = map.get_mut(name) {
                walk_mut(child, rest, out);
            }
        }
        (Segment::Wildcard, Value::Array(items)) => {
            for child in items.iter_mut() {
                walk_mut(child, rest, out);
            }
        }
        _ => {}
    }
}

fn take_identifier(chars: &mut Peekable<CharIndices<'_>>) -> String {
    let mut name = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_alphanumeric() || c == '_' || c == '-' {
            name.push(c);
            chars.next();
        } else {
            break;
        }
    }
    name
}

fn parse_bracket(source: &str, chars: &mut Peekable<CharIndices<'_>>) -> Result<Segment, PathError> {
    let unterminated = || PathError::Unterminated {
        path: source.to_owned(),
    };

    let segment = match chars.next() {
        Some((_, '*')) => Segment::Wildcard,
        Some((_, quote @ ('"' | '\''))) => {
            let mut key = String::new();
            loop {
                match chars.next() {
                    Some((_, c)) if c == quote => break,
                    Some((_, c)) => key.push(c),
                    None => return Err(unterminated()),
                }
            }
            Segment::Field(key)
        }
        Some((offset, found)) => {
            return Err(PathError::UnexpectedChar {
                path: source.to_owned(),
                position: offset.saturating_add(1),
                found,
            });
        }
        None => return Err(unterminated()),
    };

    match chars.next() {
        Some((_, ']')) => Ok(segment),
        Some((offset, found)) => Err(PathError::UnexpectedChar {
            path: source.to_owned(),
            position: offset.saturating_add(1),
            found,
        }),
        None => Err(unterminated()),
    }
}
