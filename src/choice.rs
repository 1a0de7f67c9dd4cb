//! Lazy, memoized decision tree for staged format guessing.
//!
//! Each stage of a guess (charset, separator, quote, trim) is a
//! [`ChoicePoint`] node offering ranked options; selecting an option computes
//! the downstream subtree at most once and caches it. A caller can therefore
//! override any stage and pay only for the paths it actually explores.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use encoding_rs::Encoding;

use crate::error::{Result, TableError};
use crate::schema::TrimChoice;

/// How trustworthy a guess stage considers its best option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Quality {
    Promising,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChoiceKind {
    Charset,
    Separator,
    Quote,
    Trim,
}

impl ChoiceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ChoiceKind::Charset => "charset",
            ChoiceKind::Separator => "separator",
            ChoiceKind::Quote => "quote",
            ChoiceKind::Trim => "trim",
        }
    }
}

/// One selectable option at a guess stage.
#[derive(Debug, Clone)]
pub enum Choice {
    Charset(&'static Encoding),
    Separator(Option<char>),
    Quote(Option<char>),
    Trim(TrimChoice),
}

impl Choice {
    pub fn kind(&self) -> ChoiceKind {
        match self {
            Choice::Charset(_) => ChoiceKind::Charset,
            Choice::Separator(_) => ChoiceKind::Separator,
            Choice::Quote(_) => ChoiceKind::Quote,
            Choice::Trim(_) => ChoiceKind::Trim,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Choice::Charset(encoding) => encoding.name().to_string(),
            Choice::Separator(Some(ch)) => format!("separator {ch:?}"),
            Choice::Separator(None) => "no separator".to_string(),
            Choice::Quote(Some(ch)) => format!("quote {ch:?}"),
            Choice::Quote(None) => "no quote".to_string(),
            Choice::Trim(trim) => format!("trim {trim}"),
        }
    }
}

impl PartialEq for Choice {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Choice::Charset(a), Choice::Charset(b)) => a.name() == b.name(),
            (Choice::Separator(a), Choice::Separator(b)) => a == b,
            (Choice::Quote(a), Choice::Quote(b)) => a == b,
            (Choice::Trim(a), Choice::Trim(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Choice {}

impl Hash for Choice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Choice::Charset(encoding) => encoding.name().hash(state),
            Choice::Separator(ch) => ch.hash(state),
            Choice::Quote(ch) => ch.hash(state),
            Choice::Trim(trim) => trim.hash(state),
        }
    }
}

/// The path taken through a decision tree: the choices made, in order, plus
/// a flag marking that a terminal was reached.
#[derive(Debug, Clone, Default)]
pub struct Choices {
    made: Vec<Choice>,
    finished: bool,
}

impl Choices {
    pub fn new() -> Self {
        Choices::default()
    }

    pub fn with(&self, choice: Choice) -> Self {
        let mut made = self.made.clone();
        made.push(choice);
        Choices {
            made,
            finished: self.finished,
        }
    }

    pub fn finish(self) -> Self {
        Choices {
            made: self.made,
            finished: true,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn made(&self) -> &[Choice] {
        &self.made
    }

    /// The most recent choice of the given kind, if any was made.
    pub fn get(&self, kind: ChoiceKind) -> Option<&Choice> {
        self.made.iter().rev().find(|choice| choice.kind() == kind)
    }
}

/// A node in the guess decision tree: either a terminal (value or stored
/// failure) or a pending choice with ranked options and a lazy continuation.
pub struct ChoicePoint<R> {
    quality: Quality,
    score: f64,
    node: Node<R>,
}

enum Node<R> {
    Done(Result<R>),
    Pending(Pending<R>),
}

struct Pending<R> {
    kind: ChoiceKind,
    options: Vec<Choice>,
    compute: Box<dyn Fn(&Choice) -> Result<ChoicePoint<R>>>,
    explored: RefCell<HashMap<Choice, Rc<ChoicePoint<R>>>>,
}

impl<R: 'static> ChoicePoint<R> {
    pub fn success(quality: Quality, score: f64, value: R) -> Self {
        ChoicePoint {
            quality,
            score,
            node: Node::Done(Ok(value)),
        }
    }

    pub fn failure(error: TableError) -> Self {
        ChoicePoint {
            quality: Quality::Fallback,
            score: f64::NEG_INFINITY,
            node: Node::Done(Err(error)),
        }
    }

    /// A pending node. The option list must be non-empty and homogeneous in
    /// kind; `compute` runs at most once per distinct option.
    pub fn choose(
        quality: Quality,
        score: f64,
        kind: ChoiceKind,
        options: Vec<Choice>,
        compute: impl Fn(&Choice) -> Result<ChoicePoint<R>> + 'static,
    ) -> Result<Self> {
        if options.is_empty() {
            return Err(TableError::internal(format!(
                "{} choice offered no options",
                kind.label()
            )));
        }
        if let Some(stray) = options.iter().find(|option| option.kind() != kind) {
            return Err(TableError::internal(format!(
                "{} offered among {} options",
                stray.describe(),
                kind.label()
            )));
        }
        Ok(ChoicePoint {
            quality,
            score,
            node: Node::Pending(Pending {
                kind,
                options,
                compute: Box::new(compute),
                explored: RefCell::new(HashMap::new()),
            }),
        })
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.node, Node::Done(_))
    }

    pub fn choice_kind(&self) -> Option<ChoiceKind> {
        match &self.node {
            Node::Pending(pending) => Some(pending.kind),
            Node::Done(_) => None,
        }
    }

    /// Options at this node, best first. Empty for terminals.
    pub fn options(&self) -> &[Choice] {
        match &self.node {
            Node::Pending(pending) => &pending.options,
            Node::Done(_) => &[],
        }
    }

    /// Terminal access. Re-raises a stored failure; calling this on a pending
    /// node is an invariant violation.
    pub fn get(&self) -> Result<&R> {
        match &self.node {
            Node::Done(Ok(value)) => Ok(value),
            Node::Done(Err(error)) => Err(error.clone()),
            Node::Pending(pending) => Err(TableError::internal(format!(
                "get with the {} choice still unresolved",
                pending.kind.label()
            ))),
        }
    }

    /// Selects an offered option, computing its subtree on first use and
    /// returning the cached subtree afterwards. User errors raised by the
    /// continuation become failure terminals; internal errors propagate.
    pub fn select(&self, choice: &Choice) -> Result<Rc<ChoicePoint<R>>> {
        let pending = match &self.node {
            Node::Pending(pending) => pending,
            Node::Done(_) => {
                return Err(TableError::internal("select on a terminal node"));
            }
        };
        if !pending.options.contains(choice) {
            return Err(TableError::internal(format!(
                "{} is not offered by this {} choice",
                choice.describe(),
                pending.kind.label()
            )));
        }
        if let Some(cached) = pending.explored.borrow().get(choice) {
            return Ok(Rc::clone(cached));
        }
        let child = match (pending.compute)(choice) {
            Ok(point) => point,
            Err(error) if error.is_internal() => return Err(error),
            Err(error) => ChoicePoint::failure(error),
        };
        let mut explored = pending.explored.borrow_mut();
        Ok(Rc::clone(
            explored.entry(choice.clone()).or_insert(Rc::new(child)),
        ))
    }

    /// Monadic continuation: maps the eventual value, lazily on pending
    /// nodes. A failure terminal passes through without invoking `f`; errors
    /// from `f` become failure terminals.
    pub fn then<S: 'static>(self, f: impl Fn(R) -> Result<S> + 'static) -> ChoicePoint<S> {
        self.then_rc(Rc::new(f))
    }

    fn then_rc<S: 'static>(self, f: Rc<dyn Fn(R) -> Result<S>>) -> ChoicePoint<S> {
        match self.node {
            Node::Done(Ok(value)) => match f(value) {
                Ok(next) => ChoicePoint {
                    quality: self.quality,
                    score: self.score,
                    node: Node::Done(Ok(next)),
                },
                Err(error) => ChoicePoint::failure(error),
            },
            Node::Done(Err(error)) => ChoicePoint {
                quality: self.quality,
                score: self.score,
                node: Node::Done(Err(error)),
            },
            Node::Pending(pending) => {
                let Pending {
                    kind,
                    options,
                    compute,
                    ..
                } = pending;
                let mapped = move |choice: &Choice| -> Result<ChoicePoint<S>> {
                    compute(choice).map(|point| point.then_rc(Rc::clone(&f)))
                };
                ChoicePoint {
                    quality: self.quality,
                    score: self.score,
                    node: Node::Pending(Pending {
                        kind,
                        options,
                        compute: Box::new(mapped),
                        explored: RefCell::new(HashMap::new()),
                    }),
                }
            }
        }
    }

    /// Walks the tree taking the first (best) option at every stage.
    pub fn resolve_first(&self) -> Result<(R, Choices)>
    where
        R: Clone,
    {
        self.resolve_from(Choices::new())
    }

    fn resolve_from(&self, path: Choices) -> Result<(R, Choices)>
    where
        R: Clone,
    {
        match &self.node {
            Node::Done(Ok(value)) => Ok((value.clone(), path.finish())),
            Node::Done(Err(error)) => Err(error.clone()),
            Node::Pending(pending) => {
                let first = pending
                    .options
                    .first()
                    .ok_or_else(|| TableError::internal("pending node with no options"))?;
                let child = self.select(first)?;
                child.resolve_from(path.with(first.clone()))
            }
        }
    }
}

impl<R> fmt::Debug for ChoicePoint<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Node::Done(Ok(_)) => write!(
                f,
                "ChoicePoint::Success(quality={:?}, score={})",
                self.quality, self.score
            ),
            Node::Done(Err(error)) => write!(f, "ChoicePoint::Failure({error})"),
            Node::Pending(pending) => write!(
                f,
                "ChoicePoint::Pending({}, {} options)",
                pending.kind.label(),
                pending.options.len()
            ),
        }
    }
}
