use std::fmt;

use serde::{Deserialize, Serialize};

use crate::term::Term;

/// A triple in a named graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quad {
    pub graph: Term,
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Quad {
    pub fn new(graph: Term, subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            graph,
            subject,
            predicate,
            object,
        }
    }

    /// A quad in the default graph.
    pub fn triple(subject: Term, predicate: Term, object: Term) -> Self {
        Self::new(Term::default_graph(), subject, predicate, object)
    }

    /// Terms in `G S P O` order.
    pub fn terms(&self) -> [&Term; 4] {
        [&self.graph, &self.subject, &self.predicate, &self.object]
    }

    pub fn from_terms([graph, subject, predicate, object]: [Term; 4]) -> Self {
        Self::new(graph, subject, predicate, object)
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.subject, self.predicate, self.object, self.graph
        )
    }
}

/// A quad with optional positions. `None` matches any term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QuadPattern {
    pub graph: Option<Term>,
    pub subject: Option<Term>,
    pub predicate: Option<Term>,
    pub object: Option<Term>,
}

impl QuadPattern {
    /// Matches every quad.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn new(
        graph: Option<Term>,
        subject: Option<Term>,
        predicate: Option<Term>,
        object: Option<Term>,
    ) -> Self {
        Self {
            graph,
            subject,
            predicate,
            object,
        }
    }

    /// Positions in `G S P O` order.
    pub fn terms(&self) -> [Option<&Term>; 4] {
        [
            self.graph.as_ref(),
            self.subject.as_ref(),
            self.predicate.as_ref(),
            self.object.as_ref(),
        ]
    }

    pub fn matches(&self, quad: &Quad) -> bool {
        self.terms()
            .into_iter()
            .zip(quad.terms())
            .all(|(pattern, term)| pattern.is_none_or(|p| p == term))
    }
}

impl From<&Quad> for QuadPattern {
    fn from(quad: &Quad) -> Self {
        Self::new(
            Some(quad.graph.clone()),
            Some(quad.subject.clone()),
            Some(quad.predicate.clone()),
            Some(quad.object.clone()),
        )
    }
}
