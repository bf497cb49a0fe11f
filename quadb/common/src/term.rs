use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::constants::{DEFAULT_GRAPH_IRI, RDF_LANG_STRING, XSD_STRING};

/// An RDF term: the value stored in one position of a quad.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    Iri(SmolStr),
    BlankNode(SmolStr),
    Literal {
        lexical: SmolStr,
        datatype: SmolStr,
        lang: Option<SmolStr>,
    },
}

impl Term {
    pub fn iri(iri: impl Into<SmolStr>) -> Self {
        Self::Iri(iri.into())
    }

    pub fn blank(label: impl Into<SmolStr>) -> Self {
        Self::BlankNode(label.into())
    }

    /// A plain `xsd:string` literal.
    pub fn literal(lexical: impl Into<SmolStr>) -> Self {
        Self::Literal {
            lexical: lexical.into(),
            datatype: SmolStr::new_static(XSD_STRING),
            lang: None,
        }
    }

    pub fn typed_literal(lexical: impl Into<SmolStr>, datatype: impl Into<SmolStr>) -> Self {
        Self::Literal {
            lexical: lexical.into(),
            datatype: datatype.into(),
            lang: None,
        }
    }

    /// A language-tagged literal. Tags are normalised to lower case.
    pub fn lang_literal(lexical: impl Into<SmolStr>, lang: &str) -> Self {
        Self::Literal {
            lexical: lexical.into(),
            datatype: SmolStr::new_static(RDF_LANG_STRING),
            lang: Some(SmolStr::new(lang.to_ascii_lowercase())),
        }
    }

    pub fn default_graph() -> Self {
        Self::Iri(SmolStr::new_static(DEFAULT_GRAPH_IRI))
    }

    #[inline]
    pub fn is_default_graph(&self) -> bool {
        matches!(self, Self::Iri(iri) if iri == DEFAULT_GRAPH_IRI)
    }

    #[inline]
    pub fn is_iri(&self) -> bool {
        matches!(self, Self::Iri(_))
    }

    #[inline]
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal { .. })
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iri(iri) => write!(f, "<{iri}>"),
            Self::BlankNode(label) => write!(f, "_:{label}"),
            Self::Literal {
                lexical,
                lang: Some(lang),
                ..
            } => write!(f, "{lexical:?}@{lang}"),
            Self::Literal {
                lexical, datatype, ..
            } if datatype == XSD_STRING => write!(f, "{lexical:?}"),
            Self::Literal {
                lexical, datatype, ..
            } => write!(f, "{lexical:?}^^<{datatype}>"),
        }
    }
}
