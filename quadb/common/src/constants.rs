/// IRI naming the default graph of a dataset.
///
/// Quads added without an explicit graph are stored under this name so that every index
/// record has four components.
pub const DEFAULT_GRAPH_IRI: &str = "urn:x-arq:DefaultGraph";

pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";
