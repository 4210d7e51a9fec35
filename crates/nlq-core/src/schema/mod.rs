//! Schema catalog: persistent table/column/FK metadata plus the dense and
//! keyword indexes the retriever queries.

pub mod catalog;
pub mod mschema;
pub mod packet;

pub use catalog::{ColumnEntry, EmbeddingEntityType, FkEdge, SchemaCatalog, SchemaEmbeddingRecord, TableEntry};
pub use mschema::render_m_schema;
pub use packet::{ProvenanceTag, SchemaContextPacket, TableCandidate};
