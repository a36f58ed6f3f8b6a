pub mod answer;
pub mod classify;
pub mod config;
pub mod corpus;
pub mod document;
pub mod error;
pub mod python;
pub mod scanner;
pub mod synth;
pub mod transform;

pub use classify::{Classifier, MARKER_LOOKBACK};
pub use corpus::{Corpus, RejectedDocument, Selection};
pub use document::{Classification, Document, Fragment, GroupTag};
pub use error::{CorpusError, StructuralError};
pub use scanner::{ScanOptions, scan_document};
pub use synth::{EntryPoint, ForwardRead, LineMap, SynthMode, SynthesisUnit, Synthesizer, module_name, write_units};
pub use transform::{CredentialKind, Pipeline, TransformContext};
