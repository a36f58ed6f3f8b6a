//! Python source analysis: string-literal lexing, parsing and name
//! resolution. Nothing here evaluates code.

pub mod names;
pub mod strings;
pub mod syntax;

pub use names::{NameReport, UnresolvedName, analyze};
pub use syntax::{ParseError, SyntaxIssue, SyntaxTree, parse};
