//! `mergetag_core` validates DOCX merge templates and merges form data into
//! them. It finds merge tags even when a word processor has split them across
//! several runs, recovers their field names, evaluates the template's
//! conditional blocks and rewrites only the text of the document.
//!
//! ## Processing Pipeline
//!
//! ```text
//! DOCX bytes
//!   → Package reader (zip entries, document/header/footer XML parts)
//!   → Logical text stream (markup removed, entities decoded, byte map kept)
//!   → Run scanner (single pass over the stream, one occurrence per `{$`)
//!   → Tag canonicalizer (strip markup and modifiers, apply corrections, validate)
//!   → Directive parser (`if`/`elseif`/`else`, `listif`, modifier chains)
//!   → Merge evaluator (text edits applied rightmost first) or validation reporter
//! ```
//!
//! ## Template Syntax
//!
//! ```text
//! {$USR_NAME}                              merge tag
//! {&#36;USR_NAME}                          entity encoded merge tag
//! {$USR_ABN|phone_format:"%2 %3 %3 %3"}    modifier chain
//! {if $TYPE == "Premium"}…{elseif !empty($PLAN)}…{else}…{/if}
//! {listif $OPTIONS == "Option1"}…{/listif}
//! ```
//!
//! Modifiers: `upper`, `lower`, `ucwords`, `ucfirst`, `phone_format`,
//! `date_format` and `replace`.
//!
//! ## Modules
//!
//! - [`config`]: loading of `mergetag.toml` with correction rules, aliases,
//!   the name grammar and `listif` case sensitivity.
//!
//! ## Key Types
//!
//! - [`MergeEngine`]: validates and merges templates with one configuration.
//! - [`TemplatePackage`]: an opened DOCX package.
//! - [`RunScanner`] and [`RawTagOccurrence`]: merge tag discovery.
//! - [`TagCanonicalizer`] and [`CorrectionTable`]: field name recovery.
//! - [`DirectiveParser`] and [`DirectiveTree`]: control flow structure.
//! - [`MergeDataset`] and [`Value`]: field values for one merge.
//! - [`ValidationReport`] and [`MergeOutcome`]: caller facing results.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mergetag_core::MergeDataset;
//! use mergetag_core::MergeEngine;
//!
//! let template = std::fs::read("contract.docx").unwrap();
//! let engine = MergeEngine::default();
//!
//! let report = engine.validate(&template).unwrap();
//! println!("{}", report.render_text());
//!
//! let dataset: MergeDataset = [("USR_NAME", "Jane Citizen")].into_iter().collect();
//! let outcome = engine.merge(&template, &dataset);
//! if let Some(bytes) = outcome.output {
//! 	std::fs::write("contract-merged.docx", bytes).unwrap();
//! }
//! ```

pub use canonical::*;
pub use config::*;
pub use dataset::*;
pub use engine::*;
pub use error::*;
pub use modifiers::*;
pub use package::*;
pub use parser::*;
pub use report::*;
pub use scanner::*;
pub use stream::*;

mod canonical;
pub mod config;
mod dataset;
mod engine;
#[allow(unused_assignments)]
mod error;
pub(crate) mod lexer;
mod modifiers;
mod package;
mod parser;
mod report;
mod scanner;
mod stream;
pub(crate) mod tokens;

#[cfg(test)]
mod __fixtures;
#[cfg(test)]
mod __tests;
