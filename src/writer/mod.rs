//! Output writer abstraction layer
//!
//! The writer module turns a finalized specification AST into the text of
//! the published artifact.
//!
//! # Architecture
//!
//! All writers implement the `Writer` trait, which provides:
//! - Spec → Output conversion
//! - Validation for writer compatibility
//!
//! [`EsmWriter`] generates the client program (an ES module that rebuilds the
//! visualization in the browser); [`HtmlShell`] generates `index.html`.
//!
//! # Example
//!
//! ```rust,ignore
//! use mosaic_publish::writer::{EsmWriter, CodegenContext, PathRewrite, Writer};
//!
//! let writer = EsmWriter::new(CodegenContext::default().with_path_rewrite(PathRewrite::Origin));
//! let module = writer.write(&spec)?;
//! ```

use crate::spec::SpecNode;
use crate::Result;

pub mod esm;
pub mod html;

pub use esm::{CodegenContext, EsmWriter, PathRewrite};
pub use html::HtmlShell;

/// Trait for artifact writers
pub trait Writer {
    /// Generate output from a specification
    ///
    /// # Errors
    ///
    /// Returns `PublishError::WriterError` if:
    /// - The AST uses something this writer cannot express
    /// - Output generation fails
    fn write(&self, spec: &SpecNode) -> Result<String>;

    /// Validate that a spec is compatible with this writer
    ///
    /// Checks whether the AST can be written without generating output.
    fn validate(&self, spec: &SpecNode) -> Result<()>;
}
