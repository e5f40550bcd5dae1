/*!
# mosaic-publish - static publishing for Mosaic visualizations

Turns a declarative Mosaic/vgplot specification (YAML or JSON) into a
directory that any static file server can host: `index.html`, a client
program `index.js` and the Parquet files the visualization loads at runtime.

## Example

```yaml
data:
  flights: { file: data/flights.parquet }
params:
  brush: { select: crossfilter }
vconcat:
  - plot:
      - mark: rectY
        data: { from: flights, filterBy: $brush }
        x: { bin: delay }
        y: { count: }
      - select: intervalX
        as: $brush
```

## Architecture

Publishing is a linear pipeline:
- **Load** → the specification is parsed into an AST
- **Activate** → the visualization is mounted headlessly and every
  interactor/input is activated so deferred engine work runs
- **Plan** → table usage and the optimization level decide what to export
- **Export** → DuckDB copies tables and preaggregated views to Parquet
- **Assemble** → HTML shell, bundled client program, optional result cache

## Core Components

- [`spec`] - Specification parsing and AST
- [`reader`] - Query engine abstraction (DuckDB)
- [`coordinator`] - Engine worker, result cache, usage tracking
- [`render`] - Headless rendering context and clients
- [`writer`] - Client program and HTML generation
- [`bundle`] - Bundling the client program
- [`publish`] - The pipeline itself
*/

pub mod bundle;
pub mod coordinator;
pub mod publish;
pub mod reader;
pub mod render;
pub mod spec;
pub mod writer;

// Re-export key types for convenience
pub use publish::{publish, OptimizationLevel, PublishOptions, PublishReport};
pub use spec::{parse_spec, SpecNode};

// DataFrame abstraction (wraps Polars)
pub use polars::prelude::DataFrame;

use std::time::Duration;

/// Main library error type
#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Data source error: {0}")]
    ReaderError(String),

    #[error("Activation of {target} did not settle within {waited:?} ({pending} requests pending)")]
    ActivationTimeout {
        target: String,
        pending: usize,
        waited: Duration,
    },

    #[error("Publish cancelled")]
    Cancelled,

    #[error("Export error: {0}")]
    ExportError(String),

    #[error("Output generation error: {0}")]
    WriterError(String),

    #[error("Bundle error: {0}")]
    BundleError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, PublishError>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
