//! Rendering of query outcomes and institution overviews into exportable
//! documents. Everything here is pure string building over already-computed
//! data; only the `export_*` entry points touch the filesystem.

mod export;

pub use export::{
    ExportFormat, export_outcome, export_overview, render_outcome, render_overview,
};
