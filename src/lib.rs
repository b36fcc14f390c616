//! Streaming inspector for ISO Base Media File Format (MP4/QuickTime-family)
//! box structures.
//!
//! The crate walks a byte source without loading it whole, yields a pull-based
//! stream of box events, validates structural and semantic conformance, and
//! can fold the events into an immutable tree snapshot. Corrupt input is
//! repaired where possible and reported rather than aborted on.
//!
//! ```no_run
//! use isoinspect::{BoxCatalog, ChunkedFileReader, ParseContext, ParsePipeline, inspect};
//!
//! let reader = ChunkedFileReader::open("movie.mp4")?;
//! let pipeline = ParsePipeline::new(BoxCatalog::bundled());
//! let tree = inspect(&pipeline, &reader, ParseContext::new())?;
//! println!("{} top-level boxes", tree.roots.len());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod boxes;
pub mod catalog;
pub mod classify;
pub mod header;
pub mod issues;
pub mod payload;
pub mod pipeline;
pub mod reader;
pub mod rules;
pub mod tree;

pub use boxes::{BoxHeader, BoxKey, ByteRange, FourCC};
pub use catalog::{BoxCatalog, BoxDescriptor};
pub use classify::BoxClassifier;
pub use header::{DeclaredSize, HeaderError, RawHeader, decode_header};
pub use issues::{IssueSink, ParseIssue, Severity, ValidationIssue, VecSink};
pub use payload::{DecoderRegistry, ParsedBoxPayload, PayloadField, default_registry};
pub use pipeline::{
    CancellationToken, ParseContext, ParseEvent, ParseEventKind, ParseEvents, ParsePipeline,
    StreamError,
};
pub use reader::{ChunkedFileReader, MemoryReader, RandomAccessReader, ReaderError};
pub use rules::{BoxValidator, ValidationRule};
pub use tree::{NodeStatus, ParseTree, ParseTreeBuilder, ParseTreeNode};

/// Drive one full parse session and return the finished tree.
///
/// Callers that need partial trees on failure, cancellation checks, or
/// real-time events should drive [`ParsePipeline::events`] themselves.
pub fn inspect<'a, R: RandomAccessReader>(
    pipeline: &'a ParsePipeline,
    reader: &'a R,
    ctx: ParseContext<'a>,
) -> Result<ParseTree, StreamError> {
    let mut builder = ParseTreeBuilder::new();
    for item in pipeline.events(reader, ctx) {
        builder.consume(&item?);
    }
    Ok(builder.snapshot())
}
