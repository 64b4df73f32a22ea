//! Parse → rewrite → serialize, in one pass.
//!
//! The sandbox feeds dynamically introduced code back through
//! [`instrument_source`] at runtime, so the output is re-parsed before it is
//! returned: emitting text the parser cannot re-consume would turn a rewrite
//! bug into a runtime failure of the traced program.

use oxc_allocator::Allocator;
use oxc_ast_visit::Visit;
use oxc_parser::{ParseOptions, Parser};
use oxc_span::SourceType;

use crate::rewrite::Rewriter;

/// Name of the observation hook injected into the execution context. Every
/// rewritten construct routes its value through a call to this global.
pub const HOOK_NAME: &str = "__report";

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("instrumented output failed to re-parse: {0}")]
    Reparse(String),
}

/// Instruments `source`, returning the rewritten program text.
pub fn instrument_source(source: &str) -> Result<String, TransformError> {
    let rewritten = rewrite(source)?;
    if let Err(detail) = check(&rewritten) {
        return Err(TransformError::Reparse(detail));
    }
    Ok(rewritten)
}

fn source_type() -> SourceType {
    // Script semantics with JSX accepted; modules are out of scope.
    SourceType::cjs().with_jsx(true)
}

fn parse_options() -> ParseOptions {
    ParseOptions {
        // `Function`-constructor bodies may contain top-level `return`
        allow_return_outside_function: true,
        ..ParseOptions::default()
    }
}

fn rewrite(source: &str) -> Result<String, TransformError> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, source_type())
        .with_options(parse_options())
        .parse();
    if parsed.panicked || !parsed.diagnostics.is_empty() {
        return Err(TransformError::Parse(join_diagnostics(&parsed.diagnostics)));
    }
    let mut rewriter = Rewriter::new(source);
    rewriter.visit_program(&parsed.program);
    Ok(rewriter.into_output())
}

fn check(source: &str) -> Result<(), String> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, source_type())
        .with_options(parse_options())
        .parse();
    if parsed.panicked || !parsed.diagnostics.is_empty() {
        return Err(join_diagnostics(&parsed.diagnostics));
    }
    Ok(())
}

fn join_diagnostics<E: std::fmt::Display>(errors: &[E]) -> String {
    if errors.is_empty() {
        return "unknown parser error".to_string();
    }
    errors
        .iter()
        .map(|error| error.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
