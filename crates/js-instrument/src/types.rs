use serde::Serialize;

/// One observation: a name that received a value, with a JSON-safe snapshot
/// of that value. `value: None` stands for `undefined` and serializes by
/// omitting the key, matching `JSON.stringify` on the host side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    /// Milliseconds since the Unix epoch at observation time.
    pub ts: u64,
    /// Bound identifier, or the literal source text of a member target or
    /// destructuring pattern.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Wall-clock ceiling for one program run.
    pub timeout_ms: u64,
    /// Engine-level backstop against runaway loops.
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
    pub stack_size_limit: usize,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            loop_iteration_limit: 1_000_000,
            recursion_limit: 128,
            stack_size_limit: 1024 * 1024,
        }
    }
}

/// Terminal state of one sandbox run. Every variant carries the records
/// observed before the run ended; the sink has already been flushed and
/// closed by the time a `RunOutcome` is returned.
#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        /// Projection of the program's completion value.
        result: Option<serde_json::Value>,
        records: Vec<TraceRecord>,
        elapsed_ms: u128,
    },
    Failed {
        error: String,
        records: Vec<TraceRecord>,
        elapsed_ms: u128,
    },
    TimedOut {
        timeout_ms: u64,
        records: Vec<TraceRecord>,
    },
}

impl RunOutcome {
    pub fn records(&self) -> &[TraceRecord] {
        match self {
            RunOutcome::Completed { records, .. }
            | RunOutcome::Failed { records, .. }
            | RunOutcome::TimedOut { records, .. } => records,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}
