mod tracer_engine;

pub use tracer_engine::{TracerEngine, TracerError, TracerOptions};

/// Should be called at the start of each binary.
/// Expands to a `Result<TracerEngine, TracerError>`, the binary name is
/// taken from the calling crate so log lines can be attributed.
#[macro_export]
macro_rules! init_tracer {
    ($options:expr) => {{ $crate::tracer::TracerEngine::new($options, env!("CARGO_BIN_NAME"), module_path!()) }};
}
