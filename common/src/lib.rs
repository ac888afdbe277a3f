pub mod tracer;

pub type Real = f64;
pub type Code = u16;

/// Widest code space a [Code] can hold.
pub const MAX_BIT_DEPTH: u32 = Code::BITS;

/// Elementary charge in coulombs.
pub const ELEMENTARY_CHARGE: Real = 1.602_176_634e-19;

pub const NANOSECONDS_PER_SECOND: Real = 1e9;

/// Converts a duration in nanoseconds to seconds.
pub fn ns_to_seconds(ns: Real) -> Real {
    ns / NANOSECONDS_PER_SECOND
}

/// Converts a duration in seconds to nanoseconds.
pub fn seconds_to_ns(seconds: Real) -> Real {
    seconds * NANOSECONDS_PER_SECOND
}
