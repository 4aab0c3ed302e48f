//! Global constants used throughout the vellum codebase.
//!
//! Concurrency limits and recursion bounds shared by the template engine, the
//! renderer and the CLI live here so the numbers are defined in one place.

/// Minimum number of pages rendered concurrently regardless of CPU count.
///
/// Rendering is mostly I/O-bound (loading includes and layouts), so even a
/// single-core machine benefits from several pages in flight.
pub const MIN_PARALLELISM: usize = 10;

/// Multiplier applied to CPU core count for default parallelism.
pub const PARALLELISM_CORE_MULTIPLIER: usize = 2;

/// Default CPU core count when detection fails.
///
/// Used as a fallback when `std::thread::available_parallelism()` returns an error.
pub const FALLBACK_CORE_COUNT: usize = 4;

/// Maximum nesting of `include`/`layout` tags inside templates.
pub const MAX_INCLUDE_DEPTH: usize = 10;

/// Largest count a `for` loop over a number may walk.
pub const MAX_RANGE_ITERATIONS: u64 = 1_000_000;

/// Default number of pages rendered at once: `max(10, 2 × cores)`.
pub fn default_max_concurrency() -> usize {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(FALLBACK_CORE_COUNT);
    std::cmp::max(MIN_PARALLELISM, cores * PARALLELISM_CORE_MULTIPLIER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_max_concurrency_has_a_floor() {
        assert!(default_max_concurrency() >= MIN_PARALLELISM);
    }
}
