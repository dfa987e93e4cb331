//! Monotonic clock and page-alignment helpers.

use std::sync::OnceLock;
use std::time::Instant;

/// Page size in bytes. Overridable per `Config`, but most call sites that only
/// need alignment use this crate-level default.
pub const PAGE_SIZE: usize = 4096;

static CLOCK_ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Returns a monotonically non-decreasing nanosecond timestamp, relative to an
/// arbitrary origin fixed at first use within the process.
#[inline]
pub fn now_ns() -> u64 {
    let origin = CLOCK_ORIGIN.get_or_init(Instant::now);
    origin.elapsed().as_nanos() as u64
}

/// Rounds `addr` down to the nearest multiple of `page_size`. `page_size` must
/// be a power of two.
#[inline]
pub fn page_align(addr: u64, page_size: usize) -> u64 {
    let mask = page_size as u64 - 1;
    addr & !mask
}

/// True if `size` is a power of two, as required of a page size. Used by
/// [`crate::config::Config::validate`] to reject a malformed `page_size`.
#[inline]
pub fn is_power_of_two(size: usize) -> bool {
    size != 0 && (size & (size - 1)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_rounds_down_to_page_boundary() {
        assert_eq!(page_align(0, 4096), 0);
        assert_eq!(page_align(1, 4096), 0);
        assert_eq!(page_align(4095, 4096), 0);
        assert_eq!(page_align(4096, 4096), 4096);
        assert_eq!(page_align(4097, 4096), 4096);
        assert_eq!(page_align(8191, 4096), 4096);
    }

    #[test]
    fn boundary_addresses_share_a_page() {
        let a = page_align(0x1000, PAGE_SIZE);
        let b = page_align(0x1000 + PAGE_SIZE as u64 - 1, PAGE_SIZE);
        assert_eq!(a, b);
    }

    #[test]
    fn clock_is_monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }

    #[test]
    fn power_of_two_check() {
        assert!(is_power_of_two(4096));
        assert!(!is_power_of_two(4097));
        assert!(!is_power_of_two(0));
    }
}
