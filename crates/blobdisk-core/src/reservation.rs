//! Advisory reservation accounting.
//!
//! A remote disk reports unbounded capacity, so reservations never fail for
//! lack of space. They still matter: concurrent writers observe each
//! other's claims through the shared ledger and schedulers use the totals
//! to balance load across disks.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

#[derive(Debug, Default)]
struct Counters {
    reserved_bytes: u64,
    reservation_count: u64,
}

/// Disk-wide reservation totals, shared with every live [`Reservation`].
#[derive(Debug)]
pub struct ReservationLedger {
    disk: String,
    counters: Mutex<Counters>,
}

impl ReservationLedger {
    /// Create an empty ledger for the disk called `disk`.
    #[must_use]
    pub fn new(disk: impl Into<String>) -> Self {
        Self {
            disk: disk.into(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Claim `bytes` against this ledger.
    pub fn reserve(self: &Arc<Self>, bytes: u64) -> Reservation {
        let mut counters = self.counters.lock();
        counters.reserved_bytes += bytes;
        counters.reservation_count += 1;
        debug!(
            "disk {}: reserved {} bytes, {} bytes now claimed",
            self.disk, bytes, counters.reserved_bytes
        );
        drop(counters);
        Reservation {
            ledger: Arc::clone(self),
            size: bytes,
        }
    }

    /// Sum of all live claims.
    #[must_use]
    pub fn reserved_bytes(&self) -> u64 {
        self.counters.lock().reserved_bytes
    }

    /// Number of live claims.
    #[must_use]
    pub fn reservation_count(&self) -> u64 {
        self.counters.lock().reservation_count
    }
}

/// One advisory claim of bytes against a disk.
///
/// The claim is released exactly once, when the reservation is dropped.
#[must_use = "a reservation releases its claim as soon as it is dropped"]
#[derive(Debug)]
pub struct Reservation {
    ledger: Arc<ReservationLedger>,
    size: u64,
}

impl Reservation {
    /// Size of the claim in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Replace the claim with `new_size` bytes.
    pub fn update(&mut self, new_size: u64) {
        let mut counters = self.ledger.counters.lock();
        counters.reserved_bytes -= self.size;
        counters.reserved_bytes += new_size;
        self.size = new_size;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut counters = self.ledger.counters.lock();
        if counters.reserved_bytes < self.size {
            counters.reserved_bytes = 0;
            error!(
                "disk {}: unbalanced reserved bytes, clamping to zero",
                self.ledger.disk
            );
        } else {
            counters.reserved_bytes -= self.size;
        }
        if counters.reservation_count == 0 {
            error!(
                "disk {}: unbalanced reservation count",
                self.ledger.disk
            );
        } else {
            counters.reservation_count -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::thread;

    #[test]
    fn test_reserve_and_release() {
        let ledger = Arc::new(ReservationLedger::new("test"));
        let first = ledger.reserve(100);
        let second = ledger.reserve(50);
        assert_eq!(ledger.reserved_bytes(), 150);
        assert_eq!(ledger.reservation_count(), 2);
        drop(first);
        assert_eq!(ledger.reserved_bytes(), 50);
        assert_eq!(ledger.reservation_count(), 1);
        drop(second);
        assert_eq!(ledger.reserved_bytes(), 0);
        assert_eq!(ledger.reservation_count(), 0);
    }

    #[test]
    fn test_zero_byte_reservation_is_counted() {
        let ledger = Arc::new(ReservationLedger::new("test"));
        let claim = ledger.reserve(0);
        assert_eq!(claim.size(), 0);
        assert_eq!(ledger.reserved_bytes(), 0);
        assert_eq!(ledger.reservation_count(), 1);
        drop(claim);
        assert_eq!(ledger.reservation_count(), 0);
    }

    #[test]
    fn test_update_moves_claim() {
        let ledger = Arc::new(ReservationLedger::new("test"));
        let mut claim = ledger.reserve(100);
        claim.update(40);
        assert_eq!(claim.size(), 40);
        assert_eq!(ledger.reserved_bytes(), 40);
        claim.update(200);
        assert_eq!(ledger.reserved_bytes(), 200);
        drop(claim);
        assert_eq!(ledger.reserved_bytes(), 0);
    }

    #[test]
    fn test_concurrent_claims_balance_out() {
        let ledger = Arc::new(ReservationLedger::new("test"));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..200 {
                        let mut claim = ledger.reserve(rng.gen_range(0..4096));
                        if rng.gen_bool(0.5) {
                            claim.update(rng.gen_range(0..4096));
                        }
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }
        assert_eq!(ledger.reserved_bytes(), 0);
        assert_eq!(ledger.reservation_count(), 0);
    }
}
