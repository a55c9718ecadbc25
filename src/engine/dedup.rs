use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Default)]
struct Offers {
    marks: HashMap<(Uuid, Uuid), Instant>,
    /// Everyone told about a booking, kept past the TTL until the booking is
    /// forgotten so retractions reach them all.
    notified: HashMap<Uuid, BTreeSet<Uuid>>,
}

/// Remembers which (booking, driver) pairs were already offered so repeat
/// dispatch passes stay quiet until the entry expires.
pub struct DispatchLog {
    ttl: Duration,
    offers: Mutex<Offers>,
}

impl DispatchLog {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            offers: Mutex::new(Offers::default()),
        }
    }

    fn offers(&self) -> std::sync::MutexGuard<'_, Offers> {
        self.offers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `true` when the pair was not offered within the TTL and is now marked.
    pub fn try_mark(&self, booking_id: Uuid, driver_id: Uuid) -> bool {
        self.try_mark_at(booking_id, driver_id, Instant::now())
    }

    pub fn try_mark_at(&self, booking_id: Uuid, driver_id: Uuid, now: Instant) -> bool {
        let mut offers = self.offers();

        match offers.marks.get(&(booking_id, driver_id)) {
            Some(offered_at) if now.saturating_duration_since(*offered_at) < self.ttl => false,
            _ => {
                offers.marks.insert((booking_id, driver_id), now);
                offers.notified.entry(booking_id).or_default().insert(driver_id);
                true
            }
        }
    }

    /// Every driver offered the booking since it was last forgotten, whether
    /// or not the dedup entry has expired.
    pub fn offered_drivers(&self, booking_id: Uuid) -> Vec<Uuid> {
        self.offers()
            .notified
            .get(&booking_id)
            .map(|drivers| drivers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn forget_booking(&self, booking_id: Uuid) {
        let mut offers = self.offers();

        offers.marks.retain(|(b, _), _| *b != booking_id);
        offers.notified.remove(&booking_id);
    }

    /// Drops expired dedup marks only.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut offers = self.offers();
        let before = offers.marks.len();
        let ttl = self.ttl;

        offers.marks.retain(|_, at| now.saturating_duration_since(*at) < ttl);

        before - offers.marks.len()
    }

    pub fn len(&self) -> usize {
        self.offers().marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
