//! Pre-write hooks and the reservation status policy.
//!
//! Timestamping is a hook run around create/update, not behavior baked into the
//! entity types. [`Lifecycle`] owns an ordered list of hooks and applies them to
//! anything [`Timestamped`].

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::model::{Ms, Owner, Pet, Reservation, ReservationStatus, Timestamps};
use crate::store::ValidationError;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as Ms)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start: Ms) -> Self {
        Self(AtomicI64::new(start))
    }

    pub fn advance(&self, by: Ms) -> Ms {
        self.0.fetch_add(by, Ordering::SeqCst) + by
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait Timestamped {
    fn timestamps_mut(&mut self) -> &mut Timestamps;
}

impl Timestamped for Owner {
    fn timestamps_mut(&mut self) -> &mut Timestamps {
        &mut self.timestamps
    }
}

impl Timestamped for Pet {
    fn timestamps_mut(&mut self) -> &mut Timestamps {
        &mut self.timestamps
    }
}

impl Timestamped for Reservation {
    fn timestamps_mut(&mut self) -> &mut Timestamps {
        &mut self.timestamps
    }
}

pub trait WriteHook: Send + Sync {
    fn on_create(&self, _ts: &mut Timestamps) {}
    fn on_update(&self, _ts: &mut Timestamps) {}
}

/// Sets `created_at` on create and `updated_at` on every update.
pub struct Stamp {
    clock: Arc<dyn Clock>,
}

impl Stamp {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl WriteHook for Stamp {
    fn on_create(&self, ts: &mut Timestamps) {
        ts.created_at = self.clock.now_ms();
        ts.updated_at = None;
    }

    fn on_update(&self, ts: &mut Timestamps) {
        ts.updated_at = Some(self.clock.now_ms());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusPolicy {
    /// Any status may be written over any other.
    #[default]
    Unrestricted,
    /// Only the forward transitions in [`ReservationStatus::can_transition_to`].
    Strict,
}

impl FromStr for StatusPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unrestricted" | "free" => Ok(StatusPolicy::Unrestricted),
            "strict" => Ok(StatusPolicy::Strict),
            other => Err(format!("unknown status policy: {other}")),
        }
    }
}

pub struct Lifecycle {
    hooks: Vec<Arc<dyn WriteHook>>,
    status_policy: StatusPolicy,
}

impl Lifecycle {
    pub fn new(clock: Arc<dyn Clock>, status_policy: StatusPolicy) -> Self {
        Self {
            hooks: vec![Arc::new(Stamp::new(clock))],
            status_policy,
        }
    }

    /// Append a hook. Hooks run in registration order.
    pub fn with_hook(mut self, hook: Arc<dyn WriteHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn on_create<T: Timestamped>(&self, record: &mut T) {
        let ts = record.timestamps_mut();
        for hook in &self.hooks {
            hook.on_create(ts);
        }
    }

    pub fn on_update<T: Timestamped>(&self, record: &mut T) {
        let created_at = record.timestamps_mut().created_at;
        let ts = record.timestamps_mut();
        for hook in &self.hooks {
            hook.on_update(ts);
        }
        // created_at is fixed at creation whatever the hooks do
        ts.created_at = created_at;
    }

    pub fn check_transition(
        &self,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> Result<(), ValidationError> {
        match self.status_policy {
            StatusPolicy::Unrestricted => Ok(()),
            StatusPolicy::Strict if from.can_transition_to(to) => Ok(()),
            StatusPolicy::Strict => Err(ValidationError::InvalidTransition { from, to }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn owner() -> Owner {
        Owner {
            id: Ulid::new(),
            name: "Ana".into(),
            timestamps: Timestamps::default(),
        }
    }

    #[test]
    fn create_stamps_created_at_only() {
        let clock = Arc::new(ManualClock::new(1_000));
        let lc = Lifecycle::new(clock, StatusPolicy::Unrestricted);
        let mut o = owner();
        lc.on_create(&mut o);
        assert_eq!(o.timestamps.created_at, 1_000);
        assert_eq!(o.timestamps.updated_at, None);
    }

    #[test]
    fn update_moves_updated_at_and_keeps_created_at() {
        let clock = Arc::new(ManualClock::new(1_000));
        let lc = Lifecycle::new(clock.clone(), StatusPolicy::Unrestricted);
        let mut o = owner();
        lc.on_create(&mut o);

        clock.advance(500);
        lc.on_update(&mut o);
        assert_eq!(o.timestamps.created_at, 1_000);
        assert_eq!(o.timestamps.updated_at, Some(1_500));

        clock.advance(1);
        lc.on_update(&mut o);
        assert_eq!(o.timestamps.updated_at, Some(1_501));
    }

    struct Meddler;

    impl WriteHook for Meddler {
        fn on_update(&self, ts: &mut Timestamps) {
            ts.created_at = -1;
        }
    }

    #[test]
    fn extra_hooks_cannot_rewrite_created_at() {
        let clock = Arc::new(ManualClock::new(10));
        let lc = Lifecycle::new(clock, StatusPolicy::Unrestricted).with_hook(Arc::new(Meddler));
        let mut o = owner();
        lc.on_create(&mut o);
        lc.on_update(&mut o);
        assert_eq!(o.timestamps.created_at, 10);
        assert_eq!(o.timestamps.updated_at, Some(10));
    }

    #[test]
    fn strict_policy_enforces_table() {
        use ReservationStatus::*;
        let lc = Lifecycle::new(Arc::new(SystemClock), StatusPolicy::Strict);
        assert!(lc.check_transition(New, Confirmed).is_ok());
        assert!(lc.check_transition(Confirmed, Cancelled).is_ok());
        assert_eq!(
            lc.check_transition(Confirmed, New),
            Err(ValidationError::InvalidTransition {
                from: Confirmed,
                to: New
            })
        );
        assert!(lc.check_transition(Cancelled, Confirmed).is_err());
    }

    #[test]
    fn unrestricted_policy_allows_anything() {
        use ReservationStatus::*;
        let lc = Lifecycle::new(Arc::new(SystemClock), StatusPolicy::Unrestricted);
        assert!(lc.check_transition(Cancelled, New).is_ok());
        assert!(lc.check_transition(Confirmed, New).is_ok());
    }

    #[test]
    fn status_policy_parses() {
        assert_eq!("strict".parse::<StatusPolicy>().unwrap(), StatusPolicy::Strict);
        assert_eq!(" Unrestricted ".parse::<StatusPolicy>().unwrap(), StatusPolicy::Unrestricted);
        assert!("lenient".parse::<StatusPolicy>().is_err());
    }
}
