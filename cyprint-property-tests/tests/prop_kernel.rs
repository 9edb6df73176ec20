//! Property tests for the event queue and kernel scheduling
//!
//! Tests invariants for:
//! - Event queue: pops in (time, insertion) order, clock never goes back
//! - Mutex: grants follow request order, capacity never exceeded

use cyprint_property_tests::kernel::{
    Context, EventQueue, Kernel, MutexId, MutexResource, Pid, Process, Step, Wake,
};
use cyprint_property_tests::{KernelError, SimTime};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

/// Delays on a coarse grid so that ties are common
fn delay() -> impl Strategy<Value = f64> {
    (0u32..20u32).prop_map(|ticks| ticks as f64 * 0.25)
}

// ============================================================================
// Event Queue Property Tests
// ============================================================================

proptest! {
    /// Events come out sorted by time; ties in insertion order
    #[test]
    fn queue_pops_in_time_then_fifo_order(delays in prop::collection::vec(delay(), 1..64)) {
        let mut queue = EventQueue::new();
        for (index, delay) in delays.iter().enumerate() {
            queue.schedule_in(*delay, index).unwrap();
        }

        let mut popped = Vec::new();
        while let Some(event) = queue.pop().unwrap() {
            prop_assert_eq!(queue.now(), event.time);
            popped.push((event.time, event.payload));
        }

        prop_assert_eq!(popped.len(), delays.len());
        for pair in popped.windows(2) {
            let ((t0, i0), (t1, i1)) = (pair[0], pair[1]);
            prop_assert!(t0 < t1 || (t0 == t1 && i0 < i1), "out of order: {:?}", pair);
        }
    }

    /// Negative delays are rejected and leave the queue untouched
    #[test]
    fn queue_rejects_negative_delay(delay in -1000.0f64..-0.0001) {
        let mut queue: EventQueue<()> = EventQueue::new();
        let err = queue.schedule_in(delay, ()).unwrap_err();
        let is_negative_delay = matches!(err, KernelError::NegativeDelay { .. });
        prop_assert!(is_negative_delay);
        prop_assert!(queue.is_empty());
        prop_assert_eq!(queue.now(), SimTime::ZERO);
    }
}

// ============================================================================
// Mutex Property Tests
// ============================================================================

proptest! {
    /// Releasing hands the lock to waiters in request order
    #[test]
    fn mutex_grants_in_request_order(capacity in 1usize..4, requesters in 1u32..16) {
        let mut mutex = MutexResource::new("lock", capacity);
        let mut granted = Vec::new();
        for pid in 0..requesters {
            if mutex.request(Pid(pid)) {
                granted.push(pid);
            }
        }
        prop_assert_eq!(granted.len(), (requesters as usize).min(capacity));

        let mut cursor = 0;
        while cursor < granted.len() {
            let holder = granted[cursor];
            cursor += 1;
            for next in mutex.release(Pid(holder)).unwrap() {
                granted.push(next.0);
            }
            prop_assert!(mutex.holders().len() <= capacity);
            mutex.check().unwrap();
        }

        let expected: Vec<u32> = (0..requesters).collect();
        prop_assert_eq!(granted, expected);
    }
}

// ============================================================================
// Kernel Property Tests
// ============================================================================

/// Sleeps, then holds a lock for a while, recording when it got it
struct Worker {
    lock: MutexId,
    sleep: f64,
    hold: f64,
    stage: u8,
}

impl Process for Worker {
    type World = Vec<(u32, SimTime, SimTime)>;
    type Message = ();

    fn resume(
        &mut self,
        cx: &mut Context<'_, Self::World, ()>,
        wake: Wake<()>,
    ) -> Result<Step, KernelError> {
        self.stage += 1;
        match (self.stage, wake) {
            (1, Wake::Start) => Ok(Step::Timeout(self.sleep)),
            (2, Wake::Timeout) => Ok(Step::Acquire(self.lock)),
            (3, Wake::Granted(_)) => Ok(Step::Timeout(self.hold)),
            (4, Wake::Timeout) => {
                let pid = cx.pid().0;
                let now = cx.now();
                let start = SimTime::from_secs(now.as_secs() - self.hold);
                cx.world().push((pid, start, now));
                cx.release(self.lock)?;
                Ok(Step::Exit)
            }
            (_, other) => Err(KernelError::unexpected_wake(cx.pid().0, &other, "worker")),
        }
    }
}

proptest! {
    /// A capacity-1 lock is never held by two workers at once
    #[test]
    fn kernel_mutex_excludes(jobs in prop::collection::vec((delay(), 1u32..8), 1..12)) {
        let mut kernel = Kernel::new();
        let lock = kernel.add_mutex("lock", 1).unwrap();
        for (sleep, hold) in &jobs {
            kernel.spawn(Worker {
                lock,
                sleep: *sleep,
                hold: *hold as f64 * 0.5,
                stage: 0,
            }).unwrap();
        }

        let mut spans = Vec::new();
        kernel.run_until(&mut spans, SimTime::from_secs(1000.0)).unwrap();
        prop_assert_eq!(spans.len(), jobs.len());

        spans.sort_by(|a, b| a.1.cmp(&b.1));
        for pair in spans.windows(2) {
            prop_assert!(
                pair[0].2.as_secs() <= pair[1].1.as_secs() + 1e-9,
                "overlapping holders: {:?}", pair
            );
        }
    }
}
