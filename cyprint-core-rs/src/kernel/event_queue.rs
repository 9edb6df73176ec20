//! Event queue and virtual clock
//!
//! Min-heap of wake-ups keyed by `(time, seq)`. The sequence number is
//! assigned at registration, so events for the same instant pop in the order
//! they were scheduled.

use crate::error::KernelError;
use crate::types::SimTime;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A wake-up registered with the clock
#[derive(Debug, Clone)]
pub struct ScheduledEvent<T> {
    pub time: SimTime,
    pub seq: u64,
    pub payload: T,
}

impl<T> PartialEq for ScheduledEvent<T> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl<T> Eq for ScheduledEvent<T> {}

impl<T> PartialOrd for ScheduledEvent<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for ScheduledEvent<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Clock plus pending events
#[derive(Debug)]
pub struct EventQueue<T> {
    heap: BinaryHeap<Reverse<ScheduledEvent<T>>>,
    next_seq: u64,
    now: SimTime,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            now: SimTime::ZERO,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule at an absolute time, which may not precede the clock
    pub fn schedule_at(&mut self, time: SimTime, payload: T) -> Result<u64, KernelError> {
        if !time.is_finite() || time < self.now {
            return Err(KernelError::TimeTravel {
                at: time.as_secs(),
                now: self.now.as_secs(),
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(ScheduledEvent { time, seq, payload }));
        Ok(seq)
    }

    /// Schedule `delay` seconds from now
    pub fn schedule_in(&mut self, delay: f64, payload: T) -> Result<u64, KernelError> {
        if !delay.is_finite() || delay < 0.0 {
            return Err(KernelError::NegativeDelay {
                delay,
                now: self.now.as_secs(),
            });
        }
        self.schedule_at(self.now + delay, payload)
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|Reverse(event)| event.time)
    }

    /// Pop the earliest event and advance the clock to it
    pub fn pop(&mut self) -> Result<Option<ScheduledEvent<T>>, KernelError> {
        let Some(Reverse(event)) = self.heap.pop() else {
            return Ok(None);
        };
        if event.time < self.now {
            return Err(KernelError::TimeTravel {
                at: event.time.as_secs(),
                now: self.now.as_secs(),
            });
        }
        self.now = event.time;
        Ok(Some(event))
    }

    /// Move the clock forward without processing anything
    pub fn advance_to(&mut self, time: SimTime) -> Result<(), KernelError> {
        if !time.is_finite() || time < self.now {
            return Err(KernelError::TimeTravel {
                at: time.as_secs(),
                now: self.now.as_secs(),
            });
        }
        self.now = time;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_time_order() {
        let mut queue = EventQueue::new();
        queue.schedule_in(3.0, "c").unwrap();
        queue.schedule_in(1.0, "a").unwrap();
        queue.schedule_in(2.0, "b").unwrap();

        let order: Vec<_> = std::iter::from_fn(|| queue.pop().unwrap())
            .map(|event| event.payload)
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(queue.now(), SimTime::from_secs(3.0));
    }

    #[test]
    fn test_same_instant_is_fifo() {
        let mut queue = EventQueue::new();
        for label in 0..10 {
            queue.schedule_in(1.0, label).unwrap();
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.pop().unwrap())
            .map(|event| event.payload)
            .collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_rejects_negative_delay_and_past_times() {
        let mut queue = EventQueue::new();
        queue.schedule_in(5.0, ()).unwrap();
        queue.pop().unwrap();

        assert!(matches!(
            queue.schedule_in(-0.5, ()),
            Err(KernelError::NegativeDelay { .. })
        ));
        assert!(matches!(
            queue.schedule_in(f64::NAN, ()),
            Err(KernelError::NegativeDelay { .. })
        ));
        assert!(matches!(
            queue.schedule_at(SimTime::from_secs(4.0), ()),
            Err(KernelError::TimeTravel { .. })
        ));
        assert!(queue.advance_to(SimTime::from_secs(1.0)).is_err());
        assert!(queue.schedule_at(SimTime::from_secs(5.0), ()).is_ok());
    }
}
