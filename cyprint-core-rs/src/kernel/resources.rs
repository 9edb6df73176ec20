//! Resource primitives
//!
//! These only keep books: who holds what and who is waiting. Waking the
//! processes they hand grants to is the kernel's job.

use super::Pid;
use crate::error::KernelError;
use std::collections::VecDeque;

// ============================================================================
// Mutex
// ============================================================================

/// N-capacity lock with a FIFO wait queue
#[derive(Debug, Clone)]
pub struct MutexResource {
    name: String,
    capacity: usize,
    holders: Vec<Pid>,
    queue: VecDeque<Pid>,
}

impl MutexResource {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            holders: Vec::with_capacity(capacity),
            queue: VecDeque::new(),
        }
    }

    /// Returns true when granted immediately, otherwise the caller is queued
    pub fn request(&mut self, pid: Pid) -> bool {
        if self.holders.len() < self.capacity && self.queue.is_empty() {
            self.holders.push(pid);
            true
        } else {
            self.queue.push_back(pid);
            false
        }
    }

    /// Release a hold and return the queued processes granted as a result
    pub fn release(&mut self, pid: Pid) -> Result<Vec<Pid>, KernelError> {
        let index = self
            .holders
            .iter()
            .position(|holder| *holder == pid)
            .ok_or_else(|| KernelError::NotHolder {
                pid: pid.0,
                resource: self.name.clone(),
            })?;
        self.holders.remove(index);

        let mut granted = Vec::new();
        while self.holders.len() < self.capacity {
            match self.queue.pop_front() {
                Some(next) => {
                    self.holders.push(next);
                    granted.push(next);
                }
                None => break,
            }
        }
        Ok(granted)
    }

    /// Withdraw a pending request
    pub fn cancel(&mut self, pid: Pid) -> bool {
        let before = self.queue.len();
        self.queue.retain(|queued| *queued != pid);
        self.queue.len() != before
    }

    pub fn check(&self) -> Result<(), KernelError> {
        if self.holders.len() > self.capacity {
            return Err(KernelError::CapacityExceeded {
                resource: self.name.clone(),
                holders: self.holders.len(),
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn holders(&self) -> &[Pid] {
        &self.holders
    }

    pub fn is_held_by(&self, pid: Pid) -> bool {
        self.holders.contains(&pid)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

// ============================================================================
// Preemptive resource
// ============================================================================

/// Current holder of a preemptive resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holder {
    pub pid: Pid,
    /// Request priority (0 = most urgent)
    pub priority: u8,
    order: u64,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    pid: Pid,
    priority: u8,
    order: u64,
}

/// Result of a preemptive request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreemptOutcome {
    Granted,
    Queued,
    /// Granted by evicting this holder
    Preempted(Pid),
}

/// Priority-aware lock. Lower priority numbers are more urgent; a request
/// strictly more urgent than the least urgent holder evicts it.
#[derive(Debug, Clone)]
pub struct PreemptiveResource {
    name: String,
    capacity: usize,
    holders: Vec<Holder>,
    queue: Vec<Pending>,
    next_order: u64,
}

impl PreemptiveResource {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            holders: Vec::with_capacity(capacity),
            queue: Vec::new(),
            next_order: 0,
        }
    }

    pub fn request(&mut self, pid: Pid, priority: u8) -> PreemptOutcome {
        let order = self.next_order;
        self.next_order += 1;

        if self.holders.len() < self.capacity {
            self.holders.push(Holder {
                pid,
                priority,
                order,
            });
            return PreemptOutcome::Granted;
        }

        // Least urgent holder; among equals the most recently granted
        let victim = self
            .holders
            .iter()
            .enumerate()
            .max_by_key(|(_, holder)| (holder.priority, holder.order))
            .map(|(index, holder)| (index, *holder));

        match victim {
            Some((index, holder)) if priority < holder.priority => {
                self.holders.remove(index);
                self.holders.push(Holder {
                    pid,
                    priority,
                    order,
                });
                PreemptOutcome::Preempted(holder.pid)
            }
            _ => {
                let at = self.queue.partition_point(|pending| pending.priority <= priority);
                self.queue.insert(at, Pending {
                    pid,
                    priority,
                    order,
                });
                PreemptOutcome::Queued
            }
        }
    }

    /// Release a hold and return the queued processes granted as a result
    pub fn release(&mut self, pid: Pid) -> Result<Vec<Pid>, KernelError> {
        let index = self
            .holders
            .iter()
            .position(|holder| holder.pid == pid)
            .ok_or_else(|| KernelError::NotHolder {
                pid: pid.0,
                resource: self.name.clone(),
            })?;
        self.holders.remove(index);

        let mut granted = Vec::new();
        while self.holders.len() < self.capacity && !self.queue.is_empty() {
            let next = self.queue.remove(0);
            self.holders.push(Holder {
                pid: next.pid,
                priority: next.priority,
                order: next.order,
            });
            granted.push(next.pid);
        }
        Ok(granted)
    }

    pub fn cancel(&mut self, pid: Pid) -> bool {
        let before = self.queue.len();
        self.queue.retain(|pending| pending.pid != pid);
        self.queue.len() != before
    }

    pub fn check(&self) -> Result<(), KernelError> {
        if self.holders.len() > self.capacity {
            return Err(KernelError::CapacityExceeded {
                resource: self.name.clone(),
                holders: self.holders.len(),
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn holders(&self) -> &[Holder] {
        &self.holders
    }

    pub fn is_held_by(&self, pid: Pid) -> bool {
        self.holders.iter().any(|holder| holder.pid == pid)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

// ============================================================================
// Container
// ============================================================================

/// Completed container operation handed back to a waiting process
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transfer {
    Got(f64),
    Put(f64),
}

/// Bounded numeric stock with blocking get/put, FIFO per direction
#[derive(Debug, Clone)]
pub struct Container {
    index: usize,
    name: String,
    capacity: f64,
    level: f64,
    getters: VecDeque<(Pid, f64)>,
    putters: VecDeque<(Pid, f64)>,
}

impl Container {
    pub fn new(index: usize, name: impl Into<String>, capacity: f64, level: f64) -> Self {
        Self {
            index,
            name: name.into(),
            capacity,
            level,
            getters: VecDeque::new(),
            putters: VecDeque::new(),
        }
    }

    fn validate(&self, amount: f64) -> Result<(), KernelError> {
        let reason = if !amount.is_finite() {
            "not finite"
        } else if amount < 0.0 {
            "negative"
        } else if amount > self.capacity {
            "exceeds capacity"
        } else {
            return Ok(());
        };
        Err(KernelError::InvalidAmount {
            container: self.index,
            amount,
            reason,
        })
    }

    /// Returns true when satisfied immediately, otherwise the caller is queued
    pub fn request_get(&mut self, pid: Pid, amount: f64) -> Result<bool, KernelError> {
        self.validate(amount)?;
        if self.getters.is_empty() && amount <= self.level {
            self.level -= amount;
            self.check()?;
            Ok(true)
        } else {
            self.getters.push_back((pid, amount));
            Ok(false)
        }
    }

    pub fn request_put(&mut self, pid: Pid, amount: f64) -> Result<bool, KernelError> {
        self.validate(amount)?;
        if self.putters.is_empty() && self.level + amount <= self.capacity {
            self.level += amount;
            self.check()?;
            Ok(true)
        } else {
            self.putters.push_back((pid, amount));
            Ok(false)
        }
    }

    /// Serve queued requests the current level allows, in FIFO order
    pub fn settle(&mut self) -> Result<Vec<(Pid, Transfer)>, KernelError> {
        let mut served = Vec::new();
        loop {
            let mut progressed = false;
            while let Some(&(pid, amount)) = self.putters.front() {
                if self.level + amount > self.capacity {
                    break;
                }
                self.putters.pop_front();
                self.level += amount;
                served.push((pid, Transfer::Put(amount)));
                progressed = true;
            }
            while let Some(&(pid, amount)) = self.getters.front() {
                if amount > self.level {
                    break;
                }
                self.getters.pop_front();
                self.level -= amount;
                served.push((pid, Transfer::Got(amount)));
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        self.check()?;
        Ok(served)
    }

    pub fn cancel(&mut self, pid: Pid) -> bool {
        let before = self.getters.len() + self.putters.len();
        self.getters.retain(|(queued, _)| *queued != pid);
        self.putters.retain(|(queued, _)| *queued != pid);
        self.getters.len() + self.putters.len() != before
    }

    pub fn check(&self) -> Result<(), KernelError> {
        if !(0.0..=self.capacity).contains(&self.level) {
            return Err(KernelError::ContainerBounds {
                container: self.index,
                level: self.level,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn waiting_getters(&self) -> usize {
        self.getters.len()
    }

    pub fn waiting_putters(&self) -> usize {
        self.putters.len()
    }
}

// ============================================================================
// Store
// ============================================================================

/// Unbounded FIFO channel
#[derive(Debug, Clone)]
pub struct Store<M> {
    name: String,
    items: VecDeque<M>,
    getters: VecDeque<Pid>,
}

impl<M> Store<M> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: VecDeque::new(),
            getters: VecDeque::new(),
        }
    }

    /// Never blocks. Returns the receiver when a getter was already waiting.
    pub fn put(&mut self, item: M) -> Option<(Pid, M)> {
        match self.getters.pop_front() {
            Some(pid) => Some((pid, item)),
            None => {
                self.items.push_back(item);
                None
            }
        }
    }

    /// Returns the next item, or queues the caller when empty
    pub fn request_get(&mut self, pid: Pid) -> Option<M> {
        match self.items.pop_front() {
            Some(item) => Some(item),
            None => {
                self.getters.push_back(pid);
                None
            }
        }
    }

    pub fn cancel(&mut self, pid: Pid) -> bool {
        let before = self.getters.len();
        self.getters.retain(|queued| *queued != pid);
        self.getters.len() != before
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn waiting(&self) -> usize {
        self.getters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutex_fifo_handoff() {
        let mut mutex = MutexResource::new("job", 1);
        assert!(mutex.request(Pid(1)));
        assert!(!mutex.request(Pid(2)));
        assert!(!mutex.request(Pid(3)));
        assert_eq!(mutex.queued(), 2);

        assert_eq!(mutex.release(Pid(1)).unwrap(), vec![Pid(2)]);
        assert_eq!(mutex.holders(), &[Pid(2)]);
        assert_eq!(mutex.release(Pid(2)).unwrap(), vec![Pid(3)]);
        assert!(mutex.release(Pid(3)).unwrap().is_empty());
        assert!(mutex.check().is_ok());
    }

    #[test]
    fn test_mutex_release_by_stranger_fails() {
        let mut mutex = MutexResource::new("job", 1);
        mutex.request(Pid(1));
        assert!(matches!(
            mutex.release(Pid(9)),
            Err(KernelError::NotHolder { pid: 9, .. })
        ));
    }

    #[test]
    fn test_mutex_capacity_two() {
        let mut mutex = MutexResource::new("pair", 2);
        assert!(mutex.request(Pid(1)));
        assert!(mutex.request(Pid(2)));
        assert!(!mutex.request(Pid(3)));
        assert!(mutex.cancel(Pid(3)));
        assert!(mutex.release(Pid(1)).unwrap().is_empty());
    }

    #[test]
    fn test_preemption_evicts_least_urgent() {
        let mut rail = PreemptiveResource::new("power", 1);
        assert_eq!(rail.request(Pid(1), 1), PreemptOutcome::Granted);
        // Equal priority waits
        assert_eq!(rail.request(Pid(2), 1), PreemptOutcome::Queued);
        // More urgent evicts
        assert_eq!(rail.request(Pid(3), 0), PreemptOutcome::Preempted(Pid(1)));
        assert!(rail.is_held_by(Pid(3)));
        assert!(!rail.is_held_by(Pid(1)));

        assert_eq!(rail.release(Pid(3)).unwrap(), vec![Pid(2)]);
        assert!(rail.check().is_ok());
    }

    #[test]
    fn test_preemptive_queue_orders_by_priority() {
        let mut rail = PreemptiveResource::new("power", 1);
        rail.request(Pid(1), 0);
        rail.request(Pid(2), 5);
        rail.request(Pid(3), 2);
        rail.request(Pid(4), 2);
        assert_eq!(rail.release(Pid(1)).unwrap(), vec![Pid(3)]);
        assert_eq!(rail.release(Pid(3)).unwrap(), vec![Pid(4)]);
        assert_eq!(rail.release(Pid(4)).unwrap(), vec![Pid(2)]);
    }

    #[test]
    fn test_container_blocks_and_settles() {
        let mut tank = Container::new(0, "filament", 10.0, 4.0);
        assert!(tank.request_get(Pid(1), 3.0).unwrap());
        assert_eq!(tank.level(), 1.0);
        assert!(!tank.request_get(Pid(2), 5.0).unwrap());
        assert!(tank.request_put(Pid(3), 20.0).is_err());

        assert!(tank.request_put(Pid(4), 6.0).unwrap());
        let served = tank.settle().unwrap();
        assert_eq!(served, vec![(Pid(2), Transfer::Got(5.0))]);
        assert_eq!(tank.level(), 2.0);
    }

    #[test]
    fn test_container_rejects_bad_amounts() {
        let mut tank = Container::new(3, "filament", 10.0, 10.0);
        assert!(matches!(
            tank.request_get(Pid(1), -1.0),
            Err(KernelError::InvalidAmount { container: 3, .. })
        ));
        assert!(tank.request_put(Pid(1), f64::INFINITY).is_err());
        assert!(tank.request_get(Pid(1), 11.0).is_err());
        // Zero-sized requests complete at once
        assert!(tank.request_get(Pid(1), 0.0).unwrap());
    }

    #[test]
    fn test_put_waits_for_room() {
        let mut tank = Container::new(0, "filament", 10.0, 9.0);
        assert!(!tank.request_put(Pid(1), 5.0).unwrap());
        assert!(tank.request_get(Pid(2), 4.0).unwrap());
        assert_eq!(tank.settle().unwrap(), vec![(Pid(1), Transfer::Put(5.0))]);
        assert_eq!(tank.level(), 10.0);
    }

    #[test]
    fn test_store_fifo_and_direct_handoff() {
        let mut store: Store<u32> = Store::new("bus");
        assert!(store.put(1).is_none());
        assert!(store.put(2).is_none());
        assert_eq!(store.request_get(Pid(1)), Some(1));
        assert_eq!(store.request_get(Pid(1)), Some(2));
        assert_eq!(store.request_get(Pid(1)), None);
        assert_eq!(store.waiting(), 1);
        assert_eq!(store.put(3), Some((Pid(1), 3)));
        assert!(store.is_empty());
    }
}
