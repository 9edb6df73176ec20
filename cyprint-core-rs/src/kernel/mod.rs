//! Discrete-event simulation kernel
//!
//! Processes are explicit state machines. The kernel resumes a process with a
//! [`Wake`] saying why it woke; the process mutates the world through its
//! [`Context`] and answers with the [`Step`] it suspends on next.
//!
//! Exactly one process runs at any virtual instant. Wake-ups for the same
//! instant are delivered in registration order.

pub mod event_queue;
pub mod resources;

pub use event_queue::{EventQueue, ScheduledEvent};
pub use resources::{
    Container, Holder, MutexResource, PreemptOutcome, PreemptiveResource, Store, Transfer,
};

use crate::error::{ConfigError, KernelError};
use crate::types::SimTime;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, trace, warn};

// ============================================================================
// Identifiers
// ============================================================================

/// Process identifier, stable for the life of the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl Pid {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreemptiveId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(usize);

/// A lock a process can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    Mutex(MutexId),
    Preemptive(PreemptiveId),
}

impl From<MutexId> for ResourceRef {
    fn from(id: MutexId) -> Self {
        ResourceRef::Mutex(id)
    }
}

impl From<PreemptiveId> for ResourceRef {
    fn from(id: PreemptiveId) -> Self {
        ResourceRef::Preemptive(id)
    }
}

// ============================================================================
// Process protocol
// ============================================================================

/// Eviction notice delivered to a preempted holder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interruption {
    pub resource: PreemptiveId,
    pub by: Pid,
}

/// Why a process is being resumed
#[derive(Debug, Clone, PartialEq)]
pub enum Wake<M> {
    Start,
    Timeout,
    Granted(ResourceRef),
    Interrupted(Interruption),
    Got { container: ContainerId, amount: f64 },
    Stored { container: ContainerId, amount: f64 },
    Received(M),
}

/// What a process suspends on after a resumption
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Timeout(f64),
    Acquire(MutexId),
    AcquirePreemptive {
        resource: PreemptiveId,
        priority: u8,
    },
    Get { container: ContainerId, amount: f64 },
    Put { container: ContainerId, amount: f64 },
    Receive(StoreId),
    /// Finish; the kernel releases anything still held
    Exit,
}

/// A cooperatively scheduled state machine
pub trait Process {
    type World;
    type Message: fmt::Debug;

    fn resume(
        &mut self,
        cx: &mut Context<'_, Self::World, Self::Message>,
        wake: Wake<Self::Message>,
    ) -> Result<Step, KernelError>;

    fn label(&self) -> &'static str {
        "process"
    }
}

/// How `run_until` stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Events remain beyond the horizon
    HorizonReached,
    /// No events remain
    Drained,
}

// ============================================================================
// Kernel core
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    Running,
    /// A wake-up is already queued and cannot be withdrawn
    Ready,
    Timeout,
    Mutex(MutexId),
    Preemptive(PreemptiveId),
    Get(ContainerId),
    Put(ContainerId),
    Receive(StoreId),
    Exited,
}

#[derive(Debug)]
struct Slot {
    /// Bumped on cancellation; queued wake-ups carrying an older value are stale
    generation: u64,
    wait: Wait,
    held: Vec<ResourceRef>,
    deferred: VecDeque<Interruption>,
}

#[derive(Debug)]
struct Delivery<M> {
    pid: Pid,
    generation: u64,
    wake: Wake<M>,
}

#[derive(Debug)]
struct Core<M> {
    queue: EventQueue<Delivery<M>>,
    slots: Vec<Slot>,
    mutexes: Vec<MutexResource>,
    preemptive: Vec<PreemptiveResource>,
    containers: Vec<Container>,
    stores: Vec<Store<M>>,
}

impl<M: fmt::Debug> Core<M> {
    fn slot(&mut self, pid: Pid) -> Result<&mut Slot, KernelError> {
        self.slots
            .get_mut(pid.index())
            .ok_or(KernelError::UnknownProcess(pid.0))
    }

    fn mutex(&mut self, id: MutexId) -> Result<&mut MutexResource, KernelError> {
        self.mutexes.get_mut(id.0).ok_or(KernelError::UnknownResource {
            kind: "mutex",
            index: id.0,
        })
    }

    fn preemptive(&mut self, id: PreemptiveId) -> Result<&mut PreemptiveResource, KernelError> {
        self.preemptive
            .get_mut(id.0)
            .ok_or(KernelError::UnknownResource {
                kind: "preemptive resource",
                index: id.0,
            })
    }

    fn container(&mut self, id: ContainerId) -> Result<&mut Container, KernelError> {
        self.containers
            .get_mut(id.0)
            .ok_or(KernelError::UnknownResource {
                kind: "container",
                index: id.0,
            })
    }

    fn store(&mut self, id: StoreId) -> Result<&mut Store<M>, KernelError> {
        self.stores.get_mut(id.0).ok_or(KernelError::UnknownResource {
            kind: "store",
            index: id.0,
        })
    }

    fn wake(&mut self, pid: Pid, wake: Wake<M>) -> Result<(), KernelError> {
        let now = self.queue.now();
        let slot = self.slot(pid)?;
        slot.wait = Wait::Ready;
        let generation = slot.generation;
        self.queue.schedule_at(
            now,
            Delivery {
                pid,
                generation,
                wake,
            },
        )?;
        Ok(())
    }

    fn grant(&mut self, pid: Pid, resource: ResourceRef) -> Result<(), KernelError> {
        self.slot(pid)?.held.push(resource);
        self.wake(pid, Wake::Granted(resource))
    }

    fn release(&mut self, pid: Pid, resource: ResourceRef) -> Result<(), KernelError> {
        let slot = self.slot(pid)?;
        match slot.held.iter().position(|held| *held == resource) {
            Some(index) => {
                slot.held.remove(index);
            }
            None => {
                return Err(KernelError::NotHolder {
                    pid: pid.0,
                    resource: format!("{resource:?}"),
                })
            }
        }

        let granted = match resource {
            ResourceRef::Mutex(id) => self.mutex(id)?.release(pid)?,
            ResourceRef::Preemptive(id) => self.preemptive(id)?.release(pid)?,
        };
        for next in granted {
            self.grant(next, resource)?;
        }
        Ok(())
    }

    /// Drop whatever the process is waiting for
    fn cancel_wait(&mut self, pid: Pid) -> Result<(), KernelError> {
        let slot = self.slot(pid)?;
        slot.generation += 1;
        let wait = slot.wait;
        match wait {
            Wait::Mutex(id) => {
                self.mutex(id)?.cancel(pid);
            }
            Wait::Preemptive(id) => {
                self.preemptive(id)?.cancel(pid);
            }
            Wait::Get(id) | Wait::Put(id) => {
                self.container(id)?.cancel(pid);
            }
            Wait::Receive(id) => {
                self.store(id)?.cancel(pid);
            }
            Wait::Running | Wait::Ready | Wait::Timeout | Wait::Exited => {}
        }
        Ok(())
    }

    /// Interruptions reach a process at its next suspension point
    fn interrupt(&mut self, victim: Pid, interruption: Interruption) -> Result<(), KernelError> {
        let wait = self.slot(victim)?.wait;
        match wait {
            Wait::Exited => Ok(()),
            Wait::Running | Wait::Ready => {
                self.slot(victim)?.deferred.push_back(interruption);
                Ok(())
            }
            _ => {
                self.cancel_wait(victim)?;
                self.wake(victim, Wake::Interrupted(interruption))
            }
        }
    }

    fn settle(&mut self, id: ContainerId) -> Result<(), KernelError> {
        for (pid, transfer) in self.container(id)?.settle()? {
            let wake = match transfer {
                Transfer::Got(amount) => Wake::Got {
                    container: id,
                    amount,
                },
                Transfer::Put(amount) => Wake::Stored {
                    container: id,
                    amount,
                },
            };
            self.wake(pid, wake)?;
        }
        Ok(())
    }

    /// Suspend `pid` on `step`. Returns true once the process has exited.
    fn apply(&mut self, pid: Pid, step: Step) -> Result<bool, KernelError> {
        match step {
            Step::Timeout(delay) => {
                let generation = self.slot(pid)?.generation;
                self.queue.schedule_in(
                    delay,
                    Delivery {
                        pid,
                        generation,
                        wake: Wake::Timeout,
                    },
                )?;
                self.slot(pid)?.wait = Wait::Timeout;
            }
            Step::Acquire(id) => {
                if self.mutex(id)?.request(pid) {
                    self.grant(pid, id.into())?;
                } else {
                    self.slot(pid)?.wait = Wait::Mutex(id);
                }
            }
            Step::AcquirePreemptive { resource, priority } => {
                match self.preemptive(resource)?.request(pid, priority) {
                    PreemptOutcome::Granted => self.grant(pid, resource.into())?,
                    PreemptOutcome::Queued => self.slot(pid)?.wait = Wait::Preemptive(resource),
                    PreemptOutcome::Preempted(victim) => {
                        debug!("Kernel: {} preempts {} on {:?}", pid, victim, resource);
                        let evicted = ResourceRef::Preemptive(resource);
                        self.slot(victim)?.held.retain(|held| *held != evicted);
                        self.grant(pid, evicted)?;
                        self.interrupt(victim, Interruption { resource, by: pid })?;
                    }
                }
            }
            Step::Get { container, amount } => {
                if self.container(container)?.request_get(pid, amount)? {
                    self.wake(pid, Wake::Got { container, amount })?;
                } else {
                    self.slot(pid)?.wait = Wait::Get(container);
                }
                self.settle(container)?;
            }
            Step::Put { container, amount } => {
                if self.container(container)?.request_put(pid, amount)? {
                    self.wake(pid, Wake::Stored { container, amount })?;
                } else {
                    self.slot(pid)?.wait = Wait::Put(container);
                }
                self.settle(container)?;
            }
            Step::Receive(id) => match self.store(id)?.request_get(pid) {
                Some(item) => self.wake(pid, Wake::Received(item))?,
                None => self.slot(pid)?.wait = Wait::Receive(id),
            },
            Step::Exit => {
                while let Some(resource) = self.slot(pid)?.held.last().copied() {
                    self.release(pid, resource)?;
                }
                let slot = self.slot(pid)?;
                slot.wait = Wait::Exited;
                slot.deferred.clear();
                return Ok(true);
            }
        }

        let slot = self.slot(pid)?;
        if slot.wait != Wait::Ready {
            if let Some(interruption) = slot.deferred.pop_front() {
                self.interrupt(pid, interruption)?;
            }
        }
        Ok(false)
    }

    fn check_resources(&self) -> Result<(), KernelError> {
        for mutex in &self.mutexes {
            mutex.check()?;
        }
        for resource in &self.preemptive {
            resource.check()?;
        }
        for container in &self.containers {
            container.check()?;
        }
        Ok(())
    }
}

// ============================================================================
// Context
// ============================================================================

/// What a running process may touch besides suspending
pub struct Context<'a, W, M> {
    pid: Pid,
    core: &'a mut Core<M>,
    world: &'a mut W,
}

impl<W, M: fmt::Debug> Context<'_, W, M> {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn now(&self) -> SimTime {
        self.core.queue.now()
    }

    pub fn world(&mut self) -> &mut W {
        &mut *self.world
    }

    /// Release a held lock, handing it to the next waiter
    pub fn release(&mut self, resource: impl Into<ResourceRef>) -> Result<(), KernelError> {
        self.core.release(self.pid, resource.into())
    }

    pub fn holds(&self, resource: impl Into<ResourceRef>) -> bool {
        let resource = resource.into();
        self.core
            .slots
            .get(self.pid.index())
            .is_some_and(|slot| slot.held.contains(&resource))
    }

    pub fn level(&self, id: ContainerId) -> Result<f64, KernelError> {
        self.core
            .containers
            .get(id.0)
            .map(Container::level)
            .ok_or(KernelError::UnknownResource {
                kind: "container",
                index: id.0,
            })
    }

    /// Claim an interruption that arrived while this process was already
    /// scheduled. Unclaimed ones are delivered at the next suspension.
    pub fn take_interruption(&mut self) -> Option<Interruption> {
        self.core
            .slots
            .get_mut(self.pid.index())
            .and_then(|slot| slot.deferred.pop_front())
    }

    /// Publish on a store; never blocks
    pub fn send(&mut self, id: StoreId, item: M) -> Result<(), KernelError> {
        match self.core.store(id)?.put(item) {
            Some((receiver, item)) => self.core.wake(receiver, Wake::Received(item)),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Kernel
// ============================================================================

/// Event queue, clock, resources and the processes they schedule
pub struct Kernel<P: Process> {
    core: Core<P::Message>,
    processes: Vec<Option<P>>,
    halted: bool,
    resumptions: u64,
}

impl<P: Process> Default for Kernel<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Process> Kernel<P> {
    pub fn new() -> Self {
        Self {
            core: Core {
                queue: EventQueue::new(),
                slots: Vec::new(),
                mutexes: Vec::new(),
                preemptive: Vec::new(),
                containers: Vec::new(),
                stores: Vec::new(),
            },
            processes: Vec::new(),
            halted: false,
            resumptions: 0,
        }
    }

    pub fn now(&self) -> SimTime {
        self.core.queue.now()
    }

    pub fn add_mutex(&mut self, name: &str, capacity: usize) -> Result<MutexId, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::invalid(
                "mutex capacity",
                format!("{name} needs capacity > 0"),
            ));
        }
        self.core.mutexes.push(MutexResource::new(name, capacity));
        Ok(MutexId(self.core.mutexes.len() - 1))
    }

    pub fn add_preemptive(
        &mut self,
        name: &str,
        capacity: usize,
    ) -> Result<PreemptiveId, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::invalid(
                "preemptive capacity",
                format!("{name} needs capacity > 0"),
            ));
        }
        self.core
            .preemptive
            .push(PreemptiveResource::new(name, capacity));
        Ok(PreemptiveId(self.core.preemptive.len() - 1))
    }

    pub fn add_container(
        &mut self,
        name: &str,
        capacity: f64,
        level: f64,
    ) -> Result<ContainerId, ConfigError> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(ConfigError::invalid(
                "container capacity",
                format!("{name} needs a positive capacity, got {capacity}"),
            ));
        }
        if !(0.0..=capacity).contains(&level) {
            return Err(ConfigError::invalid(
                "container level",
                format!("{name} level {level} outside [0, {capacity}]"),
            ));
        }
        let index = self.core.containers.len();
        self.core
            .containers
            .push(Container::new(index, name, capacity, level));
        Ok(ContainerId(index))
    }

    pub fn add_store(&mut self, name: &str) -> StoreId {
        self.core.stores.push(Store::new(name));
        StoreId(self.core.stores.len() - 1)
    }

    /// Register a process; it first runs at the current instant with `Wake::Start`
    pub fn spawn(&mut self, process: P) -> Result<Pid, KernelError> {
        if self.halted {
            return Err(KernelError::Halted);
        }
        let pid = Pid(self.processes.len() as u32);
        let now = self.now();
        self.core.queue.schedule_at(
            now,
            Delivery {
                pid,
                generation: 0,
                wake: Wake::Start,
            },
        )?;
        self.core.slots.push(Slot {
            generation: 0,
            wait: Wait::Ready,
            held: Vec::new(),
            deferred: VecDeque::new(),
        });
        debug!("Kernel: spawned {} as {} at {}", process.label(), pid, now);
        self.processes.push(Some(process));
        Ok(pid)
    }

    /// Process every event up to and including `horizon`, then park the clock there
    pub fn run_until(
        &mut self,
        world: &mut P::World,
        horizon: SimTime,
    ) -> Result<RunOutcome, KernelError> {
        if self.halted {
            return Err(KernelError::Halted);
        }
        if !horizon.is_finite() || horizon < self.now() {
            return Err(KernelError::TimeTravel {
                at: horizon.as_secs(),
                now: self.now().as_secs(),
            });
        }

        loop {
            let outcome = match self.core.queue.peek_time() {
                Some(time) if time <= horizon => None,
                Some(_) => Some(RunOutcome::HorizonReached),
                None => Some(RunOutcome::Drained),
            };
            if let Some(outcome) = outcome {
                self.core.queue.advance_to(horizon)?;
                return Ok(outcome);
            }
            if let Err(err) = self.step(world) {
                self.halted = true;
                warn!("Kernel: halted at {}: {}", self.now(), err);
                return Err(err);
            }
        }
    }

    fn step(&mut self, world: &mut P::World) -> Result<(), KernelError> {
        let Some(event) = self.core.queue.pop()? else {
            return Ok(());
        };
        let Delivery {
            pid,
            generation,
            wake,
        } = event.payload;

        let slot = self.core.slot(pid)?;
        if slot.generation != generation || slot.wait == Wait::Exited {
            trace!("Kernel: dropping stale wake-up for {}", pid);
            return Ok(());
        }
        slot.wait = Wait::Running;

        let mut process = self
            .processes
            .get_mut(pid.index())
            .and_then(Option::take)
            .ok_or(KernelError::UnknownProcess(pid.0))?;
        trace!(
            "Kernel: {} resuming {} {} with {:?}",
            event.time,
            process.label(),
            pid,
            wake
        );

        let step = {
            let mut cx = Context {
                pid,
                core: &mut self.core,
                world,
            };
            process.resume(&mut cx, wake)
        };
        self.resumptions += 1;
        let label = process.label();
        self.processes[pid.index()] = Some(process);

        if self.core.apply(pid, step?)? {
            debug!("Kernel: {} {} exited at {}", label, pid, event.time);
            self.processes[pid.index()] = None;
        }
        self.core.check_resources()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_alive(&self, pid: Pid) -> bool {
        self.processes
            .get(pid.index())
            .is_some_and(|process| process.is_some())
    }

    pub fn pending_events(&self) -> usize {
        self.core.queue.len()
    }

    /// Number of process resumptions so far
    pub fn resumptions(&self) -> u64 {
        self.resumptions
    }

    pub fn mutex(&self, id: MutexId) -> Option<&MutexResource> {
        self.core.mutexes.get(id.0)
    }

    pub fn preemptive(&self, id: PreemptiveId) -> Option<&PreemptiveResource> {
        self.core.preemptive.get(id.0)
    }

    pub fn container(&self, id: ContainerId) -> Option<&Container> {
        self.core.containers.get(id.0)
    }

    pub fn store(&self, id: StoreId) -> Option<&Store<P::Message>> {
        self.core.stores.get(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted process: records every wake-up, then runs its next ops
    enum Op {
        Step(Step),
        Release(ResourceRef),
        Send(StoreId, u32),
    }

    struct Script {
        name: &'static str,
        ops: VecDeque<Op>,
    }

    impl Script {
        fn new(name: &'static str, ops: Vec<Op>) -> Self {
            Self {
                name,
                ops: ops.into(),
            }
        }
    }

    type Trace = Vec<String>;

    impl Process for Script {
        type World = Trace;
        type Message = u32;

        fn resume(
            &mut self,
            cx: &mut Context<'_, Trace, u32>,
            wake: Wake<u32>,
        ) -> Result<Step, KernelError> {
            let what = match wake {
                Wake::Start => "start".to_string(),
                Wake::Timeout => "timeout".to_string(),
                Wake::Granted(_) => "granted".to_string(),
                Wake::Interrupted(_) => "interrupted".to_string(),
                Wake::Got { amount, .. } => format!("got {amount}"),
                Wake::Stored { amount, .. } => format!("stored {amount}"),
                Wake::Received(value) => format!("received {value}"),
            };
            let line = format!("{:.1} {} {}", cx.now().as_secs(), self.name, what);
            cx.world().push(line);

            while let Some(op) = self.ops.pop_front() {
                match op {
                    Op::Step(step) => return Ok(step),
                    Op::Release(resource) => cx.release(resource)?,
                    Op::Send(store, value) => cx.send(store, value)?,
                }
            }
            Ok(Step::Exit)
        }
    }

    fn run(kernel: &mut Kernel<Script>, horizon: f64) -> Trace {
        let mut trace = Trace::new();
        kernel
            .run_until(&mut trace, SimTime::from_secs(horizon))
            .unwrap();
        trace
    }

    #[test]
    fn test_same_instant_mutex_requests_are_fifo() {
        let mut kernel = Kernel::new();
        let lock = kernel.add_mutex("job", 1).unwrap();
        for name in ["A", "B"] {
            kernel
                .spawn(Script::new(
                    name,
                    vec![
                        Op::Step(Step::Acquire(lock)),
                        Op::Step(Step::Timeout(1.0)),
                        Op::Release(lock.into()),
                    ],
                ))
                .unwrap();
        }

        let trace = run(&mut kernel, 10.0);
        assert_eq!(
            trace,
            vec![
                "0.0 A start",
                "0.0 B start",
                "0.0 A granted",
                "1.0 A timeout",
                "1.0 B granted",
                "2.0 B timeout",
            ]
        );
    }

    #[test]
    fn test_exit_releases_held_locks() {
        let mut kernel = Kernel::new();
        let lock = kernel.add_mutex("job", 1).unwrap();
        kernel
            .spawn(Script::new(
                "holder",
                vec![Op::Step(Step::Acquire(lock)), Op::Step(Step::Timeout(0.5))],
            ))
            .unwrap();
        kernel
            .spawn(Script::new("waiter", vec![Op::Step(Step::Acquire(lock))]))
            .unwrap();

        let trace = run(&mut kernel, 5.0);
        assert_eq!(trace.last().unwrap(), "0.5 waiter granted");
        assert!(kernel.mutex(lock).unwrap().holders().is_empty());
    }

    #[test]
    fn test_negative_delay_halts_the_kernel() {
        let mut kernel = Kernel::new();
        kernel
            .spawn(Script::new(
                "bad",
                vec![Op::Step(Step::Timeout(1.0)), Op::Step(Step::Timeout(-1.0))],
            ))
            .unwrap();

        let mut trace = Trace::new();
        let err = kernel
            .run_until(&mut trace, SimTime::from_secs(5.0))
            .unwrap_err();
        assert!(matches!(err, KernelError::NegativeDelay { .. }));
        assert!(kernel.is_halted());
        assert_eq!(trace.len(), 2);
        assert_eq!(
            kernel.run_until(&mut trace, SimTime::from_secs(6.0)),
            Err(KernelError::Halted)
        );
    }

    #[test]
    fn test_release_without_holding_is_fatal() {
        let mut kernel = Kernel::new();
        let lock = kernel.add_mutex("job", 1).unwrap();
        kernel
            .spawn(Script::new("stranger", vec![Op::Release(lock.into())]))
            .unwrap();
        let mut trace = Trace::new();
        assert!(matches!(
            kernel.run_until(&mut trace, SimTime::from_secs(1.0)),
            Err(KernelError::NotHolder { .. })
        ));
    }

    #[test]
    fn test_preemption_interrupts_timeout() {
        let mut kernel = Kernel::new();
        let rail = kernel.add_preemptive("power", 1).unwrap();
        kernel
            .spawn(Script::new(
                "low",
                vec![
                    Op::Step(Step::AcquirePreemptive {
                        resource: rail,
                        priority: 1,
                    }),
                    Op::Step(Step::Timeout(10.0)),
                    // After the interruption: retry
                    Op::Step(Step::AcquirePreemptive {
                        resource: rail,
                        priority: 1,
                    }),
                    Op::Step(Step::Timeout(1.0)),
                ],
            ))
            .unwrap();
        kernel
            .spawn(Script::new(
                "high",
                vec![
                    Op::Step(Step::Timeout(2.0)),
                    Op::Step(Step::AcquirePreemptive {
                        resource: rail,
                        priority: 0,
                    }),
                    Op::Step(Step::Timeout(3.0)),
                    Op::Release(rail.into()),
                ],
            ))
            .unwrap();

        let trace = run(&mut kernel, 20.0);
        assert_eq!(
            trace,
            vec![
                "0.0 low start",
                "0.0 high start",
                "0.0 low granted",
                "2.0 high timeout",
                "2.0 high granted",
                "2.0 low interrupted",
                "5.0 high timeout",
                "5.0 low granted",
                "6.0 low timeout",
            ]
        );
        assert!(kernel.preemptive(rail).unwrap().holders().is_empty());
    }

    #[test]
    fn test_interruption_of_ready_process_is_deferred() {
        let mut kernel = Kernel::new();
        let rail = kernel.add_preemptive("power", 1).unwrap();
        kernel
            .spawn(Script::new(
                "low",
                vec![
                    Op::Step(Step::Timeout(2.0)),
                    Op::Step(Step::AcquirePreemptive {
                        resource: rail,
                        priority: 1,
                    }),
                    Op::Step(Step::Timeout(10.0)),
                ],
            ))
            .unwrap();
        kernel
            .spawn(Script::new(
                "high",
                vec![
                    Op::Step(Step::Timeout(2.0)),
                    Op::Step(Step::AcquirePreemptive {
                        resource: rail,
                        priority: 0,
                    }),
                    Op::Step(Step::Timeout(3.0)),
                ],
            ))
            .unwrap();

        let trace = run(&mut kernel, 20.0);
        assert_eq!(
            trace,
            vec![
                "0.0 low start",
                "0.0 high start",
                "2.0 low timeout",
                "2.0 high timeout",
                "2.0 low granted",
                "2.0 high granted",
                "2.0 low interrupted",
                "5.0 high timeout",
            ]
        );
        assert!(kernel.preemptive(rail).unwrap().holders().is_empty());
    }

    #[test]
    fn test_container_get_blocks_until_put() {
        let mut kernel = Kernel::new();
        let tank = kernel.add_container("filament", 10.0, 0.0).unwrap();
        kernel
            .spawn(Script::new(
                "consumer",
                vec![Op::Step(Step::Get {
                    container: tank,
                    amount: 4.0,
                })],
            ))
            .unwrap();
        kernel
            .spawn(Script::new(
                "producer",
                vec![
                    Op::Step(Step::Timeout(3.0)),
                    Op::Step(Step::Put {
                        container: tank,
                        amount: 6.0,
                    }),
                ],
            ))
            .unwrap();

        let trace = run(&mut kernel, 10.0);
        assert!(trace.contains(&"3.0 consumer got 4".to_string()));
        assert!(trace.contains(&"3.0 producer stored 6".to_string()));
        assert_eq!(kernel.container(tank).unwrap().level(), 2.0);
    }

    #[test]
    fn test_store_receive_blocks_until_send() {
        let mut kernel = Kernel::new();
        let bus = kernel.add_store("bus");
        kernel
            .spawn(Script::new(
                "listener",
                vec![Op::Step(Step::Receive(bus)), Op::Step(Step::Receive(bus))],
            ))
            .unwrap();
        kernel
            .spawn(Script::new(
                "sender",
                vec![
                    Op::Step(Step::Timeout(1.0)),
                    Op::Send(bus, 7),
                    Op::Send(bus, 8),
                ],
            ))
            .unwrap();

        let trace = run(&mut kernel, 10.0);
        assert_eq!(
            &trace[2..],
            &["1.0 sender timeout", "1.0 listener received 7", "1.0 listener received 8"]
        );
    }

    #[test]
    fn test_run_until_reports_drain_and_parks_clock() {
        let mut kernel: Kernel<Script> = Kernel::new();
        kernel
            .spawn(Script::new("once", vec![Op::Step(Step::Timeout(1.0))]))
            .unwrap();
        let mut trace = Trace::new();
        assert_eq!(
            kernel.run_until(&mut trace, SimTime::from_secs(0.5)),
            Ok(RunOutcome::HorizonReached)
        );
        assert_eq!(kernel.now(), SimTime::from_secs(0.5));
        assert_eq!(
            kernel.run_until(&mut trace, SimTime::from_secs(4.0)),
            Ok(RunOutcome::Drained)
        );
        assert_eq!(kernel.now(), SimTime::from_secs(4.0));
        assert!(kernel.run_until(&mut trace, SimTime::from_secs(1.0)).is_err());
        // A bad horizon is a caller error, not a kernel fault
        assert!(!kernel.is_halted());
    }

    #[test]
    fn test_zero_capacity_is_a_config_error() {
        let mut kernel: Kernel<Script> = Kernel::new();
        assert!(kernel.add_mutex("none", 0).is_err());
        assert!(kernel.add_container("tank", 5.0, 6.0).is_err());
    }
}
