use intmap::IntMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use crate::executor;
use crate::sim_if::{TimeUnit, SIM_IF};
use crate::{signal::SimObject, value::Val, SimpleResult, TbResult};

// IntMap specializes on u64 keys and doesn't actually need to calculate a hash
thread_local! {
    // key is signal handle
    static EDGE_MAP: RefCell<IntMap<CallbackHandles>> = RefCell::new(IntMap::new());
    // key is absolute callback time
    static TIMER_MAP: RefCell<IntMap<CallbackHandles>> = RefCell::new(IntMap::new());
    static READ_ONLY: RefCell<CallbackHandles> = RefCell::new(CallbackHandles::default());
    static READ_WRITE: RefCell<CallbackHandles> = RefCell::new(CallbackHandles::default());
    static NEXT_STEP: RefCell<CallbackHandles> = RefCell::new(CallbackHandles::default());
}

#[derive(Default)]
struct CallbackHandles {
    handle: Option<usize>,
    callbacks: VecDeque<TrigShared>,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum EdgeKind {
    Any,
    Rising,
    Falling,
}

pub(crate) fn cancel_all_triggers() {
    // Wakers are dropped with the tables, so the tasks holding them are dropped as well.
    for slot in [&READ_ONLY, &READ_WRITE, &NEXT_STEP] {
        let handle = slot.with(|s| {
            let mut s = s.borrow_mut();
            s.callbacks.clear();
            s.handle.take()
        });
        if let Some(handle) = handle {
            cancel_callback(handle);
        }
    }
    for map in [&TIMER_MAP, &EDGE_MAP] {
        let drained: Vec<CallbackHandles> =
            map.with(|m| m.borrow_mut().drain().map(|(_, cb)| cb).collect());
        for cb in drained.into_iter().filter_map(|cb| cb.handle) {
            cancel_callback(cb);
        }
    }
}

fn cancel_callback(handle: usize) {
    if let Err(e) = SIM_IF.with(|sim| sim.cancel_callback(handle)) {
        tracing::debug!("Could not cancel callback {}: {}", handle, e);
    }
}

#[derive(Debug, Clone)]
struct TrigShared {
    waker: Waker,
    // If trigger is an edge, the react method needs to know if it is a rising or falling edge
    // so an existing callback does not have to be rescheduled.
    edge_kind: EdgeKind,
}

#[derive(Clone, Copy, Debug)]
enum TrigKind {
    Edge(usize, EdgeKind),
    Timer(u64, TimeUnit),
    ReadWrite,
    ReadOnly,
    NextTimeStep,
}

/// A simulator event that can be awaited exactly once.
#[derive(Clone, Debug)]
pub struct Trigger {
    kind: TrigKind,
    awaited: bool,
}

impl Trigger {
    fn new(kind: TrigKind) -> Self {
        Trigger {
            kind,
            awaited: false,
        }
    }
    pub fn timer(time: u64, unit: TimeUnit) -> Self {
        Trigger::new(TrigKind::Timer(time, unit))
    }
    pub fn edge(signal: SimObject) -> Self {
        Trigger::new(TrigKind::Edge(signal.handle(), EdgeKind::Any))
    }
    pub fn rising_edge(signal: SimObject) -> Self {
        Trigger::new(TrigKind::Edge(signal.handle(), EdgeKind::Rising))
    }
    pub fn falling_edge(signal: SimObject) -> Self {
        Trigger::new(TrigKind::Edge(signal.handle(), EdgeKind::Falling))
    }
    /// Fires once values written in the current time step have been applied.
    pub fn read_write() -> Self {
        Trigger::new(TrigKind::ReadWrite)
    }
    /// Fires at the end of the current time step when all signals have settled.
    pub fn read_only() -> Self {
        Trigger::new(TrigKind::ReadOnly)
    }
    /// Fires at the start of the next time step, before any timer of that step.
    pub fn next_time_step() -> Self {
        Trigger::new(TrigKind::NextTimeStep)
    }

    fn register(&self, shared: TrigShared) -> SimpleResult<()> {
        match self.kind {
            TrigKind::ReadWrite => {
                register_sync(&READ_WRITE, shared, || SIM_IF.with(|s| s.register_callback_rw()))
            }
            TrigKind::ReadOnly => {
                register_sync(&READ_ONLY, shared, || SIM_IF.with(|s| s.register_callback_ro()))
            }
            TrigKind::NextTimeStep => register_sync(&NEXT_STEP, shared, || {
                SIM_IF.with(|s| s.register_callback_next_step())
            }),
            TrigKind::Timer(time, unit) => {
                let steps = SIM_IF.get_sim_steps(time, unit)?;
                register_timer(steps, shared)
            }
            TrigKind::Edge(sig_hdl, edge_kind) => {
                let shared = TrigShared { edge_kind, ..shared };
                let appended = EDGE_MAP.with(|m| {
                    if let Some(callbacks) = m.borrow_mut().get_mut(sig_hdl as u64) {
                        callbacks.callbacks.push_back(shared.clone());
                        true
                    } else {
                        false
                    }
                });
                if !appended {
                    let handle = SIM_IF.with(|s| s.register_callback_edge(sig_hdl))?;
                    EDGE_MAP.with(|m| {
                        m.borrow_mut().insert(
                            sig_hdl as u64,
                            CallbackHandles {
                                handle: Some(handle),
                                callbacks: VecDeque::from([shared]),
                            },
                        )
                    });
                }
                Ok(())
            }
        }
    }
}

fn register_sync(
    slot: &'static std::thread::LocalKey<RefCell<CallbackHandles>>,
    shared: TrigShared,
    register: impl FnOnce() -> SimpleResult<usize>,
) -> SimpleResult<()> {
    let needs_handle = slot.with(|s| {
        let mut s = s.borrow_mut();
        s.callbacks.push_back(shared);
        s.handle.is_none()
    });
    if needs_handle {
        let handle = register()?;
        slot.with(|s| s.borrow_mut().handle.replace(handle));
    }
    Ok(())
}

fn register_timer(steps: u64, shared: TrigShared) -> SimpleResult<()> {
    // a zero delay would land in the time step that is already being processed
    let steps = steps.max(1);
    // Add current time to key since the simulator reports back absolute time, not delta
    let abs_time = steps + SIM_IF.get_sim_time_steps();
    let appended = TIMER_MAP.with(|m| {
        if let Some(callbacks) = m.borrow_mut().get_mut(abs_time) {
            callbacks.callbacks.push_back(shared.clone());
            true
        } else {
            false
        }
    });
    if !appended {
        let handle = SIM_IF.with(|s| s.register_callback_time(steps))?;
        TIMER_MAP.with(|m| {
            m.borrow_mut().insert(
                abs_time,
                CallbackHandles {
                    handle: Some(handle),
                    callbacks: VecDeque::from([shared]),
                },
            )
        });
    }
    Ok(())
}

impl Future for Trigger {
    type Output = TbResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Trigger must only be awaited once, so the second time it is polled it must be because
        // the waker signaled its completion.
        if self.awaited {
            return Poll::Ready(Ok(Val::None));
        }
        self.awaited = true;
        let shared = TrigShared {
            waker: cx.waker().clone(),
            edge_kind: EdgeKind::Any,
        };
        match self.register(shared) {
            Ok(()) => Poll::Pending,
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

fn wake_all(callbacks: VecDeque<TrigShared>) {
    if callbacks.is_empty() {
        return;
    }
    for shared in callbacks {
        shared.waker.wake();
    }
    // execute woken tasks
    executor::run_once();
}

fn react_sync(slot: &'static std::thread::LocalKey<RefCell<CallbackHandles>>, name: &str) {
    let callbacks = slot.with(|s| {
        let mut s = s.borrow_mut();
        // remove handle, since CB is now done
        s.handle = None;
        std::mem::take(&mut s.callbacks)
    });
    if callbacks.is_empty() {
        tracing::debug!("Did not expect {} callback", name);
    }
    wake_all(callbacks);
}

pub fn react_rw() {
    react_sync(&READ_WRITE, "ReadWrite");
}

pub fn react_ro() {
    react_sync(&READ_ONLY, "ReadOnly");
}

pub fn react_next_step() {
    react_sync(&NEXT_STEP, "NextTimeStep");
}

pub fn react_time(t_abs: u64) {
    match TIMER_MAP.with(|m| m.borrow_mut().remove(t_abs)) {
        Some(callbacks) => wake_all(callbacks.callbacks),
        None => tracing::debug!("Did not expect Timer callback: t={}", t_abs),
    }
}

pub fn react_edge(sig_hdl: usize, edge: EdgeKind) {
    let Some(mut callbacks) = EDGE_MAP.with(|m| m.borrow_mut().remove(sig_hdl as u64)) else {
        tracing::debug!("Did not expect Edge callback: sig_hdl={}", sig_hdl);
        return;
    };
    let (wake, resched): (VecDeque<TrigShared>, VecDeque<TrigShared>) = callbacks
        .callbacks
        .drain(..)
        .partition(|trig| trig.edge_kind == EdgeKind::Any || trig.edge_kind == edge);
    if resched.is_empty() {
        // if no callbacks are remaining, cancel
        if let Some(handle) = callbacks.handle.take() {
            cancel_callback(handle);
        }
    } else {
        // put rescheduled callbacks back into EDGE_MAP
        callbacks.callbacks = resched;
        EDGE_MAP.with(|m| m.borrow_mut().insert(sig_hdl as u64, callbacks));
    }
    wake_all(wake);
}

/// Number of outstanding trigger registrations, used to check teardown.
pub fn pending_triggers() -> usize {
    let sync: usize = [&READ_ONLY, &READ_WRITE, &NEXT_STEP]
        .iter()
        .map(|slot| slot.with(|s| s.borrow().callbacks.len()))
        .sum();
    let maps: usize = [&TIMER_MAP, &EDGE_MAP]
        .iter()
        .map(|map| map.with(|m| m.borrow().len()))
        .sum();
    sync + maps
}
