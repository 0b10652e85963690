//! In-process simulator backend.
//!
//! [`ModelSim`] implements [`SimIf`] over a flat bank of signals and a behavioral
//! [`DutModel`]. Each time step is processed in this order:
//!
//! 1. next-time-step callbacks registered in an earlier step
//! 2. timer callbacks due at the current time
//! 3. settle: delta cycles of committing pending writes, clocking the model on a rising edge of
//!    its clock (the model samples the values from before the edge), evaluating its outputs and
//!    firing edge callbacks; read-write callbacks fire once nothing changes anymore
//! 4. read-only callbacks
//!
//! after which time advances to the earliest registered timer.

mod or_unit;

pub use or_unit::{OrUnit, RESULT_ADDRESS, WRITE_ADDRESS_A, WRITE_ADDRESS_B};

use intmap::IntMap;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::config::TbConfig;
use crate::error::TbError;
use crate::signal::{ObjectKind, SimObject};
use crate::sim_if::{SimIf, SIM_IF};
use crate::test::{TbTests, TestOutcome};
use crate::trigger::{self, EdgeKind};
use crate::SimpleResult;

const SIM_PRECISION: i8 = -12;
const MAX_DELTAS: usize = 1000;
const ROOT_HANDLE: usize = 0;

/// A named port of a [`DutModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    pub name: &'static str,
    pub width: u32,
}

impl Port {
    pub const fn new(name: &'static str, width: u32) -> Self {
        Self { name, width }
    }
}

/// Behavioral description of a clocked design.
pub trait DutModel {
    /// Name of the top level scope.
    fn name(&self) -> &str;
    fn ports(&self) -> Vec<Port>;
    /// Port whose rising edge calls [`posedge`](DutModel::posedge).
    fn clock(&self) -> &str;
    /// Register update. `ports` holds the values from before the clock edge.
    fn posedge(&mut self, ports: &Ports<'_>);
    /// Drive outputs from the current state and inputs.
    fn eval(&self, ports: &mut PortsMut<'_>);
}

/// Read access to the port values of a model.
pub struct Ports<'a> {
    index: &'a FxHashMap<String, usize>,
    values: &'a [u32],
}

impl Ports<'_> {
    pub fn get(&self, name: &str) -> u32 {
        self.index.get(name).map_or(0, |&i| self.values[i])
    }
}

/// Read/write access to the port values of a model.
pub struct PortsMut<'a> {
    index: &'a FxHashMap<String, usize>,
    widths: &'a [u32],
    values: &'a mut [u32],
}

impl PortsMut<'_> {
    pub fn get(&self, name: &str) -> u32 {
        self.index.get(name).map_or(0, |&i| self.values[i])
    }
    pub fn set(&mut self, name: &str, value: u32) {
        if let Some(&i) = self.index.get(name) {
            self.values[i] = value & width_mask(self.widths[i]);
        }
    }
}

fn width_mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

fn edge_kind(before: u32, after: u32) -> EdgeKind {
    match (before & 1, after & 1) {
        (0, 1) => EdgeKind::Rising,
        (1, 0) => EdgeKind::Falling,
        _ => EdgeKind::Any,
    }
}

struct SignalBank {
    index: FxHashMap<String, usize>,
    names: Vec<String>,
    widths: Vec<u32>,
    values: Vec<u32>,
}

enum CbKind {
    Time(u64),
    Edge(usize),
    ReadOnly,
    ReadWrite,
    NextStep,
}

struct Callbacks {
    next_handle: usize,
    kinds: IntMap<CbKind>,
    // key is absolute time
    timers: BTreeMap<u64, Vec<usize>>,
    // signal handle -> callback handle
    edges: FxHashMap<usize, usize>,
    read_only: Option<usize>,
    read_write: Option<usize>,
    next_step: Option<usize>,
}

impl Callbacks {
    fn new() -> Self {
        Self {
            next_handle: 0,
            kinds: IntMap::new(),
            timers: BTreeMap::new(),
            edges: FxHashMap::default(),
            read_only: None,
            read_write: None,
            next_step: None,
        }
    }

    fn add(&mut self, kind: CbKind) -> usize {
        self.next_handle += 1;
        let handle = self.next_handle;
        self.kinds.insert(handle as u64, kind);
        handle
    }

    fn take_sync(slot: &mut Option<usize>, kinds: &mut IntMap<CbKind>) -> bool {
        match slot.take() {
            Some(handle) => {
                kinds.remove(handle as u64);
                true
            }
            None => false,
        }
    }
}

struct Kernel {
    time: u64,
    bank: SignalBank,
    pending: Vec<(usize, u32)>,
    needs_eval: bool,
    clock: Option<usize>,
    callbacks: Callbacks,
}

pub struct ModelSim {
    name: String,
    kernel: RefCell<Kernel>,
    dut: RefCell<Box<dyn DutModel>>,
}

impl std::fmt::Debug for ModelSim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSim")
            .field("name", &self.name)
            .field("time", &self.kernel.borrow().time)
            .finish()
    }
}

impl ModelSim {
    pub fn new(dut: Box<dyn DutModel>) -> Self {
        let ports = dut.ports();
        let mut index = FxHashMap::default();
        for (i, port) in ports.iter().enumerate() {
            index.insert(port.name.to_string(), i);
        }
        let clock = index.get(dut.clock()).copied();
        let bank = SignalBank {
            index,
            names: ports.iter().map(|p| p.name.to_string()).collect(),
            widths: ports.iter().map(|p| p.width).collect(),
            values: vec![0; ports.len()],
        };
        Self {
            name: dut.name().to_string(),
            kernel: RefCell::new(Kernel {
                time: 0,
                bank,
                pending: Vec::new(),
                needs_eval: true,
                clock,
                callbacks: Callbacks::new(),
            }),
            dut: RefCell::new(dut),
        }
    }

    fn signal_index(&self, obj: &SimObject) -> SimpleResult<usize> {
        let len = self.kernel.borrow().bank.values.len();
        match obj.handle {
            h if h > ROOT_HANDLE && h <= len => Ok(h - 1),
            h => Err(TbError::ObjectNotFound(format!("#{}", h))),
        }
    }

    /// Run until no callback is registered anymore.
    pub fn run(&self) {
        loop {
            let now = self.kernel.borrow().time;
            if self.take_timers(now) {
                trigger::react_time(now);
            }
            self.settle();
            if self.take_read_only() {
                trigger::react_ro();
                if !self.kernel.borrow().pending.is_empty() {
                    self.warn("Values written in the read-only phase, applying them in a new delta cycle");
                    self.settle();
                }
            }
            match self.next_time() {
                Some(t) => self.kernel.borrow_mut().time = t,
                None => break,
            }
            if self.take_next_step() {
                trigger::react_next_step();
            }
        }
    }

    fn take_next_step(&self) -> bool {
        let mut k = self.kernel.borrow_mut();
        let cb = &mut k.callbacks;
        Callbacks::take_sync(&mut cb.next_step, &mut cb.kinds)
    }

    fn take_read_only(&self) -> bool {
        let mut k = self.kernel.borrow_mut();
        let cb = &mut k.callbacks;
        Callbacks::take_sync(&mut cb.read_only, &mut cb.kinds)
    }

    fn take_read_write(&self) -> bool {
        let mut k = self.kernel.borrow_mut();
        let cb = &mut k.callbacks;
        Callbacks::take_sync(&mut cb.read_write, &mut cb.kinds)
    }

    fn take_timers(&self, now: u64) -> bool {
        let mut k = self.kernel.borrow_mut();
        let cb = &mut k.callbacks;
        match cb.timers.remove(&now) {
            Some(handles) => {
                for handle in handles {
                    cb.kinds.remove(handle as u64);
                }
                true
            }
            None => false,
        }
    }

    fn next_time(&self) -> Option<u64> {
        let k = self.kernel.borrow();
        let cb = &k.callbacks;
        match cb.timers.keys().next() {
            Some(&t) => Some(t),
            None if cb.next_step.is_some()
                || cb.read_only.is_some()
                || cb.read_write.is_some() =>
            {
                Some(k.time + 1)
            }
            None => None,
        }
    }

    fn settle(&self) {
        for _ in 0..MAX_DELTAS {
            let changes = self.commit();
            if changes.is_empty() {
                if self.take_read_write() {
                    trigger::react_rw();
                    continue;
                }
                return;
            }
            // only callbacks registered before the change see it
            let armed: Vec<(usize, EdgeKind)> = {
                let k = self.kernel.borrow();
                changes
                    .into_iter()
                    .filter(|(handle, _)| k.callbacks.edges.contains_key(handle))
                    .collect()
            };
            for (handle, edge) in armed {
                trigger::react_edge(handle, edge);
            }
        }
        self.warn(&format!(
            "Signals did not settle within {} delta cycles",
            MAX_DELTAS
        ));
    }

    /// Apply pending writes, clock and evaluate the model. Returns the changed signals.
    fn commit(&self) -> Vec<(usize, EdgeKind)> {
        let mut guard = self.kernel.borrow_mut();
        let k = &mut *guard;
        if k.pending.is_empty() && !k.needs_eval {
            return Vec::new();
        }
        k.needs_eval = false;
        let before = k.bank.values.clone();
        for (i, value) in k.pending.drain(..) {
            k.bank.values[i] = value & width_mask(k.bank.widths[i]);
        }

        let mut dut = self.dut.borrow_mut();
        if let Some(clk) = k.clock {
            if edge_kind(before[clk], k.bank.values[clk]) == EdgeKind::Rising {
                dut.posedge(&Ports {
                    index: &k.bank.index,
                    values: &before,
                });
            }
        }
        dut.eval(&mut PortsMut {
            index: &k.bank.index,
            widths: &k.bank.widths,
            values: &mut k.bank.values,
        });

        before
            .iter()
            .zip(k.bank.values.iter())
            .enumerate()
            .filter(|(_, (b, a))| b != a)
            .map(|(i, (&b, &a))| (i + 1, edge_kind(b, a)))
            .collect()
    }
}

impl SimIf for ModelSim {
    fn set_value(&self, obj: &SimObject, value: u32) -> SimpleResult<()> {
        let i = self.signal_index(obj)?;
        self.kernel.borrow_mut().pending.push((i, value));
        Ok(())
    }
    fn get_value(&self, obj: &SimObject) -> SimpleResult<u32> {
        let i = self.signal_index(obj)?;
        Ok(self.kernel.borrow().bank.values[i])
    }
    fn get_object_by_name(&self, name: &str) -> SimpleResult<SimObject> {
        if name == self.name {
            return Ok(SimObject::new(ROOT_HANDLE, ObjectKind::Hier));
        }
        let k = self.kernel.borrow();
        name.strip_prefix(self.name.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|port| k.bank.index.get(port))
            .map(|&i| SimObject::new(i + 1, ObjectKind::Int(k.bank.widths[i])))
            .ok_or_else(|| TbError::ObjectNotFound(name.to_string()))
    }
    fn get_full_name(&self, obj: &SimObject) -> SimpleResult<String> {
        if obj.handle == ROOT_HANDLE {
            return Ok(self.name.clone());
        }
        let i = self.signal_index(obj)?;
        Ok(format!("{}.{}", self.name, self.kernel.borrow().bank.names[i]))
    }
    fn get_root_object(&self) -> SimpleResult<SimObject> {
        Ok(SimObject::new(ROOT_HANDLE, ObjectKind::Hier))
    }
    fn get_sim_time_steps(&self) -> u64 {
        self.kernel.borrow().time
    }
    fn get_sim_precision(&self) -> i8 {
        SIM_PRECISION
    }
    fn register_callback_rw(&self) -> SimpleResult<usize> {
        let mut k = self.kernel.borrow_mut();
        let handle = k.callbacks.add(CbKind::ReadWrite);
        k.callbacks.read_write = Some(handle);
        Ok(handle)
    }
    fn register_callback_ro(&self) -> SimpleResult<usize> {
        let mut k = self.kernel.borrow_mut();
        let handle = k.callbacks.add(CbKind::ReadOnly);
        k.callbacks.read_only = Some(handle);
        Ok(handle)
    }
    fn register_callback_next_step(&self) -> SimpleResult<usize> {
        let mut k = self.kernel.borrow_mut();
        let handle = k.callbacks.add(CbKind::NextStep);
        k.callbacks.next_step = Some(handle);
        Ok(handle)
    }
    fn register_callback_time(&self, t: u64) -> SimpleResult<usize> {
        let mut k = self.kernel.borrow_mut();
        let t_abs = k.time + t.max(1);
        let handle = k.callbacks.add(CbKind::Time(t_abs));
        k.callbacks.timers.entry(t_abs).or_default().push(handle);
        Ok(handle)
    }
    fn register_callback_edge(&self, sig_hdl: usize) -> SimpleResult<usize> {
        self.signal_index(&SimObject::new(sig_hdl, ObjectKind::Int(1)))?;
        let mut k = self.kernel.borrow_mut();
        let handle = k.callbacks.add(CbKind::Edge(sig_hdl));
        if let Some(old) = k.callbacks.edges.insert(sig_hdl, handle) {
            k.callbacks.kinds.remove(old as u64);
        }
        Ok(handle)
    }
    fn cancel_callback(&self, cb_hdl: usize) -> SimpleResult<()> {
        let mut k = self.kernel.borrow_mut();
        let cb = &mut k.callbacks;
        let kind = cb
            .kinds
            .remove(cb_hdl as u64)
            .ok_or(TbError::UnknownCallback(cb_hdl))?;
        match kind {
            CbKind::Time(t_abs) => {
                if let Some(handles) = cb.timers.get_mut(&t_abs) {
                    handles.retain(|&h| h != cb_hdl);
                    if handles.is_empty() {
                        cb.timers.remove(&t_abs);
                    }
                }
            }
            CbKind::Edge(sig_hdl) => {
                if cb.edges.get(&sig_hdl) == Some(&cb_hdl) {
                    cb.edges.remove(&sig_hdl);
                }
            }
            CbKind::ReadOnly => cb.read_only = None,
            CbKind::ReadWrite => cb.read_write = None,
            CbKind::NextStep => cb.next_step = None,
        }
        Ok(())
    }
}

/// Run `tests` against `dut` on the in-process kernel of this thread.
pub fn model_init(
    dut: impl DutModel + 'static,
    tests: TbTests,
    config: &TbConfig,
) -> SimpleResult<Vec<TestOutcome>> {
    let sim = Rc::new(ModelSim::new(Box::new(dut)));
    SIM_IF.install(sim.clone());
    let result = crate::start_of_simulation(tests, config).and_then(|()| {
        sim.run();
        crate::end_of_simulation(config)
    });
    SIM_IF.uninstall();
    result
}

#[macro_export]
macro_rules! run_with_model {
    ($dut:expr, $( $i:ident ),+) => {
        fn main() -> std::process::ExitCode {
            $crate::logging::init();
            let _ = $crate::CRATE_NAME.set(std::module_path!().to_string());
            let config = match $crate::config::TbConfig::from_env() {
                Ok(config) => config,
                Err(e) => {
                    $crate::sim_if::SIM_IF.warn(&format!("Invalid configuration: {}", e));
                    return std::process::ExitCode::FAILURE;
                }
            };
            // add tests to execution vector
            let mut tests = $crate::prelude::TbTests::new();
            $(tests.push($crate::prelude::Test::new(stringify!($i), |sim_root| {
                $crate::prelude::FutureExt::boxed($i(sim_root))
            }));)+

            match $crate::model::model_init($dut, tests, &config) {
                Ok(outcomes) if outcomes.iter().all(|o| o.passed) => std::process::ExitCode::SUCCESS,
                Ok(_) => std::process::ExitCode::FAILURE,
                Err(e) => {
                    $crate::sim_if::SIM_IF.warn(&format!("Simulation aborted: {}", e));
                    std::process::ExitCode::FAILURE
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor;
    use crate::prelude::*;
    use crate::testbench;
    use std::sync::{Arc, Mutex};

    /// Toggle flop: `q` inverts on every rising clock edge while `en` is set.
    struct Toggle {
        q: u32,
    }

    impl DutModel for Toggle {
        fn name(&self) -> &str {
            "toggle"
        }
        fn ports(&self) -> Vec<Port> {
            vec![Port::new("clk", 1), Port::new("en", 1), Port::new("q", 1)]
        }
        fn clock(&self) -> &str {
            "clk"
        }
        fn posedge(&mut self, ports: &Ports<'_>) {
            if ports.get("en") == 1 {
                self.q ^= 1;
            }
        }
        fn eval(&self, ports: &mut PortsMut<'_>) {
            ports.set("q", self.q);
        }
    }

    fn install_toggle() -> Rc<ModelSim> {
        let sim = Rc::new(ModelSim::new(Box::new(Toggle { q: 0 })));
        SIM_IF.install(sim.clone());
        crate::reset_kernel();
        sim
    }

    #[test]
    fn resolves_names() {
        let _sim = install_toggle();
        let root = SimObject::get_root().unwrap();
        assert_eq!(root.name().unwrap(), "toggle");
        let q = root.get_child("q").unwrap();
        assert_eq!(q.size(), Some(1));
        assert_eq!(q.name().unwrap(), "toggle.q");
        assert!(matches!(
            root.get_child("nope"),
            Err(TbError::ObjectNotFound(_))
        ));
        SIM_IF.uninstall();
    }

    async fn probe_toggle(samples: Arc<Mutex<Vec<u32>>>) -> TbResult {
        let root = SimObject::get_root()?;
        let clk = root.get_child("clk")?;
        let en = root.get_child("en")?;
        let q = root.get_child("q")?;
        Task::fork(testbench::clock(clk, 10, TimeUnit::Ns));
        en.set(1)?;
        for _ in 0..3 {
            clk.rising_edge().await?;
            // en written right after this edge only counts from the next edge on
            en.set(0)?;
            Trigger::read_only().await?;
            let value = q.get()?;
            samples.lock().unwrap().push(value);
            clk.falling_edge().await?;
            en.set(1)?;
        }
        trigger::cancel_all_triggers();
        Ok(Val::None)
    }

    async fn record_at(
        trigger: Trigger,
        label: &'static str,
        order: Arc<Mutex<Vec<(&'static str, u64)>>>,
    ) -> TbResult {
        trigger.await?;
        order.lock().unwrap().push((label, SIM_IF.get_sim_time_steps()));
        Ok(Val::None)
    }

    #[test]
    fn model_samples_values_from_before_the_edge() {
        let sim = install_toggle();
        let samples = Arc::new(Mutex::new(Vec::new()));
        Task::fork(probe_toggle(samples.clone()));
        executor::run_once();
        sim.run();
        assert_eq!(*samples.lock().unwrap(), vec![1, 0, 1]);
        SIM_IF.uninstall();
    }

    #[test]
    fn next_time_step_runs_before_timers() {
        let sim = install_toggle();
        let order = Arc::new(Mutex::new(Vec::new()));
        Task::fork(record_at(Trigger::timer(1, TimeUnit::Ns), "timer", order.clone()));
        Task::fork(record_at(Trigger::next_time_step(), "next", order.clone()));
        executor::run_once();
        sim.run();
        assert_eq!(
            *order.lock().unwrap(),
            vec![("next", 1000), ("timer", 1000)]
        );
        assert_eq!(trigger::pending_triggers(), 0);
        SIM_IF.uninstall();
    }

    async fn write_then_sync(en: SimObject, seen: Arc<Mutex<Vec<u32>>>) -> TbResult {
        Trigger::timer(2, TimeUnit::Ns).await?;
        en.set(1)?;
        seen.lock().unwrap().push(en.get()?);
        Trigger::read_write().await?;
        seen.lock().unwrap().push(en.get()?);
        Ok(Val::None)
    }

    #[test]
    fn read_write_sees_applied_writes_before_read_only() {
        let sim = install_toggle();
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let en = SimObject::from_name("toggle.en").unwrap();
        Task::fork(record_at(Trigger::read_only(), "ro", order.clone()));
        Task::fork(record_at(Trigger::read_write(), "rw", order.clone()));
        Task::fork(write_then_sync(en, seen.clone()));
        executor::run_once();
        sim.run();
        assert_eq!(*order.lock().unwrap(), vec![("rw", 0), ("ro", 0)]);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
        assert_eq!(sim.kernel.borrow().time, 2000);
        assert_eq!(trigger::pending_triggers(), 0);
        SIM_IF.uninstall();
    }

    #[test]
    fn timer_needs_exact_resolution() {
        let sim = install_toggle();
        let result = Arc::new(Mutex::new(None));
        let result2 = result.clone();
        Task::fork(async move {
            let r = Trigger::timer(1, TimeUnit::Fs).await;
            *result2.lock().unwrap() = Some(r);
            Ok(Val::None)
        });
        executor::run_once();
        sim.run();
        assert!(matches!(
            result.lock().unwrap().take(),
            Some(Err(TbError::TimeResolution { .. }))
        ));
        SIM_IF.uninstall();
    }

    #[test]
    fn cancelled_callbacks_are_forgotten() {
        let sim = install_toggle();
        let t = sim.register_callback_time(5).unwrap();
        let e = sim.register_callback_edge(1).unwrap();
        assert_eq!(sim.next_time(), Some(5));
        sim.cancel_callback(t).unwrap();
        sim.cancel_callback(e).unwrap();
        assert_eq!(sim.next_time(), None);
        assert!(matches!(
            sim.cancel_callback(t),
            Err(TbError::UnknownCallback(_))
        ));
        SIM_IF.uninstall();
    }
}
