use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use num_format::{Locale, ToFormattedString};

use crate::error::TbError;
use crate::signal::SimObject;
use crate::SimpleResult;

thread_local! {
    // One backend per simulation thread. Kept in an Rc so a call into the backend never
    // holds the RefCell borrow while the backend wakes tasks that call back in here.
    static BACKEND: RefCell<Option<Rc<dyn SimIf>>> = RefCell::new(None);
}

/// Entry point to the simulator interface installed on the current thread.
pub static SIM_IF: SimIfHandle = SimIfHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Fs,
    Ps,
    Ns,
    Us,
    Ms,
    Sec,
}

impl TimeUnit {
    /// Power of ten of one unit in seconds.
    pub fn exponent(self) -> i8 {
        match self {
            TimeUnit::Fs => -15,
            TimeUnit::Ps => -12,
            TimeUnit::Ns => -9,
            TimeUnit::Us => -6,
            TimeUnit::Ms => -3,
            TimeUnit::Sec => 0,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeUnit::Fs => "fs",
            TimeUnit::Ps => "ps",
            TimeUnit::Ns => "ns",
            TimeUnit::Us => "us",
            TimeUnit::Ms => "ms",
            TimeUnit::Sec => "sec",
        };
        f.write_str(s)
    }
}

/// Everything the testbench needs from a simulator.
///
/// Callback registration mirrors what VPI offers: a timer relative to the current time,
/// value change on a signal, the read-write and read-only synchronisation points of the
/// current time step, and the start of the next time step. When a registered callback
/// fires, the backend calls the matching `trigger::react_*` function.
pub trait SimIf {
    fn set_value(&self, obj: &SimObject, value: u32) -> SimpleResult<()>;
    fn get_value(&self, obj: &SimObject) -> SimpleResult<u32>;
    fn get_object_by_name(&self, name: &str) -> SimpleResult<SimObject>;
    fn get_full_name(&self, obj: &SimObject) -> SimpleResult<String>;
    fn get_root_object(&self) -> SimpleResult<SimObject>;
    fn get_sim_time_steps(&self) -> u64;
    fn get_sim_precision(&self) -> i8;
    fn register_callback_rw(&self) -> SimpleResult<usize>;
    fn register_callback_ro(&self) -> SimpleResult<usize>;
    fn register_callback_next_step(&self) -> SimpleResult<usize>;
    fn register_callback_time(&self, t: u64) -> SimpleResult<usize>;
    fn register_callback_edge(&self, sig_hdl: usize) -> SimpleResult<usize>;
    fn cancel_callback(&self, cb_hdl: usize) -> SimpleResult<()>;

    fn get_sim_time(&self, unit: TimeUnit) -> f64 {
        // this function does not preserve precision, so don't use carelessly
        let t = self.get_sim_time_steps() as f64;
        ldexp10(t, self.get_sim_precision() - unit.exponent())
    }
    fn get_sim_steps(&self, time: u64, unit: TimeUnit) -> SimpleResult<u64> {
        let precision = self.get_sim_precision();
        let exp = unit.exponent() - precision;
        if exp >= 0 {
            Ok(time * 10_u64.pow(exp as u32))
        } else {
            let div = 10_u64.pow(-exp as u32);
            if time % div == 0 {
                Ok(time / div)
            } else {
                Err(TbError::TimeResolution {
                    time,
                    unit,
                    precision,
                })
            }
        }
    }
    fn log(&self, msg: &str) {
        tracing::info!("{} {}", format_time_ns(self.get_sim_time(TimeUnit::Ns)), msg);
    }
    fn warn(&self, msg: &str) {
        tracing::warn!("{} {}", format_time_ns(self.get_sim_time(TimeUnit::Ns)), msg);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SimIfHandle;

impl SimIfHandle {
    pub fn install(&self, backend: Rc<dyn SimIf>) {
        BACKEND.with(|b| b.borrow_mut().replace(backend));
    }

    pub fn uninstall(&self) {
        BACKEND.with(|b| b.borrow_mut().take());
    }

    fn backend(&self) -> Option<Rc<dyn SimIf>> {
        BACKEND.with(|b| b.borrow().clone())
    }

    /// Run `f` against the installed backend.
    pub fn with<R>(&self, f: impl FnOnce(&dyn SimIf) -> SimpleResult<R>) -> SimpleResult<R> {
        match self.backend() {
            Some(backend) => f(backend.as_ref()),
            None => Err(TbError::NoSimulator),
        }
    }

    pub fn get_sim_time_steps(&self) -> u64 {
        self.backend().map_or(0, |b| b.get_sim_time_steps())
    }

    pub fn get_sim_time(&self, unit: TimeUnit) -> f64 {
        self.backend().map_or(0.0, |b| b.get_sim_time(unit))
    }

    pub fn get_sim_steps(&self, time: u64, unit: TimeUnit) -> SimpleResult<u64> {
        self.with(|b| b.get_sim_steps(time, unit))
    }

    pub fn log(&self, msg: &str) {
        match self.backend() {
            Some(b) => b.log(msg),
            None => tracing::info!("{}", msg),
        }
    }

    pub fn warn(&self, msg: &str) {
        match self.backend() {
            Some(b) => b.warn(msg),
            None => tracing::warn!("{}", msg),
        }
    }
}

pub(crate) fn format_time_ns(t: f64) -> String {
    let int = t.floor() as u64;
    let mut frac_str = format!("{:.3}", t % 1.0);
    frac_str.remove(0);
    format!("{}{}ns", int.to_formatted_string(&Locale::en), frac_str)
}

fn ldexp10(frac: f64, exp: i8) -> f64 {
    // Like math.ldexp, but base 10
    if exp >= 0 {
        frac * 10_u64.pow(exp as u32) as f64
    } else {
        let div = 10_u64.pow(-exp as u32) as f64;
        frac / div
    }
}
