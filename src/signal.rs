use rustc_hash::FxHashMap;
use std::cell::RefCell;

use crate::error::TbError;
use crate::sim_if::SIM_IF;
use crate::trigger::Trigger;
use crate::SimpleResult;

thread_local! {
    static SIG_MAP_NAME: RefCell<FxHashMap<String, SimObject>> = RefCell::new(FxHashMap::default());
}

pub(crate) fn clear_signal_cache() {
    SIG_MAP_NAME.with(|m| m.borrow_mut().clear());
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimObject {
    pub(crate) handle: usize,
    pub(crate) kind: ObjectKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Int(u32),
    Hier,
}

impl SimObject {
    pub fn new(handle: usize, kind: ObjectKind) -> Self {
        Self { handle, kind }
    }

    pub fn handle(&self) -> usize {
        self.handle
    }

    pub fn name(&self) -> SimpleResult<String> {
        SIM_IF.with(|sim| sim.get_full_name(self))
    }

    pub fn size(&self) -> Option<u32> {
        match self.kind {
            ObjectKind::Int(size) => Some(size),
            ObjectKind::Hier => None,
        }
    }

    pub fn has_value(&self) -> bool {
        matches!(self.kind, ObjectKind::Int(_))
    }

    pub fn get_child(&self, name: &str) -> SimpleResult<Self> {
        let mut child_name = self.name()?;
        child_name.push('.');
        child_name.push_str(name);
        SimObject::from_name(&child_name)
    }

    pub fn from_name(full_name: &str) -> SimpleResult<Self> {
        if let Some(obj) = SIG_MAP_NAME.with(|m| m.borrow().get(full_name).copied()) {
            return Ok(obj);
        }
        let obj = SIM_IF.with(|sim| sim.get_object_by_name(full_name))?;
        SIG_MAP_NAME.with(|m| m.borrow_mut().insert(full_name.to_string(), obj));
        Ok(obj)
    }

    pub fn get_root() -> SimpleResult<Self> {
        SIM_IF.with(|sim| sim.get_root_object())
    }

    pub fn get(&self) -> SimpleResult<u32> {
        self.check_value()?;
        SIM_IF.with(|sim| sim.get_value(self))
    }

    pub fn set(&self, val: u32) -> SimpleResult<()> {
        self.check_value()?;
        SIM_IF.with(|sim| sim.set_value(self, val))
    }

    fn check_value(&self) -> SimpleResult<()> {
        if self.has_value() {
            Ok(())
        } else {
            Err(TbError::NoValue(
                self.name().unwrap_or_else(|_| format!("#{}", self.handle)),
            ))
        }
    }

    // convenience functions to get edge triggers for this signal
    pub fn rising_edge(self) -> Trigger {
        Trigger::rising_edge(self)
    }
    pub fn falling_edge(self) -> Trigger {
        Trigger::falling_edge(self)
    }
    pub fn edge(self) -> Trigger {
        Trigger::edge(self)
    }
}
