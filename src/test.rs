use futures::future::BoxFuture;

use crate::signal::SimObject;
use crate::tb_obj::TbObj;
use crate::TbResult;

pub type TestFn = fn(SimObject) -> BoxFuture<'static, TbResult>;

/// Tests scheduled for one simulation, executed in order.
#[derive(Debug, Default)]
pub struct TbTests(Vec<TbObj<Test>>);

impl TbTests {
    pub fn new() -> Self {
        Self(Vec::new())
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> core::slice::Iter<'_, TbObj<Test>> {
        self.0.iter()
    }
    pub fn push(&mut self, test: Test) {
        self.0.push(TbObj::new(test));
    }
}

pub struct Test {
    pub name: String,
    pub generator: TestFn,
    pub result: Option<Result<String, String>>,
    pub time_secs: f64,
    pub sim_time_ns: f64,
}

impl std::fmt::Debug for Test {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Test")
            .field("name", &self.name)
            .field("result", &self.result)
            .finish()
    }
}

impl Test {
    pub fn new(name: impl Into<String>, generator: TestFn) -> Self {
        Self {
            name: name.into(),
            generator,
            result: None,
            time_secs: 0.0,
            sim_time_ns: 0.0,
        }
    }
    pub fn set_result(&mut self, result: Result<String, String>) {
        self.result = Some(result);
    }
    pub fn outcome(&self) -> TestOutcome {
        let (passed, message) = match &self.result {
            Some(Ok(msg)) => (true, msg.clone()),
            Some(Err(msg)) => (false, msg.clone()),
            None => (false, "Test did not complete".to_string()),
        };
        TestOutcome {
            name: self.name.clone(),
            passed,
            message,
            time_secs: self.time_secs,
            sim_time_ns: self.sim_time_ns,
        }
    }
}

/// Final state of a test after the simulation ended.
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub time_secs: f64,
    pub sim_time_ns: f64,
}
