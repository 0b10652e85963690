use std::fmt;

use crate::prelude::*;

/// Handshake state of a port during one clock cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Transaction,
}

impl Phase {
    /// Classify the code `enable << 1 | ready`. Only a ready port has a phase.
    pub fn classify(code: u32) -> Option<Phase> {
        match code {
            0b01 => Some(Phase::Idle),
            0b11 => Some(Phase::Transaction),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "Idle",
            Phase::Transaction => "Txn",
        })
    }
}

/// Receives `(previous, current)` for every classified cycle.
pub type PhaseCallback = Box<dyn FnMut(Phase, Phase) + Send>;

struct PortMonitor {
    clk: SimObject,
    en: SimObject,
    rdy: SimObject,
    callback: PhaseCallback,
}

impl PortMonitor {
    fn new(dut: SimObject, en: &str, rdy: &str, callback: PhaseCallback) -> SimpleResult<Self> {
        Ok(Self {
            clk: dut.get_child("CLK")?,
            en: dut.get_child(en)?,
            rdy: dut.get_child(rdy)?,
            callback,
        })
    }

    async fn run(mut self) -> TbResult {
        let mut previous = Phase::Idle;
        loop {
            self.clk.falling_edge().await?;
            Trigger::read_only().await?;
            let code = ((self.en.get()? & 1) << 1) | (self.rdy.get()? & 1);
            if let Some(current) = Phase::classify(code) {
                (self.callback)(previous, current);
                previous = current;
            }
        }
    }
}

/// Watches `write_en` / `write_rdy`.
pub struct InputMonitor(PortMonitor);

impl InputMonitor {
    pub fn new(dut: SimObject, callback: PhaseCallback) -> SimpleResult<Self> {
        PortMonitor::new(dut, "write_en", "write_rdy", callback).map(Self)
    }

    /// Fork the monitor loop. It runs until the test is torn down.
    pub fn start(self) -> JoinHandle {
        Task::fork(self.0.run())
    }
}

/// Watches `read_en` / `read_rdy`.
pub struct OutputMonitor(PortMonitor);

impl OutputMonitor {
    pub fn new(dut: SimObject, callback: PhaseCallback) -> SimpleResult<Self> {
        PortMonitor::new(dut, "read_en", "read_rdy", callback).map(Self)
    }

    pub fn start(self) -> JoinHandle {
        Task::fork(self.0.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{InputDriver, WRITE_ADDRESS_A};
    use crate::model::{model_init, OrUnit};
    use rstest::rstest;
    use std::sync::{Arc, Mutex};

    #[rstest]
    #[case(0b00, None)]
    #[case(0b01, Some(Phase::Idle))]
    #[case(0b10, None)]
    #[case(0b11, Some(Phase::Transaction))]
    fn classifies_handshake_code(#[case] code: u32, #[case] phase: Option<Phase>) {
        assert_eq!(Phase::classify(code), phase);
    }

    #[test]
    fn display_is_short() {
        assert_eq!(Phase::Idle.to_string(), "Idle");
        assert_eq!(Phase::Transaction.to_string(), "Txn");
    }

    type Transitions = Arc<Mutex<Vec<(Phase, Phase)>>>;

    async fn one_write(dut: SimObject, seen: Transitions) -> TbResult {
        let clk = dut.get_child("CLK")?;
        Task::fork(testbench::clock(clk, 10, TimeUnit::Ns));
        let rst_n = dut.get_child("RST_N")?;
        rst_n.set(0)?;
        let driver = InputDriver::new(dut)?.with_delay(1..=1);
        InputMonitor::new(
            dut,
            Box::new(move |prev, cur| seen.lock().unwrap().push((prev, cur))),
        )?
        .start();
        // not ready while in reset, nothing gets classified
        utils::clock_cycles(clk, 2).await?;
        rst_n.set(1)?;
        utils::clock_cycles(clk, 2).await?;
        driver.send(WRITE_ADDRESS_A, 1).await?;
        utils::clock_cycles(clk, 2).await?;
        Ok(Val::None)
    }

    thread_local! {
        static SEEN: std::cell::RefCell<Option<Transitions>> = const { std::cell::RefCell::new(None) };
    }

    fn one_write_test(dut: SimObject) -> futures::future::BoxFuture<'static, TbResult> {
        let seen = SEEN.with(|s| s.borrow().clone()).unwrap_or_default();
        one_write(dut, seen).boxed()
    }

    #[test]
    fn reports_transitions_of_a_write() {
        let dir = tempfile::tempdir().unwrap();
        let seen: Transitions = Arc::default();
        SEEN.with(|s| s.replace(Some(seen.clone())));
        let mut tests = TbTests::new();
        tests.push(Test::new("one_write", one_write_test));
        let config = TbConfig {
            result_path: dir.path().to_path_buf(),
            seed: Some(1),
            ..TbConfig::default()
        };
        let outcomes = model_init(OrUnit::new(), tests, &config).unwrap();
        assert!(outcomes[0].passed, "{}", outcomes[0].message);

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&(Phase::Idle, Phase::Transaction)));
        assert!(seen.contains(&(Phase::Transaction, Phase::Idle)));
        assert!(!seen.contains(&(Phase::Transaction, Phase::Transaction)));
        assert_eq!(
            seen.iter()
                .filter(|(_, cur)| *cur == Phase::Transaction)
                .count(),
            1
        );
    }
}
