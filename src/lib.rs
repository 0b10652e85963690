//! Testbench for a dual-FIFO gated OR unit, written as cooperative tasks on top of a
//! simulator interface.
//!
//! Tests are plain `async fn(SimObject) -> TbResult`. They run on a single threaded executor
//! and suspend on [`Trigger`](trigger::Trigger)s: timers, signal edges and the read-write,
//! read-only and next-time-step phases of the simulator. The [`model`] backend provides an
//! in-process kernel with a behavioral model of the DUT.

pub mod config;
pub mod coverage;
pub mod driver;
mod error;
mod executor;
mod junit;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod prelude;
pub mod scoreboard;
pub mod sequence;
mod signal;
pub mod sim_if;
mod tb_obj;
mod test;
pub mod testbench;
pub mod trigger;
pub mod utils;
mod value;

use once_cell::sync::OnceCell;
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time;

use config::TbConfig;
use executor::Task;
use sim_if::{TimeUnit, SIM_IF};
use tb_obj::TbObj;
use test::{TbTests, TestOutcome};

pub use error::TbError;
pub use value::Val;

pub type SimpleResult<T> = Result<T, TbError>;
pub type TbResult = Result<Val, TbError>;

/// Name of the junit test suite, set by the `run_with_model!` entry point.
pub static CRATE_NAME: OnceCell<String> = OnceCell::new();

thread_local! {
    static SIM_START_TIME: Cell<Option<time::Instant>> = const { Cell::new(None) };
    static CURRENT_TEST: RefCell<Option<(Arc<Task>, TbObj<test::Test>)>> = const { RefCell::new(None) };
    static TESTS: RefCell<Vec<TbObj<test::Test>>> = const { RefCell::new(Vec::new()) };
}

pub fn pass_test(msg: &str) {
    // Passes test that has not already failed/passed
    if let Some((task, test)) = CURRENT_TEST.with(|c| c.borrow_mut().take()) {
        test.with_mut(|t| t.set_result(Ok(msg.to_string())));
        tear_down_test(task);
    }
}

pub fn fail_test(msg: &str) {
    // Fails test that has not already failed/passed
    if let Some((task, test)) = CURRENT_TEST.with(|c| c.borrow_mut().take()) {
        test.with_mut(|t| t.set_result(Err(msg.to_string())));
        tear_down_test(task);
    }
}

fn tear_down_test(test: Arc<Task>) {
    trigger::cancel_all_triggers();
    executor::clear_ready_queue();
    test.cancel();
}

/// Drop everything a previous simulation on this thread may have left behind.
fn reset_kernel() {
    trigger::cancel_all_triggers();
    executor::clear_ready_queue();
    signal::clear_signal_cache();
    CURRENT_TEST.with(|c| c.borrow_mut().take());
    TESTS.with(|t| t.borrow_mut().clear());
}

/// Seeds the random generator, then schedules all tests in a chain: each test awaits the
/// completion of its predecessor. Must be called with a backend installed.
pub(crate) fn start_of_simulation(tests: TbTests, config: &TbConfig) -> SimpleResult<()> {
    reset_kernel();
    config::install(config.clone());
    let seed = config.seed.unwrap_or_else(rand::random);
    utils::seed(seed);
    SIM_IF.log(&format!("Seeding testbench random generator with {}", seed));
    SIM_START_TIME.with(|t| t.set(Some(time::Instant::now())));

    let sim_root = signal::SimObject::get_root()?;

    let mut join_handle = None;
    for test in tests.iter().cloned() {
        TESTS.with(|t| t.borrow_mut().push(test.clone()));
        let previous = join_handle.take();
        let name = test.with(|t| t.name.clone());
        join_handle = Some(Task::spawn_from_future(
            async move {
                // await previous test, if there is one
                if let Some(handle) = previous {
                    let _ = handle.await;
                }
                SIM_IF.log(&format!("Running test {}", name));
                let wrapped = test.clone();
                let test_handle = Task::spawn_from_future(
                    async move {
                        let time_start = time::Instant::now();
                        let sim_time_start = SIM_IF.get_sim_time(TimeUnit::Ns);
                        let fut = wrapped.with(|t| (t.generator)(sim_root));
                        let result = fut.await;

                        wrapped.with_mut(|t| {
                            t.time_secs = time_start.elapsed().as_secs_f64();
                            t.sim_time_ns = SIM_IF.get_sim_time(TimeUnit::Ns) - sim_time_start;
                        });
                        match result {
                            Ok(val) => pass_test(&val.to_string()),
                            Err(e) => fail_test(&e.to_string()),
                        }
                        Ok(Val::None)
                    },
                    &name,
                );
                // set current test handle
                if let Some(task) = test_handle.task() {
                    CURRENT_TEST.with(|c| c.borrow_mut().replace((task, test)));
                }
                // completion or teardown, both resolve the handle
                let _ = test_handle.await;
                Ok(Val::None)
            },
            "test chain",
        ));
    }

    // execute first simulation tick
    executor::run_once();
    Ok(())
}

/// Logs the summary, writes `results.xml` and returns the outcome of every test.
pub(crate) fn end_of_simulation(config: &TbConfig) -> SimpleResult<Vec<TestOutcome>> {
    let duration = SIM_START_TIME
        .with(|t| t.get())
        .map_or(0.0, |t| t.elapsed().as_secs_f64());
    let final_sim_time = SIM_IF.get_sim_time(TimeUnit::Ns);
    let sim_speed = if duration > 0.0 {
        final_sim_time / duration
    } else {
        0.0
    };

    let outcomes: Vec<TestOutcome> =
        TESTS.with(|t| t.borrow().iter().map(|t| t.with(|t| t.outcome())).collect());
    for line in junit::summary_table(&outcomes).to_string().lines() {
        SIM_IF.log(line);
    }
    for failed in outcomes.iter().filter(|o| !o.passed) {
        SIM_IF.warn(&format!("TEST {} failed: {}", failed.name, failed.message));
    }
    SIM_IF.log("TOTAL SIMULATION");
    SIM_IF.log(&format!("Simulation time: {:.0} ns", final_sim_time));
    SIM_IF.log(&format!("Real time: {:.3} s", duration));
    SIM_IF.log(&format!("Simulation speed: {:.3} ns/s", sim_speed));

    let suite = CRATE_NAME
        .get()
        .map_or(env!("CARGO_PKG_NAME"), |s| s.as_str());
    junit::create_junit_xml(suite, &outcomes, &config.result_path)?;
    reset_kernel();
    Ok(outcomes)
}
