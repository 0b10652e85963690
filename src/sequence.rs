use crate::config;
use crate::coverage::TbCoverage;
use crate::driver::{InputDriver, OutputDriver, RESULT_ADDRESS, WRITE_ADDRESS_A, WRITE_ADDRESS_B};
use crate::monitor::{InputMonitor, OutputMonitor};
use crate::prelude::*;
use crate::scoreboard::Scoreboard;

/// Reads every address of the read port once, sampling address coverage before each read.
async fn read_addresses(
    driver: &mut OutputDriver,
    coverage: &TbCoverage,
    addresses: std::ops::Range<u32>,
) -> TbResult {
    for address in addresses {
        coverage.read_address(address);
        driver.send(address).await?;
    }
    Ok(Val::None)
}

/// Randomized check of the gated OR unit: every pair of operands written to the two input
/// FIFOs must come back as `a | b` on the result address.
pub async fn dut_test(dut: SimObject) -> TbResult {
    let config = config::current();
    let clk = dut.get_child("CLK")?;
    let rst_n = dut.get_child("RST_N")?;
    Task::fork(testbench::clock(clk, config.clock_period_ns, TimeUnit::Ns));

    rst_n.set(1)?;
    Trigger::timer(20, TimeUnit::Ns).await?;
    rst_n.set(0)?;
    Trigger::timer(20, TimeUnit::Ns).await?;
    rst_n.set(1)?;

    let scoreboard = Scoreboard::new();
    let coverage = TbCoverage::new();
    let write_drv = InputDriver::new(dut)?;
    let mut read_drv = OutputDriver::new(dut, Some(scoreboard.checker()))?;
    InputMonitor::new(dut, coverage.input_callback())?.start();
    OutputMonitor::new(dut, coverage.output_callback())?.start();

    // initial state of all read addresses
    read_addresses(&mut read_drv, &coverage, 0..4).await?;

    let (mut a, mut b) = (0, 0);
    for _ in 0..config.iterations {
        a = utils::rand_int(2);
        b = utils::rand_int(2);
        scoreboard.add_expected(a | b);

        write_drv.send(WRITE_ADDRESS_A, a).await?;
        write_drv.send(WRITE_ADDRESS_B, b).await?;
        coverage.ab(a, b);

        for _ in 0..config.settle_cycles {
            clk.rising_edge().await?;
            Trigger::next_time_step().await?;
        }

        read_addresses(&mut read_drv, &coverage, 0..RESULT_ADDRESS + 1).await?;
    }

    // fill FIFO a, then b
    for _ in 0..3 {
        write_drv.send(WRITE_ADDRESS_A, a).await?;
    }
    read_addresses(&mut read_drv, &coverage, 0..RESULT_ADDRESS).await?;
    for _ in 0..3 {
        write_drv.send(WRITE_ADDRESS_B, b).await?;
    }
    read_addresses(&mut read_drv, &coverage, 0..RESULT_ADDRESS).await?;

    for line in coverage.report(true).to_string().lines() {
        SIM_IF.log(line);
    }
    coverage.export_to_xml(&config.result_path.join("coverage.xml"))?;

    scoreboard.verdict()
}
