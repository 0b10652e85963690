use crate::prelude::*;

/*
 * CLOCK
 */
/// Drive `clk` with a free running clock, starting low. Runs until the test is torn down.
pub async fn clock(clk: SimObject, period: u64, unit: TimeUnit) -> TbResult {
    let high_t = period / 2;
    let low_t = period - high_t;
    if period % 2 != 0 {
        SIM_IF.warn(&format!(
            "Clock period {period}{unit} not dividable by 2. High time will be {high}{unit}; low time will be {low}{unit}.",
            period = period,
            unit = unit,
            high = high_t,
            low = low_t
        ));
    }
    loop {
        clk.set(0)?;
        Trigger::timer(low_t, unit).await?;
        clk.set(1)?;
        Trigger::timer(high_t, unit).await?;
    }
}
