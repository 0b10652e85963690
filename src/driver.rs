//! Bus drivers for the write and read port of the DUT.
//!
//! Both drivers share the same handshake: wait a random number of clock cycles, wait for the
//! port's ready flag, drive enable for exactly one cycle.

use std::ops::RangeInclusive;

use crate::config;
use crate::prelude::*;

pub use crate::model::{RESULT_ADDRESS, WRITE_ADDRESS_A, WRITE_ADDRESS_B};

#[derive(Debug, Clone, Copy)]
struct Handshake {
    clk: SimObject,
    en: SimObject,
    rdy: SimObject,
}

impl Handshake {
    async fn acquire(&self, delay: u32) -> SimpleResult<()> {
        for _ in 0..delay {
            self.clk.rising_edge().await?;
        }
        while self.rdy.get()? == 0 {
            self.clk.rising_edge().await?;
        }
        Ok(())
    }

    async fn release(&self) -> SimpleResult<()> {
        self.clk.rising_edge().await?;
        Trigger::next_time_step().await?;
        self.en.set(0)
    }
}

fn default_delay() -> RangeInclusive<u32> {
    1..=config::current().max_delay
}

#[derive(Debug, Clone)]
pub struct InputDriver {
    port: Handshake,
    address: SimObject,
    data: SimObject,
    delay: RangeInclusive<u32>,
}

impl InputDriver {
    pub fn new(dut: SimObject) -> SimpleResult<Self> {
        let driver = Self {
            port: Handshake {
                clk: dut.get_child("CLK")?,
                en: dut.get_child("write_en")?,
                rdy: dut.get_child("write_rdy")?,
            },
            address: dut.get_child("write_address")?,
            data: dut.get_child("write_data")?,
            delay: default_delay(),
        };
        driver.port.en.set(0)?;
        driver.address.set(0)?;
        driver.data.set(0)?;
        Ok(driver)
    }

    /// Range of clock cycles waited before each transaction.
    pub fn with_delay(mut self, delay: RangeInclusive<u32>) -> Self {
        self.delay = delay;
        self
    }

    pub async fn send(&self, address: u32, data: u32) -> TbResult {
        self.port.acquire(utils::rand_range(self.delay.clone())).await?;
        self.port.en.set(1)?;
        self.address.set(address)?;
        self.data.set(data)?;
        Trigger::read_only().await?;
        self.port.release().await?;
        Ok(Val::None)
    }
}

pub type ReadCallback = Box<dyn FnMut(u32) + Send>;

pub struct OutputDriver {
    port: Handshake,
    address: SimObject,
    data: SimObject,
    delay: RangeInclusive<u32>,
    callback: Option<ReadCallback>,
}

impl std::fmt::Debug for OutputDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputDriver")
            .field("port", &self.port)
            .field("delay", &self.delay)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl OutputDriver {
    /// `callback` receives every value read from [`RESULT_ADDRESS`].
    pub fn new(dut: SimObject, callback: Option<ReadCallback>) -> SimpleResult<Self> {
        let driver = Self {
            port: Handshake {
                clk: dut.get_child("CLK")?,
                en: dut.get_child("read_en")?,
                rdy: dut.get_child("read_rdy")?,
            },
            address: dut.get_child("read_address")?,
            data: dut.get_child("read_data")?,
            delay: default_delay(),
            callback,
        };
        driver.port.en.set(0)?;
        driver.address.set(0)?;
        Ok(driver)
    }

    pub fn with_delay(mut self, delay: RangeInclusive<u32>) -> Self {
        self.delay = delay;
        self
    }

    /// Read `address` and return the value sampled in the read-only phase of the cycle
    /// `read_en` is asserted.
    pub async fn send(&mut self, address: u32) -> TbResult {
        self.port.acquire(utils::rand_range(self.delay.clone())).await?;
        self.port.en.set(1)?;
        self.address.set(address)?;
        Trigger::read_only().await?;

        let value = self.data.get()?;
        match (&mut self.callback, address) {
            (Some(callback), RESULT_ADDRESS) => callback(value),
            (_, 0..=2) => SIM_IF.log(&format!("address={}, value={}", address, value)),
            _ => {}
        }

        self.port.release().await?;
        Ok(Val::from(value))
    }
}
