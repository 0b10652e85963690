use std::collections::VecDeque;

use super::{DutModel, Port, Ports, PortsMut};

/// Read address of the checked result (head of the `y` FIFO).
pub const RESULT_ADDRESS: u32 = 3;
/// Write address of operand FIFO `a`.
pub const WRITE_ADDRESS_A: u32 = 4;
/// Write address of operand FIFO `b`.
pub const WRITE_ADDRESS_B: u32 = 5;

const PORTS: [Port; 10] = [
    Port::new("CLK", 1),
    Port::new("RST_N", 1),
    Port::new("write_en", 1),
    Port::new("write_address", 3),
    Port::new("write_data", 32),
    Port::new("write_rdy", 1),
    Port::new("read_en", 1),
    Port::new("read_address", 3),
    Port::new("read_data", 32),
    Port::new("read_rdy", 1),
];

/// Behavioral model of the gated OR unit.
///
/// Two operand FIFOs `a` and `b` are filled through the write port. Once both hold a value
/// and the unit is idle, one value of each is combined and, after `latency` cycles, pushed
/// into the result FIFO `y`. The read port exposes:
///
/// | address | `read_data` |
/// |---|---|
/// | 0 | `a` is full |
/// | 1 | `b` is full |
/// | 2 | `y` is not empty |
/// | 3 | head of `y`, dequeued on the clock edge that sees `read_en` |
#[derive(Debug, Clone)]
pub struct OrUnit {
    depth: usize,
    latency: u32,
    op: fn(u32, u32) -> u32,
    a: VecDeque<u32>,
    b: VecDeque<u32>,
    y: VecDeque<u32>,
    // (result, cycles left)
    busy: Option<(u32, u32)>,
}

impl Default for OrUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl OrUnit {
    pub fn new() -> Self {
        Self {
            depth: 2,
            latency: 2,
            op: |a, b| a | b,
            a: VecDeque::new(),
            b: VecDeque::new(),
            y: VecDeque::new(),
            busy: None,
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(1);
        self
    }

    pub fn with_latency(mut self, latency: u32) -> Self {
        self.latency = latency;
        self
    }

    /// Replace the combining operator, e.g. to check that a faulty unit gets caught.
    pub fn with_operator(mut self, op: fn(u32, u32) -> u32) -> Self {
        self.op = op;
        self
    }

    fn reset(&mut self) {
        self.a.clear();
        self.b.clear();
        self.y.clear();
        self.busy = None;
    }

    fn enqueue(fifo: &mut VecDeque<u32>, depth: usize, value: u32) {
        if fifo.len() < depth {
            fifo.push_back(value);
        }
    }
}

impl DutModel for OrUnit {
    fn name(&self) -> &str {
        "dut"
    }

    fn ports(&self) -> Vec<Port> {
        PORTS.to_vec()
    }

    fn clock(&self) -> &str {
        "CLK"
    }

    fn posedge(&mut self, ports: &Ports<'_>) {
        if ports.get("RST_N") == 0 {
            self.reset();
            return;
        }
        if ports.get("read_en") == 1 && ports.get("read_address") == RESULT_ADDRESS {
            self.y.pop_front();
        }
        if ports.get("write_en") == 1 {
            let data = ports.get("write_data");
            match ports.get("write_address") {
                WRITE_ADDRESS_A => Self::enqueue(&mut self.a, self.depth, data),
                WRITE_ADDRESS_B => Self::enqueue(&mut self.b, self.depth, data),
                _ => {}
            }
        }
        if let Some((result, cycles)) = self.busy {
            if cycles > 1 {
                self.busy = Some((result, cycles - 1));
            } else if self.y.len() < self.depth {
                self.y.push_back(result);
                self.busy = None;
            } else {
                // stall until y has room
                self.busy = Some((result, 0));
            }
        }
        if self.busy.is_none() && !self.a.is_empty() && !self.b.is_empty() {
            if let (Some(a), Some(b)) = (self.a.pop_front(), self.b.pop_front()) {
                self.busy = Some(((self.op)(a, b), self.latency));
            }
        }
    }

    fn eval(&self, ports: &mut PortsMut<'_>) {
        let rdy = ports.get("RST_N");
        ports.set("write_rdy", rdy);
        ports.set("read_rdy", rdy);
        let data = match ports.get("read_address") {
            0 => (self.a.len() >= self.depth) as u32,
            1 => (self.b.len() >= self.depth) as u32,
            2 => (!self.y.is_empty()) as u32,
            RESULT_ADDRESS => self.y.front().copied().unwrap_or(0),
            _ => 0,
        };
        ports.set("read_data", data);
    }
}
