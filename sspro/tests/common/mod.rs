#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use sspro::{
    CancelHandle, Clock, HalfFrame, Opcode, SensorProfile, Transport, ENDPOINT_COMMAND_OUT,
    ENDPOINT_STATUS_IN, ROW_PREAMBLE_LEN, START_BYTE,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 8 raw rows of 40 bytes: a dummy row then three lines of each half-frame.
pub const TEST_PROFILE: SensorProfile = SensorProfile {
    name: "test",
    row_bytes: 40,
    max_rows: 8,
    width: 8,
    halves: [
        HalfFrame {
            first_row: 1,
            rows: 3,
            front_porch: 20,
            back_porch: 4,
        },
        HalfFrame {
            first_row: 5,
            rows: 3,
            front_porch: 22,
            back_porch: 2,
        },
    ],
};

const FILLER: u8 = 0xEE;

/// Alternating samples, phase shifted every line; `low`/`high` never contain a zero byte.
pub fn checkerboard(profile: &SensorProfile, low: u16, high: u16) -> Vec<Vec<u16>> {
    (0..profile.halves[0].rows)
        .map(|line| {
            (0..profile.width)
                .map(|x| if (x + line) % 2 == 0 { low } else { high })
                .collect()
        })
        .collect()
}

/// Raw download with every row preceded by its zero preamble.
pub fn raw_frame(profile: &SensorProfile, halves: [&[Vec<u16>]; 2]) -> Vec<u8> {
    let mut data = Vec::with_capacity(profile.row_bytes * profile.max_rows);

    for row in 0..profile.max_rows {
        let start = data.len();
        data.resize(start + ROW_PREAMBLE_LEN, 0);

        let found = profile
            .halves
            .iter()
            .enumerate()
            .find(|(_, h)| row >= h.first_row && row < h.first_row + h.rows);

        if let Some((h, half)) = found {
            data.resize(start + half.front_porch.max(ROW_PREAMBLE_LEN), FILLER);
            for sample in &halves[h][row - half.first_row] {
                data.extend_from_slice(&sample.to_le_bytes());
            }
        }
        data.resize(start + profile.row_bytes, FILLER);
    }

    data
}

#[derive(Default)]
struct Device {
    commands: Vec<[u8; 6]>,
    replies: VecDeque<Vec<u8>>,
    status_bits: VecDeque<u8>,
    next_reply: Option<Vec<u8>>,
    image: Vec<u8>,
    image_pos: Option<usize>,
    fail_image_after: Option<usize>,
    write_error: Option<rusb::Error>,
    short_write: bool,
    swallow_reply: bool,
    cancel_on_command: Option<(u8, CancelHandle)>,
}

/// In-memory camera that answers commands like the real device.
#[derive(Clone, Default)]
pub struct MockCamera {
    device: Rc<RefCell<Device>>,
}

impl MockCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status bits handed out to successive Status commands; zero once drained.
    pub fn script_status(&self, bits: &[u8]) {
        self.device.borrow_mut().status_bits.extend(bits);
    }

    pub fn set_image(&self, image: Vec<u8>) {
        self.device.borrow_mut().image = image;
    }

    pub fn fail_image_after(&self, bytes: usize) {
        self.device.borrow_mut().fail_image_after = Some(bytes);
    }

    /// Replace the reply to the next command.
    pub fn corrupt_next_reply(&self, reply: Vec<u8>) {
        self.device.borrow_mut().next_reply = Some(reply);
    }

    pub fn fail_writes(&self, err: rusb::Error) {
        self.device.borrow_mut().write_error = Some(err);
    }

    pub fn short_writes(&self) {
        self.device.borrow_mut().short_write = true;
    }

    pub fn swallow_replies(&self) {
        self.device.borrow_mut().swallow_reply = true;
    }

    /// Trigger `handle` while a command with `opcode` is on the wire.
    pub fn cancel_on_command(&self, opcode: Opcode, handle: CancelHandle) {
        self.device.borrow_mut().cancel_on_command = Some((opcode as u8, handle));
    }

    pub fn commands(&self) -> Vec<[u8; 6]> {
        self.device.borrow().commands.clone()
    }

    pub fn opcodes(&self) -> Vec<u8> {
        self.commands().iter().map(|c| c[1]).collect()
    }

    pub fn count(&self, opcode: Opcode) -> usize {
        self.opcodes().iter().filter(|&&op| op == opcode as u8).count()
    }
}

impl Transport for MockCamera {
    fn write_bulk(&self, endpoint: u8, buf: &[u8], _: Duration) -> rusb::Result<usize> {
        assert_eq!(endpoint, ENDPOINT_COMMAND_OUT);
        let mut device = self.device.borrow_mut();

        if let Some(err) = device.write_error {
            return Err(err);
        }

        let command: [u8; 6] = buf.try_into().expect("commands are six bytes");
        device.commands.push(command);
        if let Some((opcode, handle)) = &device.cancel_on_command {
            if *opcode == command[1] {
                handle.cancel();
            }
        }

        let mut reply = vec![START_BYTE, command[1], 0, 0, 0, 0, 0, 0];
        if command[1] == Opcode::Status as u8 {
            reply[2] = device.status_bits.pop_front().unwrap_or(0);
        }
        if command[1] == Opcode::Download as u8 {
            device.image_pos = Some(0);
        }
        if let Some(next) = device.next_reply.take() {
            reply = next;
        }
        if !device.swallow_reply {
            device.replies.push_back(reply);
        }

        Ok(if device.short_write { 3 } else { buf.len() })
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], _: Duration) -> rusb::Result<usize> {
        assert_eq!(endpoint, ENDPOINT_STATUS_IN);
        let mut device = self.device.borrow_mut();

        if let Some(reply) = device.replies.pop_front() {
            let len = reply.len().min(buf.len());
            buf[..len].copy_from_slice(&reply[..len]);
            return Ok(len);
        }

        let Some(pos) = device.image_pos else {
            return Err(rusb::Error::Timeout);
        };
        if device.fail_image_after.is_some_and(|limit| pos >= limit) {
            return Err(rusb::Error::Pipe);
        }

        let len = buf.len().min(device.image.len() - pos);
        buf[..len].copy_from_slice(&device.image[pos..pos + len]);
        device.image_pos = Some(pos + len);
        Ok(len)
    }
}

#[derive(Debug)]
struct Timeline {
    now: Instant,
    sleeps: Vec<Duration>,
    cancel_on_sleep: Option<(usize, CancelHandle)>,
}

/// Clock that only moves when slept on.
#[derive(Clone)]
pub struct ManualClock {
    timeline: Rc<RefCell<Timeline>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            timeline: Rc::new(RefCell::new(Timeline {
                now: Instant::now(),
                sleeps: Vec::new(),
                cancel_on_sleep: None,
            })),
        }
    }

    /// Trigger `handle` while the `nth` sleep (1-based) is in progress.
    pub fn cancel_on_sleep(&self, nth: usize, handle: CancelHandle) {
        self.timeline.borrow_mut().cancel_on_sleep = Some((nth, handle));
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.timeline.borrow().sleeps.clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.timeline.borrow().now
    }

    fn sleep(&self, duration: Duration) {
        let mut timeline = self.timeline.borrow_mut();
        timeline.now += duration;
        timeline.sleeps.push(duration);

        let count = timeline.sleeps.len();
        if let Some((nth, handle)) = &timeline.cancel_on_sleep {
            if *nth == count {
                handle.cancel();
            }
        }
    }
}
