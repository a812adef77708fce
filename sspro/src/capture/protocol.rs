use crate::error::ProtocolError;

// Command:  A5 OP D0 D1 D2 D3
// Response: A5 OP ST xx xx xx xx xx
pub const START_BYTE: u8 = 0xA5;
pub const COMMAND_LEN: usize = 6;
pub const RESPONSE_LEN: usize = 8;

const OPCODE_OFFSET: usize = 1;
const STATUS_OFFSET: usize = 2;

const STATUS_CAPTURING: u8 = 0x01;
const STATUS_FRAME_READY: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Status = 0x02,
    Capture = 0x03,
    Download = 0x04,
    Abort = 0x05,
    Unknown9 = 0x09,
    SetFrame = 0x0B,
    SetDigitalIO = 0x0C,
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x02 => Ok(Opcode::Status),
            0x03 => Ok(Opcode::Capture),
            0x04 => Ok(Opcode::Download),
            0x05 => Ok(Opcode::Abort),
            0x09 => Ok(Opcode::Unknown9),
            0x0B => Ok(Opcode::SetFrame),
            0x0C => Ok(Opcode::SetDigitalIO),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// Status bits reported by the camera in reply to [`Opcode::Status`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub capturing: bool,
    pub frame_ready: bool,
}

impl DeviceStatus {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            capturing: bits & STATUS_CAPTURING != 0,
            frame_ready: bits & STATUS_FRAME_READY != 0,
        }
    }

    pub fn bits(&self) -> u8 {
        let mut bits = 0;
        if self.capturing {
            bits |= STATUS_CAPTURING;
        }
        if self.frame_ready {
            bits |= STATUS_FRAME_READY;
        }
        bits
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    opcode: Opcode,
    bytes: [u8; COMMAND_LEN],
}

impl CommandFrame {
    pub fn encode(opcode: Opcode, data: [u8; 4]) -> Self {
        Self {
            opcode,
            bytes: [START_BYTE, opcode as u8, data[0], data[1], data[2], data[3]],
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn data(&self) -> [u8; 4] {
        [self.bytes[2], self.bytes[3], self.bytes[4], self.bytes[5]]
    }

    pub fn as_bytes(&self) -> &[u8; COMMAND_LEN] {
        &self.bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame {
    opcode: Opcode,
    status: Option<DeviceStatus>,
    bytes: [u8; RESPONSE_LEN],
}

impl ResponseFrame {
    /// Decode the reply to a command sent with `expected`.
    pub fn decode(bytes: &[u8], expected: Opcode) -> Result<Self, ProtocolError> {
        let bytes = check_frame(bytes)?;

        let actual = bytes[OPCODE_OFFSET];
        if actual != expected as u8 {
            return Err(ProtocolError::OpcodeMismatch { expected, actual });
        }

        Ok(Self::new(expected, bytes))
    }

    /// Decode a response without knowing which command it answers.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let bytes = check_frame(bytes)?;
        let opcode = Opcode::try_from(bytes[OPCODE_OFFSET])?;

        Ok(Self::new(opcode, bytes))
    }

    fn new(opcode: Opcode, bytes: [u8; RESPONSE_LEN]) -> Self {
        let status = match opcode {
            Opcode::Status => Some(DeviceStatus::from_bits(bytes[STATUS_OFFSET])),
            _ => None,
        };

        Self {
            opcode,
            status,
            bytes,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Present only on replies to [`Opcode::Status`].
    pub fn status(&self) -> Option<DeviceStatus> {
        self.status
    }

    pub fn as_bytes(&self) -> &[u8; RESPONSE_LEN] {
        &self.bytes
    }
}

fn check_frame(bytes: &[u8]) -> Result<[u8; RESPONSE_LEN], ProtocolError> {
    let frame: [u8; RESPONSE_LEN] = bytes
        .try_into()
        .map_err(|_| ProtocolError::MalformedFrame { len: bytes.len() })?;

    if frame[0] != START_BYTE {
        return Err(ProtocolError::BadHeader(frame[0]));
    }

    Ok(frame)
}
