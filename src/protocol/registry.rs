use crate::error::{LwacpError, Result};

use super::commands::*;
use super::frame::LwacpFrame;

/// Stereo channel assigned to a speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Left,
    Right,
}

impl Role {
    pub fn wire_value(self) -> u8 {
        match self {
            Role::Left => ROLE_LEFT,
            Role::Right => ROLE_RIGHT,
        }
    }

    /// Role the counterpart speaker ends up with.
    pub fn complement(self) -> Role {
        match self {
            Role::Left => Role::Right,
            Role::Right => Role::Left,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::Left => "LEFT",
            Role::Right => "RIGHT",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoubleUpMode {
    Double,
    Stereo,
}

impl DoubleUpMode {
    pub fn wire_value(self) -> u8 {
        match self {
            DoubleUpMode::Double => MODE_DOUBLE,
            DoubleUpMode::Stereo => MODE_STEREO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStep {
    Up,
    Down,
}

impl VolumeStep {
    pub fn wire_value(self) -> [u8; 2] {
        match self {
            VolumeStep::Up => VOLUME_UP,
            VolumeStep::Down => VOLUME_DOWN,
        }
    }
}

/// Human label for an EQ preset value.
pub fn eq_preset_name(value: u8) -> Option<&'static str> {
    match value {
        EQ_OFF => Some("Off (flat)"),
        EQ_OUT_LOUD => Some("Out Loud"),
        EQ_INTIMATE => Some("Intimate"),
        EQ_VOCALS => Some("Vocals"),
        _ => None,
    }
}

/// Validates semantic commands against a command table and builds frames.
///
/// Every method either returns a complete frame or fails before any bytes
/// exist; nothing partial ever reaches a transport.
#[derive(Debug, Clone, Copy)]
pub struct CommandRegistry {
    table: &'static CommandTable,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new(&UE_MINI_BOOM)
    }
}

impl CommandRegistry {
    pub fn new(table: &'static CommandTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &'static CommandTable {
        self.table
    }

    pub fn descriptor(&self, operation: Operation) -> Result<&'static CommandDescriptor> {
        self.table
            .descriptor(operation)
            .ok_or_else(|| LwacpError::invalid("registry", format!("{:?} not in table", operation)))
    }

    /// Validate `params` against the operation's rule and build the frame.
    pub fn build(&self, operation: Operation, params: &[u8]) -> Result<LwacpFrame> {
        let desc = self.descriptor(operation)?;
        let payload = apply_rule(desc, params)?;
        LwacpFrame::encode(desc.command_id, &payload)
    }

    /// Zero-parameter query for a query-capable operation.
    pub fn query(&self, operation: Operation) -> Result<LwacpFrame> {
        let desc = self.descriptor(operation)?;
        if desc.direction != Direction::QueryCapable {
            return Err(LwacpError::invalid(desc.name, "command cannot be queried"));
        }
        LwacpFrame::encode(desc.command_id, &[])
    }

    pub fn eq_preset(&self, preset: u8) -> Result<LwacpFrame> {
        self.build(Operation::EqPreset, &[preset])
    }

    pub fn sonification(&self, enabled: bool) -> Result<LwacpFrame> {
        self.build(Operation::Sonification, &[enabled as u8])
    }

    pub fn double_up_mode(&self, mode: DoubleUpMode) -> Result<LwacpFrame> {
        self.build(Operation::DoubleUpMode, &[mode.wire_value()])
    }

    pub fn double_up_role(&self, role: Role) -> Result<LwacpFrame> {
        self.build(Operation::DoubleUpRole, &[role.wire_value()])
    }

    /// `None` sends the zero-parameter form used to trigger stereo discovery.
    pub fn double_up_lock(&self, enabled: Option<bool>) -> Result<LwacpFrame> {
        match enabled {
            Some(on) => self.build(Operation::DoubleUpLock, &[on as u8]),
            None => self.build(Operation::DoubleUpLock, &[]),
        }
    }

    pub fn stereo_discovery(&self) -> Result<LwacpFrame> {
        self.double_up_lock(None)
    }

    pub fn battery_announce(&self) -> Result<LwacpFrame> {
        self.build(Operation::BatteryAnnounce, &[])
    }

    pub fn power_on_sound(&self) -> Result<LwacpFrame> {
        self.build(Operation::EmitSound, &[])
    }

    /// Names longer than the limit are truncated, never rejected.
    pub fn set_name(&self, name: &str) -> Result<LwacpFrame> {
        self.build(Operation::SetName, name.as_bytes())
    }

    pub fn volume(&self, step: VolumeStep) -> Result<LwacpFrame> {
        self.build(Operation::Volume, &step.wire_value())
    }

    pub fn ble_state(&self, enabled: bool) -> Result<LwacpFrame> {
        self.build(Operation::BleState, &[enabled as u8])
    }

    /// Unvalidated passthrough for experimentation.
    ///
    /// Only the frame length limit is enforced. The speaker's reaction to
    /// payloads outside the command table is undefined.
    pub fn raw(&self, command_id: u8, params: &[u8]) -> Result<LwacpFrame> {
        LwacpFrame::encode(command_id, params)
    }
}

fn apply_rule(desc: &CommandDescriptor, params: &[u8]) -> Result<Vec<u8>> {
    let name = desc.name;
    match desc.rule {
        ParamRule::Empty => {
            if !params.is_empty() {
                return Err(arity(name, "no parameters", params.len()));
            }
            Ok(Vec::new())
        }
        ParamRule::OneOf(allowed) => match params {
            [value] => check_member(name, allowed, *value).map(|v| vec![v]),
            _ => Err(arity(name, "exactly one parameter", params.len())),
        },
        ParamRule::OptionalOneOf(allowed) => match params {
            [] => Ok(Vec::new()),
            [value] => check_member(name, allowed, *value).map(|v| vec![v]),
            _ => Err(arity(name, "zero or one parameter", params.len())),
        },
        ParamRule::Fixed(payload) => {
            if !params.is_empty() {
                return Err(arity(name, "no caller parameters", params.len()));
            }
            Ok(payload.to_vec())
        }
        ParamRule::Pair(allowed) => match params {
            [a, b] if allowed.contains(&[*a, *b]) => Ok(vec![*a, *b]),
            [a, b] => Err(LwacpError::invalid(
                name,
                format!("unsupported pair {:02X} {:02X}", a, b),
            )),
            _ => Err(arity(name, "exactly two parameters", params.len())),
        },
        ParamRule::Utf8 { max_len } => {
            let text = std::str::from_utf8(params)
                .map_err(|e| LwacpError::invalid(name, format!("not UTF-8: {}", e)))?;
            if text.trim().is_empty() {
                return Err(LwacpError::invalid(name, "name is empty"));
            }
            Ok(truncate_utf8(text, max_len).as_bytes().to_vec())
        }
    }
}

fn check_member(name: &'static str, allowed: &[u8], value: u8) -> Result<u8> {
    if allowed.contains(&value) {
        Ok(value)
    } else {
        Err(LwacpError::invalid(
            name,
            format!("value {} not in {:?}", value, allowed),
        ))
    }
}

fn arity(name: &'static str, expected: &str, got: usize) -> LwacpError {
    LwacpError::invalid(name, format!("expected {}, got {}", expected, got))
}

/// Longest prefix of `text` that fits in `max_len` bytes without splitting a char.
pub fn truncate_utf8(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
