/// Command table for the UE Mini Boom LWACP protocol.
///
/// Values come from a decompiled companion app and are partly extrapolated
/// from the larger UE Boom line. Correct them here; codec and orchestrator
/// never hard-code command ids.

/// Semantic operations known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    EqPreset,
    Sonification,
    DoubleUpMode,
    DoubleUpRole,
    DoubleUpLock,
    BatteryAnnounce,
    EmitSound,
    SetName,
    Volume,
    BleState,
}

/// How a descriptor's parameter bytes are validated and produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRule {
    /// No parameter bytes.
    Empty,
    /// Exactly one byte from the allowed set.
    OneOf(&'static [u8]),
    /// Zero bytes, or one byte from the allowed set.
    OptionalOneOf(&'static [u8]),
    /// Constant payload; callers supply nothing.
    Fixed(&'static [u8]),
    /// Exactly one of the listed byte pairs.
    Pair(&'static [[u8; 2]]),
    /// UTF-8 text truncated on a character boundary to `max_len` bytes.
    Utf8 { max_len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    WriteOnly,
    /// May also be sent with zero parameters to read the current value.
    QueryCapable,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub operation: Operation,
    pub command_id: u8,
    pub rule: ParamRule,
    pub direction: Direction,
}

/// Process-wide constant table of command descriptors.
#[derive(Debug)]
pub struct CommandTable {
    pub descriptors: &'static [CommandDescriptor],
}

impl CommandTable {
    pub fn descriptor(&self, operation: Operation) -> Option<&CommandDescriptor> {
        self.descriptors.iter().find(|d| d.operation == operation)
    }

    pub fn by_id(&self, command_id: u8) -> Option<&CommandDescriptor> {
        self.descriptors.iter().find(|d| d.command_id == command_id)
    }
}

// EQ presets
pub const EQ_OFF: u8 = 0x00;
pub const EQ_OUT_LOUD: u8 = 0x01;
pub const EQ_INTIMATE: u8 = 0x02;
pub const EQ_VOCALS: u8 = 0x03;

// Double Up mode / role
pub const MODE_DOUBLE: u8 = 0x00;
pub const MODE_STEREO: u8 = 0x01;
pub const ROLE_LEFT: u8 = 0x00;
pub const ROLE_RIGHT: u8 = 0x01;

// Volume steps: [direction, step]
pub const VOLUME_UP: [u8; 2] = [0x01, 0x01];
pub const VOLUME_DOWN: [u8; 2] = [0x00, 0x01];

/// Sound id played by the speaker at power on.
pub const SOUND_POWER_ON: [u8; 2] = [0x60, 0xC0];

/// Maximum speaker name length in bytes.
pub const NAME_MAX_LEN: usize = 32;

const TOGGLE: &[u8] = &[0x00, 0x01];

pub static UE_MINI_BOOM: CommandTable = CommandTable {
    descriptors: &[
        CommandDescriptor {
            name: "eq_preset",
            operation: Operation::EqPreset,
            command_id: 0x64,
            rule: ParamRule::OneOf(&[EQ_OFF, EQ_OUT_LOUD, EQ_INTIMATE, EQ_VOCALS]),
            direction: Direction::QueryCapable,
        },
        CommandDescriptor {
            name: "sonification",
            operation: Operation::Sonification,
            command_id: 0x65,
            rule: ParamRule::OneOf(TOGGLE),
            direction: Direction::QueryCapable,
        },
        CommandDescriptor {
            name: "double_up_mode",
            operation: Operation::DoubleUpMode,
            command_id: 0x67,
            rule: ParamRule::OneOf(&[MODE_DOUBLE, MODE_STEREO]),
            direction: Direction::QueryCapable,
        },
        CommandDescriptor {
            name: "double_up_role",
            operation: Operation::DoubleUpRole,
            command_id: 0x68,
            rule: ParamRule::OneOf(&[ROLE_LEFT, ROLE_RIGHT]),
            direction: Direction::QueryCapable,
        },
        // Zero params: asserted to trigger stereo discovery, unconfirmed on
        // hardware whether it only queries lock state.
        CommandDescriptor {
            name: "double_up_lock",
            operation: Operation::DoubleUpLock,
            command_id: 0x69,
            rule: ParamRule::OptionalOneOf(TOGGLE),
            direction: Direction::QueryCapable,
        },
        CommandDescriptor {
            name: "battery_announce",
            operation: Operation::BatteryAnnounce,
            command_id: 0x6B,
            rule: ParamRule::Empty,
            direction: Direction::WriteOnly,
        },
        CommandDescriptor {
            name: "emit_sound",
            operation: Operation::EmitSound,
            command_id: 0x6C,
            rule: ParamRule::Fixed(&SOUND_POWER_ON),
            direction: Direction::WriteOnly,
        },
        CommandDescriptor {
            name: "set_name",
            operation: Operation::SetName,
            command_id: 0x72,
            rule: ParamRule::Utf8 {
                max_len: NAME_MAX_LEN,
            },
            direction: Direction::WriteOnly,
        },
        CommandDescriptor {
            name: "volume",
            operation: Operation::Volume,
            command_id: 0xBB,
            rule: ParamRule::Pair(&[VOLUME_UP, VOLUME_DOWN]),
            direction: Direction::WriteOnly,
        },
        CommandDescriptor {
            name: "ble_state",
            operation: Operation::BleState,
            command_id: 0xB9,
            rule: ParamRule::OneOf(TOGGLE),
            direction: Direction::WriteOnly,
        },
    ],
};

/// Serial Port Profile service class.
pub const SPP_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";

/// Default RFCOMM channel of the LWACP service when SDP lookup fails.
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 5;
