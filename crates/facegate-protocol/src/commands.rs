//! Command vocabulary for the push protocol.
//!
//! The protocol carries a fixed, small set of commands. Device-initiated
//! commands arrive with a `"cmd"` key; server-initiated commands are sent
//! by the gateway and answered by the device with a matching `"ret"` key.
//! Anything outside this vocabulary is an explicit [`CommandName::Unknown`]
//! variant, never a silent string fallthrough.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Recognized protocol commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    // Device-initiated
    /// Device registration / (re)announcement.
    Reg,
    /// Periodic liveness ping.
    Heartbeat,
    /// Attendance log batch push.
    SendLog,
    /// Device reports a locally-enrolled user.
    SendUser,
    /// Device reports a scanned QR code.
    SendQrCode,

    // Server-initiated
    /// Fetch one enrolled user from the device.
    GetUserInfo,
    /// Push or update one enrolled user on the device.
    SetUserInfo,
    /// Remove one enrolled user from the device.
    DeleteUser,
    /// Clear the device's local attendance log.
    CleanLog,
    /// Reboot the device.
    Reboot,
    /// Fire the door strike.
    OpenDoor,
    /// Query capacity counters, firmware, clock and MAC.
    GetDevInfo,
    /// Set the device clock.
    SetTime,
}

impl Command {
    /// Map a wire name to a command.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "reg" => Some(Command::Reg),
            "heartbeat" => Some(Command::Heartbeat),
            "sendlog" => Some(Command::SendLog),
            "senduser" => Some(Command::SendUser),
            "sendqrcode" => Some(Command::SendQrCode),
            "getuserinfo" => Some(Command::GetUserInfo),
            "setuserinfo" => Some(Command::SetUserInfo),
            "deleteuser" => Some(Command::DeleteUser),
            "cleanlog" => Some(Command::CleanLog),
            "reboot" => Some(Command::Reboot),
            "opendoor" => Some(Command::OpenDoor),
            "getdevinfo" => Some(Command::GetDevInfo),
            "settime" => Some(Command::SetTime),
            _ => None,
        }
    }

    /// The command's wire name.
    #[must_use]
    pub fn as_wire(&self) -> &'static str {
        match self {
            Command::Reg => "reg",
            Command::Heartbeat => "heartbeat",
            Command::SendLog => "sendlog",
            Command::SendUser => "senduser",
            Command::SendQrCode => "sendqrcode",
            Command::GetUserInfo => "getuserinfo",
            Command::SetUserInfo => "setuserinfo",
            Command::DeleteUser => "deleteuser",
            Command::CleanLog => "cleanlog",
            Command::Reboot => "reboot",
            Command::OpenDoor => "opendoor",
            Command::GetDevInfo => "getdevinfo",
            Command::SetTime => "settime",
        }
    }

    /// Whether devices are allowed to initiate this command.
    #[must_use]
    pub fn is_device_initiated(&self) -> bool {
        matches!(
            self,
            Command::Reg
                | Command::Heartbeat
                | Command::SendLog
                | Command::SendUser
                | Command::SendQrCode
        )
    }

    /// The `"ret"` tag a device reply to this server-initiated command
    /// carries. Replies echo the command name.
    #[must_use]
    pub fn reply_tag(&self) -> &'static str {
        self.as_wire()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

/// A parsed command tag: either a member of the vocabulary or an explicit
/// unknown. Unknown tags still dispatch (to a "not implemented" reply), so
/// they carry the original name for logging and the echo reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandName {
    Known(Command),
    Unknown(String),
}

impl CommandName {
    /// Parse a wire name. Never fails; unrecognized names become
    /// [`CommandName::Unknown`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match Command::from_wire(name) {
            Some(cmd) => CommandName::Known(cmd),
            None => CommandName::Unknown(name.to_string()),
        }
    }

    /// The wire name, whichever variant.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            CommandName::Known(cmd) => cmd.as_wire(),
            CommandName::Unknown(name) => name,
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
