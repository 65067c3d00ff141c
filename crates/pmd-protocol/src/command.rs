use std::fmt;

/// One of the eight power operations a protocol script can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    LogIn,
    LogOut,
    UpdatePlugs,
    UpdateNodes,
    PowerOn,
    PowerOff,
    PowerCycle,
    Reset,
}

impl Command {
    /// All eight commands, in declaration order.
    pub const ALL: [Command; 8] = [
        Command::LogIn,
        Command::LogOut,
        Command::UpdatePlugs,
        Command::UpdateNodes,
        Command::PowerOn,
        Command::PowerOff,
        Command::PowerCycle,
        Command::Reset,
    ];

    /// `LogIn` and `LogOut` never carry a target; every other command does.
    pub fn requires_target(self) -> bool {
        !matches!(self, Command::LogIn | Command::LogOut)
    }

    /// Whether this is one of the two state-query commands that trigger
    /// semantic dispatch on a matched `Expect`.
    pub fn is_query(self) -> bool {
        matches!(self, Command::UpdatePlugs | Command::UpdateNodes)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Command::LogIn => "PM_LOG_IN",
            Command::LogOut => "PM_LOG_OUT",
            Command::UpdatePlugs => "PM_UPDATE_PLUGS",
            Command::UpdateNodes => "PM_UPDATE_NODES",
            Command::PowerOn => "PM_POWER_ON",
            Command::PowerOff => "PM_POWER_OFF",
            Command::PowerCycle => "PM_POWER_CYCLE",
            Command::Reset => "PM_RESET",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
