//! Immutable protocol/script record types.
//!
//! A `Protocol` maps each [`Command`] to an optional [`Script`]; devices of
//! the same model share one `Protocol` behind an `Arc`. Nothing in this
//! crate owns a socket, a buffer, or any other piece of live device state —
//! it only describes what a script *says*, not what driving it does.

mod command;
mod error;
mod script;

pub use command::Command;
pub use error::ProtocolError;
pub use script::{CaptureMapping, Interpretation, Script, ScriptElement, SendTemplate};

use std::collections::HashMap;

/// A named device model's set of per-command scripts.
///
/// An absent command (`scripts.get(command).is_none()`) means the command is
/// silently unsupported on devices of this model — not an error.
#[derive(Debug, Clone, Default)]
pub struct Protocol {
    pub name: String,
    scripts: HashMap<Command, Script>,
}

impl Protocol {
    pub fn new(name: impl Into<String>) -> Self {
        Protocol {
            name: name.into(),
            scripts: HashMap::new(),
        }
    }

    pub fn with_script(mut self, command: Command, script: Script) -> Self {
        self.scripts.insert(command, script);
        self
    }

    pub fn script(&self, command: Command) -> Option<&Script> {
        self.scripts.get(&command)
    }

    pub fn supports(&self, command: Command) -> bool {
        self.scripts.contains_key(&command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_command_is_unsupported_not_error() {
        let proto = Protocol::new("test-model");
        assert!(!proto.supports(Command::Reset));
        assert!(proto.script(Command::Reset).is_none());
    }

    #[test]
    fn send_template_rejects_multiple_slots() {
        assert!(SendTemplate::parse("on %s and %s\n").is_err());
    }

    #[test]
    fn send_template_accepts_zero_or_one_slot() {
        assert!(matches!(
            SendTemplate::parse("login\n").unwrap(),
            SendTemplate::Literal(_)
        ));
        assert!(matches!(
            SendTemplate::parse("on %s\n").unwrap(),
            SendTemplate::WithTarget { .. }
        ));
    }

    #[test]
    fn send_template_renders_target_substitution() {
        let t = SendTemplate::parse("on %s\n").unwrap();
        assert_eq!(t.render(Some("p1")).unwrap(), "on p1\n");
    }

    #[test]
    fn literal_template_ignores_supplied_target() {
        let t = SendTemplate::parse("login\n").unwrap();
        assert_eq!(t.render(None).unwrap(), "login\n");
    }

    #[test]
    fn templated_send_without_target_is_an_error() {
        let t = SendTemplate::parse("on %s\n").unwrap();
        assert!(t.render(None).is_err());
    }
}
