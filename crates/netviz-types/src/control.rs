use serde::{Deserialize, Serialize};

/// Runtime knobs pushed by the visualizer UI over the control port.
///
/// `{"event":"SET_WINDOW","size":8}` or `{"event":"SET_LOSS","chance":0.1}`.
/// Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlCommand {
    /// Resize the sender window
    SetWindow { size: u32 },

    /// Probability in `[0, 1]` that the sender drops an outgoing packet
    SetLoss { chance: f64 },
}

impl ControlCommand {
    /// Parse a control datagram. Returns `None` for anything malformed or unrecognized.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text.trim()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_window() {
        assert_eq!(
            ControlCommand::parse(r#"{"event":"SET_WINDOW","size":5}"#),
            Some(ControlCommand::SetWindow { size: 5 })
        );
    }

    #[test]
    fn parses_set_loss_with_extra_fields() {
        assert_eq!(
            ControlCommand::parse(r#" {"event":"SET_LOSS","chance":0.25,"source":"ui"} "#),
            Some(ControlCommand::SetLoss { chance: 0.25 })
        );
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert_eq!(ControlCommand::parse(r#"{"event":"PAUSE"}"#), None);
        assert_eq!(ControlCommand::parse(r#"{"event":"SET_WINDOW","size":-3}"#), None);
        assert_eq!(ControlCommand::parse(r#"{"event":"SET_WINDOW""#), None);
        assert_eq!(ControlCommand::parse("not json"), None);
    }
}
