//! Session-wide MIDI state

use serde::Serialize;
use std::fmt;

/// MIDI dialect announced by system exclusive handshakes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Gm,
    Gm2,
    Xg,
    Gs,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Gm => "GM",
            Dialect::Gm2 => "GM2",
            Dialect::Xg => "XG",
            Dialect::Gs => "GS",
        };
        f.write_str(name)
    }
}

/// State shared by all channels of one playback session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GlobalState {
    dialect: Dialect,
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Switch dialect, returning true when it changed
    pub fn set_dialect(&mut self, dialect: Dialect) -> bool {
        if self.dialect == dialect {
            return false;
        }
        tracing::debug!(from = %self.dialect, to = %dialect, "Dialect change");
        self.dialect = dialect;
        true
    }
}
