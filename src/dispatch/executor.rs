use super::Action;
use anyhow::Result;

/// Performs the platform effect of an action
pub trait ActionExecutor {
    fn execute(&mut self, action: Action) -> Result<()>;
}

/// Headless executor: logs each action instead of touching the OS
#[derive(Debug, Default)]
pub struct LogExecutor {
    executed: Vec<Action>,
}

impl LogExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every action executed so far, oldest first
    pub fn executed(&self) -> &[Action] {
        &self.executed
    }
}

impl ActionExecutor for LogExecutor {
    fn execute(&mut self, action: Action) -> Result<()> {
        tracing::info!("Action: {}", action.description());
        self.executed.push(action);
        Ok(())
    }
}

#[cfg(feature = "media-keys")]
pub use media::MediaKeyExecutor;

#[cfg(feature = "media-keys")]
mod media {
    use super::{Action, ActionExecutor};
    use anyhow::{Context, Result};
    use enigo::{Direction, Enigo, Key, Keyboard, Settings};

    /// Sends media keys through the desktop input stack
    pub struct MediaKeyExecutor {
        enigo: Enigo,
    }

    impl MediaKeyExecutor {
        pub fn new() -> Result<Self> {
            let enigo = Enigo::new(&Settings::default()).context("Failed to connect to input system")?;
            Ok(Self { enigo })
        }
    }

    impl ActionExecutor for MediaKeyExecutor {
        fn execute(&mut self, action: Action) -> Result<()> {
            // there is no separate unmute key; both toggle
            let key = match action {
                Action::VolumeUp => Key::VolumeUp,
                Action::VolumeDown => Key::VolumeDown,
                Action::PlayPause => Key::MediaPlayPause,
                Action::NextTrack => Key::MediaNextTrack,
                Action::PreviousTrack => Key::MediaPrevTrack,
                Action::Mute | Action::Unmute => Key::VolumeMute,
            };
            self.enigo
                .key(key, Direction::Click)
                .with_context(|| format!("Failed to send {}", action.description()))?;
            tracing::debug!("Sent {:?}", key);
            Ok(())
        }
    }
}
