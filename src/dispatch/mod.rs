//! Stabilized gesture → media action, rate limited per binding.

mod executor;

pub use executor::{ActionExecutor, LogExecutor};

#[cfg(feature = "media-keys")]
pub use executor::MediaKeyExecutor;

use crate::gesture::GestureLabel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    VolumeUp,
    VolumeDown,
    PlayPause,
    NextTrack,
    PreviousTrack,
    Mute,
    Unmute,
}

impl Action {
    pub fn description(&self) -> &'static str {
        match self {
            Action::VolumeUp => "Volume up",
            Action::VolumeDown => "Volume down",
            Action::PlayPause => "Play/pause",
            Action::NextTrack => "Next track",
            Action::PreviousTrack => "Previous track",
            Action::Mute => "Mute",
            Action::Unmute => "Unmute",
        }
    }
}

/// How a held gesture behaves once its cooldown has elapsed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
    /// Keep firing every cooldown period while the gesture is held
    Repeat,
    /// Fire once per gesture; the hand must drop the gesture before it fires again
    Once,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionBinding {
    pub action: Action,
    pub mode: ActionMode,
    pub cooldown_ms: u64,
}

impl ActionBinding {
    pub fn repeat(action: Action, cooldown_ms: u64) -> Self {
        Self {
            action,
            mode: ActionMode::Repeat,
            cooldown_ms,
        }
    }

    pub fn once(action: Action, cooldown_ms: u64) -> Self {
        Self {
            action,
            mode: ActionMode::Once,
            cooldown_ms,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

pub const REPEAT_COOLDOWN_MS: u64 = 300;
pub const ONCE_COOLDOWN_MS: u64 = 1000;

pub fn default_bindings() -> BTreeMap<GestureLabel, ActionBinding> {
    BTreeMap::from([
        (GestureLabel::Palm, ActionBinding::repeat(Action::VolumeUp, REPEAT_COOLDOWN_MS)),
        (GestureLabel::Fist, ActionBinding::repeat(Action::VolumeDown, REPEAT_COOLDOWN_MS)),
        (GestureLabel::Pinch, ActionBinding::once(Action::PlayPause, ONCE_COOLDOWN_MS)),
        (GestureLabel::Point, ActionBinding::once(Action::NextTrack, ONCE_COOLDOWN_MS)),
        (GestureLabel::VSign, ActionBinding::once(Action::PreviousTrack, ONCE_COOLDOWN_MS)),
    ])
}

/// An action the dispatcher fired this frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dispatched {
    pub label: GestureLabel,
    pub action: Action,
    /// False when the executor reported a failure
    pub succeeded: bool,
}

/// Owns the gesture→action table and the cooldown state
pub struct ActionDispatcher {
    bindings: BTreeMap<GestureLabel, ActionBinding>,
    executor: Box<dyn ActionExecutor>,
    last_label: Option<GestureLabel>,
    last_time: Option<Instant>,
    /// Set once the stabilized gesture has been dropped since the last fire
    released: bool,
}

impl ActionDispatcher {
    pub fn new(bindings: BTreeMap<GestureLabel, ActionBinding>, executor: Box<dyn ActionExecutor>) -> Self {
        Self {
            bindings,
            executor,
            last_label: None,
            last_time: None,
            released: true,
        }
    }

    pub fn with_defaults(executor: Box<dyn ActionExecutor>) -> Self {
        Self::new(default_bindings(), executor)
    }

    pub fn bindings(&self) -> &BTreeMap<GestureLabel, ActionBinding> {
        &self.bindings
    }

    /// Returns the binding it replaced. UNKNOWN cannot be bound.
    pub fn bind(&mut self, label: GestureLabel, binding: ActionBinding) -> Option<ActionBinding> {
        if label == GestureLabel::Unknown {
            tracing::warn!("Ignoring binding for {}", label);
            return None;
        }
        self.bindings.insert(label, binding)
    }

    pub fn unbind(&mut self, label: GestureLabel) -> Option<ActionBinding> {
        self.bindings.remove(&label)
    }

    pub fn reset_bindings(&mut self) {
        self.bindings = default_bindings();
    }

    pub fn last_label(&self) -> Option<GestureLabel> {
        self.last_label
    }

    pub fn last_time(&self) -> Option<Instant> {
        self.last_time
    }

    /// The hand was lost this frame
    pub fn release(&mut self) {
        self.released = true;
    }

    /// Fire the action bound to `label` if the cooldown policy allows it.
    ///
    /// Executor failures are logged; the cooldown state advances either way.
    pub fn dispatch(&mut self, label: GestureLabel, now: Instant) -> Option<Dispatched> {
        if label == GestureLabel::Unknown {
            return None;
        }
        let binding = *self.bindings.get(&label)?;

        let changed = self.last_label != Some(label);
        let cooled = self
            .last_time
            .map_or(true, |t| now.saturating_duration_since(t) >= binding.cooldown());
        let fire = match binding.mode {
            ActionMode::Repeat => changed || cooled,
            ActionMode::Once => changed || (cooled && self.released),
        };
        if !fire {
            return None;
        }

        self.last_label = Some(label);
        self.last_time = Some(now);
        self.released = false;

        let succeeded = match self.executor.execute(binding.action) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("{} failed: {:#}", binding.action.description(), err);
                false
            }
        };

        tracing::debug!("{} -> {}", label, binding.action.description());
        Some(Dispatched {
            label,
            action: binding.action,
            succeeded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records actions in a shared log; optionally fails every call
    struct Recorder {
        log: Rc<RefCell<Vec<Action>>>,
        fail: bool,
    }

    impl ActionExecutor for Recorder {
        fn execute(&mut self, action: Action) -> anyhow::Result<()> {
            self.log.borrow_mut().push(action);
            if self.fail {
                anyhow::bail!("no audio device");
            }
            Ok(())
        }
    }

    fn dispatcher(fail: bool) -> (ActionDispatcher, Rc<RefCell<Vec<Action>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let recorder = Recorder {
            log: Rc::clone(&log),
            fail,
        };
        (ActionDispatcher::with_defaults(Box::new(recorder)), log)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_cooldown_suppresses_repeat() {
        let (mut d, log) = dispatcher(false);
        let t0 = Instant::now();

        assert!(d.dispatch(GestureLabel::Palm, t0).is_some());
        assert!(d.dispatch(GestureLabel::Palm, t0 + ms(100)).is_none());
        assert_eq!(log.borrow().len(), 1);

        let fired = d.dispatch(GestureLabel::Palm, t0 + ms(REPEAT_COOLDOWN_MS)).unwrap();
        assert_eq!(fired.action, Action::VolumeUp);
        assert_eq!(*log.borrow(), vec![Action::VolumeUp, Action::VolumeUp]);
        assert_eq!(d.last_time(), Some(t0 + ms(REPEAT_COOLDOWN_MS)));
    }

    #[test]
    fn test_label_change_fires_immediately() {
        let (mut d, log) = dispatcher(false);
        let t0 = Instant::now();
        d.dispatch(GestureLabel::Palm, t0);
        let fired = d.dispatch(GestureLabel::Fist, t0 + ms(10)).unwrap();
        assert_eq!(fired.action, Action::VolumeDown);
        assert_eq!(d.last_label(), Some(GestureLabel::Fist));
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_once_mode_needs_release() {
        let (mut d, log) = dispatcher(false);
        let t0 = Instant::now();

        assert!(d.dispatch(GestureLabel::Pinch, t0).is_some());
        // held past the cooldown: still one toggle
        assert!(d.dispatch(GestureLabel::Pinch, t0 + ms(1500)).is_none());

        d.release();
        assert!(d.dispatch(GestureLabel::Pinch, t0 + ms(1600)).is_some());
        assert_eq!(*log.borrow(), vec![Action::PlayPause, Action::PlayPause]);
    }

    #[test]
    fn test_once_mode_release_within_cooldown() {
        let (mut d, _) = dispatcher(false);
        let t0 = Instant::now();
        d.dispatch(GestureLabel::Point, t0);
        d.release();
        assert!(d.dispatch(GestureLabel::Point, t0 + ms(200)).is_none());
        assert!(d.dispatch(GestureLabel::Point, t0 + ms(ONCE_COOLDOWN_MS)).is_some());
    }

    #[test]
    fn test_unmapped_never_fires() {
        let (mut d, log) = dispatcher(false);
        let t0 = Instant::now();
        assert!(d.dispatch(GestureLabel::Unknown, t0).is_none());
        d.unbind(GestureLabel::Fist);
        assert!(d.dispatch(GestureLabel::Fist, t0).is_none());
        assert!(log.borrow().is_empty());
        assert_eq!(d.last_label(), None);
    }

    #[test]
    fn test_failing_executor_still_advances_cooldown() {
        let (mut d, log) = dispatcher(true);
        let t0 = Instant::now();

        let fired = d.dispatch(GestureLabel::Fist, t0).unwrap();
        assert!(!fired.succeeded);
        assert_eq!(d.last_label(), Some(GestureLabel::Fist));
        assert_eq!(d.last_time(), Some(t0));

        // no retry storm
        assert!(d.dispatch(GestureLabel::Fist, t0 + ms(50)).is_none());
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_custom_bindings() {
        let (mut d, log) = dispatcher(false);
        let t0 = Instant::now();

        let old = d.bind(GestureLabel::Fist, ActionBinding::once(Action::Mute, 500));
        assert_eq!(old, Some(ActionBinding::repeat(Action::VolumeDown, REPEAT_COOLDOWN_MS)));
        assert_eq!(d.bind(GestureLabel::Unknown, ActionBinding::once(Action::Unmute, 0)), None);
        assert!(!d.bindings().contains_key(&GestureLabel::Unknown));

        assert_eq!(d.dispatch(GestureLabel::Fist, t0).map(|f| f.action), Some(Action::Mute));

        d.reset_bindings();
        assert_eq!(d.bindings(), &default_bindings());
        assert_eq!(
            d.dispatch(GestureLabel::Fist, t0 + ms(REPEAT_COOLDOWN_MS)).map(|f| f.action),
            Some(Action::VolumeDown)
        );
        assert_eq!(*log.borrow(), vec![Action::Mute, Action::VolumeDown]);
    }

    #[test]
    fn test_log_executor_records() {
        let mut executor = LogExecutor::new();
        executor.execute(Action::NextTrack).unwrap();
        assert_eq!(executor.executed(), &[Action::NextTrack]);
    }

    #[test]
    fn test_binding_serde() {
        let json = serde_json::to_string(&ActionBinding::once(Action::PlayPause, 1000)).unwrap();
        assert_eq!(json, r#"{"action":"PLAY_PAUSE","mode":"once","cooldown_ms":1000}"#);
    }
}
