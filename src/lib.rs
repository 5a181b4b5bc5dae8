//! Hand-gesture recognition core: landmarks in, debounced media actions out.
//!
//! Per frame: [`features::extract`] → [`classifier::TrainedModel::predict`] →
//! [`smoother::GestureSmoother`] → [`dispatch::ActionDispatcher`], driven by
//! [`pipeline::GesturePipeline`].

pub mod capture;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod dispatch;
pub mod features;
pub mod gesture;
pub mod landmarks;
pub mod pipeline;
pub mod smoother;

pub use classifier::{ClassifierError, ClassifierParams, GestureClassifier, Prediction, TrainedModel};
pub use config::Config;
pub use dispatch::{Action, ActionDispatcher, ActionExecutor};
pub use features::{extract, FeatureVector, FEATURE_LEN};
pub use gesture::GestureLabel;
pub use landmarks::{Landmark, LandmarkSet, LandmarkSource, Observation};
pub use pipeline::{FrameState, GesturePipeline};
pub use smoother::{GestureSmoother, SmoothedState};
