use strum_macros::{Display, EnumString};

/// Where the application is in its life.
///
/// States are ordered: `NotReady < Created < Listening`. The registry never
/// moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum LifecycleState {
    /// Nothing has been initialized yet.
    #[default]
    NotReady,
    /// The application object exists but is not listening yet.
    Created,
    /// The listener is bound and accepting requests.
    Listening,
}

/// A state that hooks can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Milestone {
    Created,
    Listening,
}

impl From<Milestone> for LifecycleState {
    fn from(milestone: Milestone) -> Self {
        match milestone {
            Milestone::Created => LifecycleState::Created,
            Milestone::Listening => LifecycleState::Listening,
        }
    }
}
