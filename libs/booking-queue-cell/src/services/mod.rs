pub mod sequencer;
pub mod queue;
pub mod live_shift;
pub mod disruption;
pub mod settings;
pub mod worker;
pub mod notifier;

pub use sequencer::*;
pub use queue::*;
pub use live_shift::*;
pub use disruption::*;
pub use settings::*;
pub use worker::*;
pub use notifier::*;
