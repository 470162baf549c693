pub mod aggregate;
pub mod bus;
pub mod counts;

pub use aggregate::{AggregateState, Rules, Settings, StateError, StateKey, StateSnapshot, StateUpdate};
pub use bus::{ListenerError, ListenerId, PublishReport, StateChangeBus, StateEvent};
pub use counts::{CountSource, DerivedCounts, RepositoryCounts};
