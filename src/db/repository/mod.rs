//! Repository layer: entity-scoped database operations.
//!
//! Free functions over `&Connection`; callers decide the transaction.
//! All public functions are re-exported here.

mod alert;
mod answer;
mod care_team;
mod case;
mod diagnosis;
mod layout;
mod message;
mod outbox;
mod people;
mod tag;
mod treatment_plan;
mod visit;

pub use alert::*;
pub use answer::*;
pub use care_team::*;
pub use case::*;
pub use diagnosis::*;
pub use layout::*;
pub use message::*;
pub use outbox::*;
pub use people::*;
pub use tag::*;
pub use treatment_plan::*;
pub use visit::*;
