pub mod alert;
pub mod answer;
pub mod care_team;
pub mod case;
pub mod diagnosis;
pub mod enums;
pub mod layout;
pub mod people;
pub mod treatment_plan;

pub use alert::*;
pub use answer::*;
pub use care_team::*;
pub use case::*;
pub use diagnosis::*;
pub use layout::*;
pub use people::*;
pub use treatment_plan::*;
