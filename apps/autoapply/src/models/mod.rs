pub mod answer;
pub mod form;
pub mod session;

pub use answer::{AnswerSource, AnswerValue, PendingQuestion, ResolvedAnswer};
pub use form::{ApplyEntry, ControlKind, DiscoveredForm, FieldLocator, FieldType, FormField, FormStep};
pub use session::{ApplicationSession, SessionStatus};
