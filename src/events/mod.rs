pub mod parser;
pub mod raw;
pub mod transform;

pub use parser::{parse_event, EventPayload, ParsedEvent};
pub use raw::{EventKind, RawEvent};
pub use transform::transform_event;
