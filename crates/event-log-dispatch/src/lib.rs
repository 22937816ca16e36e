//! The Event Finder and Sender, §4.5: the pipeline that pulls the next
//! eligible event for a category and delivers it to a subscriber.

pub mod finder;
pub mod notifier;
pub mod sender;

pub use finder::{Category, Finder, LeastOccupiedFirst, Prioritizer, ProjectPriority};
pub use notifier::NotificationDispatcher;
pub use sender::{Sender, SenderError, SendingResult};
