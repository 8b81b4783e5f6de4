pub mod calls;
pub mod events;
pub mod export;
pub mod keywords;
pub mod notifier;
pub mod profiles;

pub use events::{ChangeAction, ChangeEvent, EventBus};
pub use notifier::NotifierHandle;
