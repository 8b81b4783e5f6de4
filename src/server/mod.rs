pub mod router;

pub use router::{AppState, callcontrol_router};
