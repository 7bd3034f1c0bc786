mod errors;
mod isolate_id;

pub use color_eyre::eyre::eyre;
pub use errors::*;
pub use isolate_id::IsolateId;
